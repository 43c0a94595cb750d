//! End-to-end tests for the sender → receiver hop.

use axum::http::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use trace_relay::observability::semconv;
use opentelemetry::Value as AttrValue;
use trace_relay::observability::metrics::MetricRecord;
use trace_relay::observability::trace::{InMemorySpans, SpanDataExt, SpanKind, Status};

mod common;

use common::{client, receiver_config, sender_config, start_service, TestService};

fn active_delta(service: &TestService, name: &str) -> f64 {
    service
        .metrics
        .records_named(name)
        .iter()
        .map(|r| r.value)
        .sum()
}

fn status_of(record: &MetricRecord) -> Option<i64> {
    match record.attribute(semconv::HTTP_RESPONSE_STATUS_CODE) {
        Some(AttrValue::I64(status)) => Some(*status),
        _ => None,
    }
}

#[tokio::test]
async fn test_forward_success_shares_trace() {
    let receiver = start_service(receiver_config()).await;
    let sender = start_service(sender_config(receiver.addr)).await;

    let res = client()
        .post(sender.url("/send"))
        .json(&json!({"request_id": "req-42", "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["sender"], "sender-service");
    assert_eq!(body["tenant"], "default");
    let inner = &body["receiver_response"];
    assert_eq!(inner["status"], "processed");
    assert_eq!(inner["request_id"], "req-42");
    assert_eq!(inner["sender"], "sender-service");
    assert_eq!(inner["receiver"], "receiver-service");
    let records = inner["database_result"]["records"].as_u64().unwrap();
    assert!((1..=10).contains(&records));

    let call = &sender.spans.spans_named("call_receiver")[0];
    let http_call = &sender.spans.spans_named("POST")[0];
    let remote = &receiver.spans.spans_named("POST /process")[0];

    assert_eq!(call.status, Status::Ok);
    assert_eq!(
        call.attribute(semconv::PEER_SERVICE),
        Some(&AttrValue::from("receiver-service"))
    );
    assert_eq!(
        call.attribute(semconv::APP_RECEIVER_RESPONSE_STATUS),
        Some(&AttrValue::I64(200))
    );
    assert_eq!(http_call.span_kind, SpanKind::Client);
    assert_eq!(http_call.parent_span_id, call.span_id());
    assert_eq!(remote.trace_id(), call.trace_id());
    assert_eq!(remote.parent_span_id, http_call.span_id());

    let process = &receiver.spans.spans_named("process_data")[0];
    let query = &receiver.spans.spans_named("database_query")[0];
    assert_eq!(query.parent_span_id, process.span_id());
    assert_eq!(query.span_kind, SpanKind::Client);
    assert_eq!(
        query.attribute(semconv::DB_SYSTEM),
        Some(&AttrValue::from("simulated"))
    );
    assert_eq!(
        process.attribute(semconv::APP_PROCESSING_SUCCESS),
        Some(&AttrValue::Bool(true))
    );

    let client_durations = sender.metrics.records_named(semconv::HTTP_CLIENT_REQUEST_DURATION);
    assert_eq!(client_durations.len(), 1);
    assert_eq!(status_of(&client_durations[0]), Some(200));
    assert_eq!(
        client_durations[0].attribute(semconv::HTTP_ROUTE),
        Some(&AttrValue::from("/process"))
    );
}

#[tokio::test]
async fn test_sender_simulated_error_is_500() {
    let receiver_addr = common::unused_addr().await;
    let mut config = sender_config(receiver_addr);
    config.faults.error_rate = 1.0;
    let sender = start_service(config).await;

    let res = client().post(sender.url("/send")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["detail"], "Simulated error");

    let server = &sender.spans.spans_named("POST /send")[0];
    assert_eq!(server.status, Status::error("Simulated error"));
    assert_eq!(
        server.attribute(semconv::ERROR_TYPE),
        Some(&AttrValue::from("simulated_error"))
    );

    // The roll happens before any network call.
    assert!(sender.spans.spans_named("call_receiver").is_empty());
    assert!(sender
        .metrics
        .records_named(semconv::HTTP_CLIENT_REQUEST_DURATION)
        .is_empty());
}

#[tokio::test]
async fn test_receiver_simulated_error() {
    let mut config = receiver_config();
    config.faults.error_rate = 1.0;
    let receiver = start_service(config).await;

    let res = client()
        .post(receiver.url("/process"))
        .json(&json!({"request_id": "r", "sender": "s", "tenant_id": "t9"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["detail"], "Simulated processing error");

    let server = &receiver.spans.spans_named("POST /process")[0];
    assert_eq!(server.status, Status::error("Simulated error"));
    assert_eq!(
        server.attribute(semconv::APP_TENANT_ID),
        Some(&AttrValue::from("t9"))
    );
    assert!(receiver.spans.spans_named("process_data").is_empty());

    // Seen from the sender, a failing receiver is an upstream fault.
    let sender = start_service(sender_config(receiver.addr)).await;
    let res = client().post(sender.url("/send")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Receiver service error"));
}

#[tokio::test]
async fn test_receiver_database_failure() {
    let mut config = receiver_config();
    config.faults.db_error_rate = 1.0;
    let receiver = start_service(config).await;

    let res = client()
        .post(receiver.url("/process"))
        .json(&json!({"request_id": "db-1", "sender": "s"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["detail"], "Processing error: simulated database query failed");

    let server = &receiver.spans.spans_named("POST /process")[0];
    let process = &receiver.spans.spans_named("process_data")[0];
    assert!(server.is_error());
    assert!(server.has_event(semconv::EXCEPTION_EVENT));
    assert!(process.has_event(semconv::EXCEPTION_EVENT));
    assert_eq!(
        server.attribute(semconv::APP_REQUEST_ID),
        Some(&AttrValue::from("db-1"))
    );

    let durations = receiver.metrics.records_named(semconv::HTTP_SERVER_REQUEST_DURATION);
    assert_eq!(status_of(&durations[0]), Some(500));

    let sender = start_service(sender_config(receiver.addr)).await;
    let res = client().post(sender.url("/send")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_malformed_upstream_body_is_502() {
    let backend =
        common::start_programmable_backend(|| async { (200, "definitely not json".to_string()) }).await;
    let sender = start_service(sender_config(backend)).await;

    let res = client().post(sender.url("/send")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON response from receiver"));

    let call = &sender.spans.spans_named("call_receiver")[0];
    assert!(call.is_error());
    assert_eq!(
        call.attribute(semconv::ERROR_TYPE),
        Some(&AttrValue::from("json_decode_error"))
    );

    let durations = sender.metrics.records_named(semconv::HTTP_SERVER_REQUEST_DURATION);
    assert_eq!(durations.len(), 1);
    assert_eq!(status_of(&durations[0]), Some(502));

    // The upstream itself answered 200.
    let client_durations = sender.metrics.records_named(semconv::HTTP_CLIENT_REQUEST_DURATION);
    assert_eq!(status_of(&client_durations[0]), Some(200));
}

#[tokio::test]
async fn test_upstream_error_status_is_502() {
    let backend =
        common::start_programmable_backend(|| async { (503, "busy".to_string()) }).await;
    let sender = start_service(sender_config(backend)).await;

    let res = client().post(sender.url("/send")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let client_durations = sender.metrics.records_named(semconv::HTTP_CLIENT_REQUEST_DURATION);
    assert_eq!(status_of(&client_durations[0]), Some(503));
}

#[tokio::test]
async fn test_unreachable_receiver_is_502() {
    let sender = start_service(sender_config(common::unused_addr().await)).await;

    let res = client().post(sender.url("/send")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Receiver service error"));

    let call = &sender.spans.spans_named("call_receiver")[0];
    assert!(call.is_error());
    assert!(call.has_event(semconv::EXCEPTION_EVENT));

    let client_durations = sender.metrics.records_named(semconv::HTTP_CLIENT_REQUEST_DURATION);
    assert_eq!(client_durations.len(), 1);
    assert_eq!(status_of(&client_durations[0]), Some(500));
    assert_eq!(active_delta(&sender, semconv::HTTP_CLIENT_ACTIVE_REQUESTS), 0.0);
}

#[tokio::test]
async fn test_artificial_latency() {
    let mut config = receiver_config();
    config.faults.latency_ms = 200;
    let receiver = start_service(config).await;

    let started = Instant::now();
    let res = client()
        .post(receiver.url("/process"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(started.elapsed() >= Duration::from_millis(200));

    let latency = &receiver.spans.spans_named("artificial_latency")[0];
    assert_eq!(
        latency.attribute(semconv::APP_LATENCY_MS),
        Some(&AttrValue::I64(200))
    );

    let durations = receiver.metrics.records_named(semconv::HTTP_SERVER_REQUEST_DURATION);
    assert!(durations[0].value >= 0.2);
}

#[tokio::test]
async fn test_gauge_balances_across_outcomes() {
    let mut config = sender_config(common::unused_addr().await);
    config.faults.error_rate = 0.5;
    let sender = start_service(config).await;
    let http = client();

    let mut statuses = Vec::new();
    for _ in 0..10 {
        let res = http.post(sender.url("/send")).send().await.unwrap();
        statuses.push(res.status().as_u16());
    }
    http.get(sender.url("/health")).send().await.unwrap();
    http.post(sender.url("/send")).body("{broken").send().await.unwrap();

    assert!(statuses.iter().all(|s| *s == 500 || *s == 502));
    assert_eq!(active_delta(&sender, semconv::HTTP_SERVER_ACTIVE_REQUESTS), 0.0);
    assert_eq!(active_delta(&sender, semconv::HTTP_CLIENT_ACTIVE_REQUESTS), 0.0);

    // One duration record per request, each with the status actually returned.
    let durations = sender.metrics.records_named(semconv::HTTP_SERVER_REQUEST_DURATION);
    assert_eq!(durations.len(), 12);
    let send_statuses: Vec<u16> = durations
        .iter()
        .filter(|r| r.attribute(semconv::HTTP_ROUTE) == Some(&AttrValue::from("/send")))
        .filter_map(|r| status_of(r).map(|s| s as u16))
        .collect();
    let mut expected = statuses.clone();
    expected.push(422);
    let mut actual = send_statuses;
    expected.sort_unstable();
    actual.sort_unstable();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let receiver = start_service(receiver_config()).await;

    let res = client()
        .get(receiver.url("/metrics"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-request-id"], "abc-123");

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Use OpenTelemetry Collector to scrape OTLP metrics");
    assert_eq!(body["service"], "receiver-service");
}

#[tokio::test]
async fn test_incoming_traceparent_is_continued() {
    let receiver = start_service(receiver_config()).await;
    let traceparent = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    let res = client()
        .post(receiver.url("/process"))
        .header("traceparent", traceparent)
        .json(&json!({"request_id": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let server = &receiver.spans.spans_named("POST /process")[0];
    assert_eq!(server.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
    assert_eq!(server.parent_span_id.to_string(), "00f067aa0ba902b7");
    assert_eq!(server.status, Status::Ok);
}
