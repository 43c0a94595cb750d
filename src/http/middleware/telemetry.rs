//! Telemetry middleware.
//! Measures every inbound request and owns its server span.

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use opentelemetry::KeyValue;
use std::any::Any;
use std::panic::AssertUnwindSafe;

use crate::http::request::RequestContext;
use crate::http::response::RelayError;
use crate::observability::logging::request_span;
use crate::observability::semconv;
use crate::observability::trace::{SpanKind, Status};
use crate::observability::Telemetry;

/// State the middleware needs besides the request itself.
#[derive(Clone)]
pub struct TelemetryState {
    pub telemetry: Telemetry,
    pub service_name: String,
    pub tenant_id: String,
    pub listener_port: u16,
}

/// Wrap a handler with the server span, the active-request gauge and the
/// duration/body-size histograms.
///
/// The handler sees the request's `TraceScope` as an extension. Gauge
/// release and metric emission run after the handler completes or panics.
pub async fn telemetry_middleware(
    State(state): State<TelemetryState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&request, &state.service_name, state.listener_port);

    let scope = state.telemetry.tracer.scope(request.headers());
    let server_span = request_span(&state.service_name, &state.tenant_id).in_scope(|| {
        scope.start_span(
            format!("{} {}", ctx.method, ctx.route),
            SpanKind::Server,
            vec![
                KeyValue::new(semconv::HTTP_REQUEST_METHOD, ctx.method.clone()),
                KeyValue::new(semconv::HTTP_ROUTE, ctx.route.clone()),
                KeyValue::new(semconv::URL_SCHEME, ctx.url_scheme.clone()),
                KeyValue::new(semconv::SERVER_ADDRESS, ctx.server_address.clone()),
                KeyValue::new(semconv::SERVER_PORT, i64::from(ctx.server_port)),
            ],
        )
    });
    let active = state
        .telemetry
        .server
        .start(ctx.active_key(), ctx.request_body_size);

    request.extensions_mut().insert(scope.clone());

    let outcome = server_span
        .instrument(AssertUnwindSafe(next.run(request)).catch_unwind())
        .await;

    let response = match outcome {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            server_span.in_scope(|| {
                tracing::error!(
                    request.id = ?ctx.request_id,
                    error.message = %message,
                    "Unexpected error while handling request"
                );
            });
            server_span.record_exception("panic", &message);
            RelayError::Internal("unexpected failure".to_string()).into_response()
        }
    };

    let status = response.status();
    server_span.set_attribute(semconv::HTTP_RESPONSE_STATUS_CODE, i64::from(status.as_u16()));
    if status.is_server_error() && !matches!(server_span.status(), Status::Error { .. }) {
        server_span.set_status(Status::error(
            status.canonical_reason().unwrap_or("server error"),
        ));
    }

    // Streamed bodies report no exact size and are left unmeasured.
    let response_size = response.body().size_hint().exact();
    active.finish(status.as_u16(), response_size);
    server_span.end();

    response
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Extension, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::config::RelayConfig;
    use crate::observability::metrics::{ActiveRequestKey, InMemoryMetrics};
    use crate::observability::trace::{InMemorySpanExporter, InMemorySpans, SpanDataExt, TraceScope};
    use opentelemetry::Value;

    fn app(
        config: &RelayConfig,
    ) -> (Router, Telemetry, InMemorySpanExporter, Arc<InMemoryMetrics>) {
        let (telemetry, spans, metrics) = Telemetry::in_memory(config);
        let state = TelemetryState {
            telemetry: telemetry.clone(),
            service_name: "test-service".into(),
            tenant_id: "t1".into(),
            listener_port: 8000,
        };
        let router = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route("/boom", get(boom))
            .route(
                "/nested",
                get(|Extension(scope): Extension<TraceScope>| async move {
                    let _child = scope.start_span("child", SpanKind::Internal, vec![]);
                    StatusCode::BAD_GATEWAY
                }),
            )
            .layer(middleware::from_fn_with_state(state, telemetry_middleware));
        (router, telemetry, spans, metrics)
    }

    async fn boom() -> &'static str {
        panic!("kaboom")
    }

    fn key(route: &str) -> ActiveRequestKey {
        ActiveRequestKey {
            server_address: "test-service".into(),
            server_port: 8000,
            method: "GET".into(),
            url_scheme: "http".into(),
            route: route.into(),
        }
    }

    #[tokio::test]
    async fn test_success_records_once() {
        let (router, telemetry, spans, metrics) = app(&RelayConfig::default());
        let response = router
            .oneshot(Request::builder().uri("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(telemetry.server.active_count(&key("/ok")), 0);

        let durations = metrics.records_named(semconv::HTTP_SERVER_REQUEST_DURATION);
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].attribute(semconv::HTTP_RESPONSE_STATUS_CODE), Some(&Value::I64(200)));
        assert_eq!(metrics.records_named(semconv::HTTP_SERVER_RESPONSE_BODY_SIZE)[0].value, 4.0);

        let server = &spans.spans_named("GET /ok")[0];
        assert_eq!(server.span_kind, SpanKind::Server);
        assert_eq!(server.status, Status::Ok);
    }

    #[tokio::test]
    async fn test_panic_becomes_500_and_balances() {
        let (router, telemetry, spans, metrics) = app(&RelayConfig::default());
        let response = router
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(telemetry.server.active_count(&key("/boom")), 0);

        let durations = metrics.records_named(semconv::HTTP_SERVER_REQUEST_DURATION);
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].attribute(semconv::HTTP_RESPONSE_STATUS_CODE), Some(&Value::I64(500)));

        let server = &spans.spans_named("GET /boom")[0];
        assert_eq!(server.status, Status::error("kaboom"));
        assert!(server.has_event(semconv::EXCEPTION_EVENT));
    }

    #[tokio::test]
    async fn test_child_spans_nest_and_5xx_marks_error() {
        let (router, _telemetry, spans, _metrics) = app(&RelayConfig::default());
        let traceparent = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/nested")
                    .header("traceparent", traceparent)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let server = &spans.spans_named("GET /nested")[0];
        let child = &spans.spans_named("child")[0];
        assert_eq!(child.parent_span_id, server.span_id());
        assert_eq!(server.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(server.is_error());
    }
}
