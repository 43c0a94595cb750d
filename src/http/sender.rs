//! Sender gateway: `POST /send`.
//!
//! # Data Flow
//! ```text
//! inbound body (optional JSON object)
//!     → artificial latency (optional)
//!     → simulated error roll (500 before any network call)
//!     → call_receiver span → instrumented POST <receiver>/process
//!     → classify: transport fault 502 | malformed body 502 | success 200
//! ```

use axum::{body::Bytes, extract::State, http::HeaderMap, Extension, Json};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::fault::FaultInjector;
use crate::http::client::UpstreamClient;
use crate::http::handlers::{json_object, resolve_request_id, ServiceInfo};
use crate::http::response::RelayError;
use crate::observability::semconv;
use crate::observability::trace::{SpanKind, Status, TraceScope};

/// Route called on the receiver.
pub const PROCESS_ROUTE: &str = "/process";

/// `peer.service` of the forwarding span.
const RECEIVER_PEER: &str = "receiver-service";

#[derive(Clone)]
pub struct SenderState {
    pub service: ServiceInfo,
    pub faults: FaultInjector,
    pub upstream: Arc<UpstreamClient>,
}

/// Envelope forwarded to the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardPayload {
    pub request_id: String,
    pub tenant_id: String,
    pub sender: String,
    pub data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub status: String,
    pub sender: String,
    pub tenant: String,
    pub receiver_response: Value,
}

/// `POST /send`
pub async fn send(
    State(state): State<SenderState>,
    Extension(scope): Extension<TraceScope>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SendResponse>, RelayError> {
    let tenant = state.service.tenant_id.as_str();
    scope.set_attribute(semconv::APP_ENDPOINT_TYPE, "api");
    scope.set_attribute(semconv::APP_TENANT_ID, tenant.to_string());

    let data = json_object(&body).inspect_err(|e| {
        tracing::warn!(tenant.id = %tenant, error.message = %e, "Rejected request body");
    })?;
    let request_id = resolve_request_id(&data, &headers);
    scope.set_attribute(semconv::APP_REQUEST_ID, request_id.clone());

    tracing::info!(request.id = %request_id, tenant.id = %tenant, "Received request to send");

    state.faults.apply_latency(&scope).await;

    if let Err(e) = state.faults.check(&scope, "Simulated error") {
        tracing::error!(request.id = %request_id, tenant.id = %tenant, "Simulated error occurred");
        return Err(e);
    }

    let payload = ForwardPayload {
        request_id: request_id.clone(),
        tenant_id: tenant.to_string(),
        sender: state.service.name.clone(),
        data: Value::Object(data),
    };

    let call = scope.start_span(
        "call_receiver",
        SpanKind::Internal,
        vec![
            KeyValue::new(semconv::APP_TENANT_ID, tenant.to_string()),
            KeyValue::new(semconv::APP_REQUEST_ID, request_id.clone()),
            KeyValue::new(semconv::PEER_SERVICE, RECEIVER_PEER),
        ],
    );

    let outcome = match call
        .instrument(state.upstream.post_json(&scope, PROCESS_ROUTE, &payload, Some(&request_id)))
        .await
    {
        Ok(response) => {
            let status = response.status.as_u16();
            response.into_json().map(|json| (status, json))
        }
        Err(e) => Err(RelayError::from(e)),
    };

    match outcome {
        Ok((status, receiver_response)) => {
            call.set_attribute(semconv::APP_RECEIVER_RESPONSE_STATUS, i64::from(status));
            call.set_status(Status::Ok);
            call.in_scope(|| {
                tracing::info!(
                    request.id = %request_id,
                    tenant.id = %tenant,
                    http.status_code = status,
                    "Successfully forwarded request to receiver"
                )
            });
            call.end();
            Ok(Json(SendResponse {
                status: "success".to_string(),
                sender: state.service.name.clone(),
                tenant: tenant.to_string(),
                receiver_response,
            }))
        }
        Err(e) => {
            let message = e.to_string();
            call.set_attribute(semconv::ERROR_TYPE, e.error_type());
            call.set_attribute(semconv::ERROR_MESSAGE, message.clone());
            call.record_exception(e.error_type(), &message);
            call.in_scope(|| match &e {
                RelayError::UpstreamMalformed(_) => tracing::error!(
                    request.id = %request_id,
                    tenant.id = %tenant,
                    error.message = %message,
                    "Failed to parse JSON response from receiver"
                ),
                RelayError::UpstreamTransport(_) => tracing::error!(
                    request.id = %request_id,
                    tenant.id = %tenant,
                    error.message = %message,
                    "Failed to forward request to receiver"
                ),
                _ => tracing::error!(
                    request.id = %request_id,
                    tenant.id = %tenant,
                    error.message = %message,
                    "Unexpected error"
                ),
            });
            call.end();
            scope.set_status(Status::error(message));
            Err(e)
        }
    }
}
