//! Endpoints shared by both services and request-body helpers.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ServiceConfig;
use crate::http::request::request_id_from_headers;
use crate::http::response::RelayError;
use crate::observability::semconv;
use crate::observability::trace::TraceScope;

/// Used when neither the body nor the headers carry a request id.
pub const UNKNOWN: &str = "unknown";

/// Identity labels returned by the informational endpoints.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub tenant_id: String,
}

impl From<&ServiceConfig> for ServiceInfo {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            name: config.name.clone(),
            tenant_id: config.tenant_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub tenant: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsInfo {
    pub message: String,
    pub service: String,
    pub tenant: String,
}

/// `GET /health`
pub async fn health(
    State(info): State<ServiceInfo>,
    Extension(scope): Extension<TraceScope>,
) -> Json<HealthResponse> {
    scope.set_attribute(semconv::APP_ENDPOINT_TYPE, "health");
    scope.set_attribute(semconv::APP_TENANT_ID, info.tenant_id.clone());
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: info.name,
        tenant: info.tenant_id,
    })
}

/// `GET /metrics`
///
/// Metrics are pushed through the exporter pipeline; this only points there.
pub async fn metrics_info(
    State(info): State<ServiceInfo>,
    Extension(scope): Extension<TraceScope>,
) -> Json<MetricsInfo> {
    scope.set_attribute(semconv::APP_ENDPOINT_TYPE, "metrics");
    scope.set_attribute(semconv::APP_TENANT_ID, info.tenant_id.clone());
    Json(MetricsInfo {
        message: "Use OpenTelemetry Collector to scrape OTLP metrics".to_string(),
        service: info.name,
        tenant: info.tenant_id,
    })
}

/// Decode an optional JSON object body. An empty body is an empty object.
pub fn json_object(body: &Bytes) -> Result<Map<String, Value>, RelayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(RelayError::InvalidBody("expected a JSON object".to_string())),
        Err(e) => Err(RelayError::InvalidBody(e.to_string())),
    }
}

/// String field of a JSON object, if present.
pub fn str_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

/// Scalar field of a JSON object rendered as text. Null, arrays and objects are absent.
pub fn scalar_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Request id: body `request_id`, then the `x-request-id` header, then "unknown".
pub fn resolve_request_id(body: &Map<String, Value>, headers: &HeaderMap) -> String {
    scalar_field(body, "request_id")
        .or_else(|| request_id_from_headers(headers))
        .unwrap_or_else(|| UNKNOWN.to_string())
}
