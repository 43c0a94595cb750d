//! Request identification and context.
//!
//! # Responsibilities
//! - Generate a request ID (UUID v4) when the caller sent none
//! - Capture the per-request context the telemetry middleware measures:
//!   method, route, scheme, server address/port, declared body size
//!
//! # Design Decisions
//! - Request ID added as early as possible and echoed on the response
//! - Server address comes from the request authority or `Host` header,
//!   falling back to the service name and the listener port

use axum::{
    body::Body,
    http::{header, uri::Authority, HeaderMap, HeaderName, Request},
};
use std::str::FromStr;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::observability::metrics::ActiveRequestKey;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Layer that assigns a UUID v4 request ID when none is present.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Layer that copies the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Request ID from headers, if present and printable.
pub fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// What the telemetry middleware knows about one inbound call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub route: String,
    pub url_scheme: String,
    pub server_address: String,
    pub server_port: u16,
    pub request_id: Option<String>,
    pub request_body_size: Option<u64>,
}

impl RequestContext {
    /// Capture context from an inbound request.
    pub fn from_request(request: &Request<Body>, fallback_host: &str, fallback_port: u16) -> Self {
        let uri = request.uri();
        let authority = uri.authority().cloned().or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| Authority::from_str(v).ok())
        });

        let server_address = authority
            .as_ref()
            .map(|a| a.host().trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| fallback_host.to_string());
        let server_port = authority
            .as_ref()
            .and_then(|a| a.port_u16())
            .unwrap_or(fallback_port);

        Self {
            method: request.method().as_str().to_string(),
            route: uri.path().to_string(),
            url_scheme: uri.scheme_str().unwrap_or("http").to_string(),
            server_address,
            server_port,
            request_id: request_id_from_headers(request.headers()),
            request_body_size: content_length(request.headers()),
        }
    }

    /// Gauge key for this request.
    pub fn active_key(&self) -> ActiveRequestKey {
        ActiveRequestKey {
            server_address: self.server_address.clone(),
            server_port: self.server_port,
            method: self.method.clone(),
            url_scheme: self.url_scheme.clone(),
            route: self.route.clone(),
        }
    }
}

/// Declared `content-length`, when present and numeric.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
