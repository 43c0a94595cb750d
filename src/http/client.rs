//! Instrumented upstream HTTP client.
//!
//! # Responsibilities
//! - POST JSON to the receiver over a pooled hyper client (http or https)
//! - Open a CLIENT span per call and inject its `traceparent`
//! - Record `http.client.*` metrics on every outcome
//! - Bound the whole exchange (send + body read) by a timeout
//!
//! # Design Decisions
//! - The client never decides the caller's status code; it returns an
//!   [`UpstreamResponse`] or an [`UpstreamError`] and the handler classifies
//! - Calls that never produced a response are measured with status 500
//! - Routes are appended to the receiver URL's path, so a receiver mounted
//!   under a prefix keeps it

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue, Method, Request, StatusCode},
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use opentelemetry::KeyValue;
use serde::Serialize;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use url::Url;

use crate::config::UpstreamConfig;
use crate::http::request::X_REQUEST_ID;
use crate::http::response::RelayError;
use crate::observability::metrics::{ActiveRequestKey, HttpMeter};
use crate::observability::semconv;
use crate::observability::trace::{SpanKind, Status, TraceScope};

/// Upper bound on buffered upstream response bodies.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Status recorded on client metrics when no response arrived.
const NO_RESPONSE_STATUS: u16 = 500;

/// Ways an upstream call can fail before a usable response exists.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream request: {0}")]
    Request(String),

    #[error("{0}")]
    Connect(String),

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl UpstreamError {
    /// Value of the `error.type` attribute.
    pub fn error_type(&self) -> &'static str {
        match self {
            UpstreamError::Request(_) => "request_build_error",
            UpstreamError::Connect(_) => "connect_error",
            UpstreamError::Timeout { .. } => "timeout",
            UpstreamError::Body(_) => "body_read_error",
        }
    }
}

impl From<UpstreamError> for RelayError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Request(msg) => RelayError::Internal(msg),
            other => RelayError::UpstreamTransport(other.to_string()),
        }
    }
}

/// Ways building the client can fail.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),
}

/// A complete upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub url: String,
    pub status: StatusCode,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Classify the response: non-2xx is a transport fault, a 2xx body that
    /// is not JSON is a malformed upstream reply.
    pub fn into_json(self) -> Result<serde_json::Value, RelayError> {
        if !self.status.is_success() {
            return Err(RelayError::UpstreamTransport(format!(
                "receiver returned '{}' for url '{}'",
                self.status, self.url
            )));
        }
        serde_json::from_slice(&self.body).map_err(|e| RelayError::UpstreamMalformed(e.to_string()))
    }
}

/// Pooled client bound to one upstream base URL.
pub struct UpstreamClient {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    base: Url,
    timeout: Duration,
    meter: Arc<HttpMeter>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, meter: Arc<HttpMeter>) -> Result<Self, ClientBuildError> {
        let connector = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self {
            client,
            base: Url::parse(&config.receiver_url)?,
            timeout: Duration::from_secs(config.timeout_secs),
            meter,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `path` appended to the base URL's path. Query and fragment are kept.
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url
    }

    /// POST `payload` as JSON to `path` on the upstream.
    ///
    /// The CLIENT span is a child of the scope's active span and is the
    /// parent named in the outbound `traceparent`.
    pub async fn post_json<T: Serialize>(
        &self,
        scope: &TraceScope,
        path: &str,
        payload: &T,
        request_id: Option<&str>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.endpoint(path);
        let body = serde_json::to_vec(payload).map_err(|e| UpstreamError::Request(e.to_string()))?;
        let body_len = body.len() as u64;

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let server_address = url.host_str().unwrap_or_default().to_string();
        let server_port = url.port_or_known_default().unwrap_or(80);

        let span = scope.start_span(
            "POST",
            SpanKind::Client,
            vec![
                KeyValue::new(semconv::HTTP_REQUEST_METHOD, "POST"),
                KeyValue::new(semconv::URL_FULL, url.to_string()),
                KeyValue::new(semconv::SERVER_ADDRESS, server_address.clone()),
                KeyValue::new(semconv::SERVER_PORT, i64::from(server_port)),
            ],
        );

        scope.inject(request.headers_mut());
        if let Some(id) = request_id.and_then(|id| HeaderValue::from_str(id).ok()) {
            request.headers_mut().insert(X_REQUEST_ID, id);
        }

        let active = self.meter.start(
            ActiveRequestKey {
                server_address,
                server_port,
                method: "POST".to_string(),
                url_scheme: url.scheme().to_string(),
                route: path.to_string(),
            },
            Some(body_len),
        );

        let outcome = match time::timeout(self.timeout, self.exchange(request, url.as_str())).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }),
        };

        match &outcome {
            Ok(response) => {
                let status = response.status.as_u16();
                active.finish(status, Some(response.body.len() as u64));
                span.set_attribute(semconv::HTTP_RESPONSE_STATUS_CODE, i64::from(status));
                if status >= 400 {
                    span.set_attribute(semconv::ERROR_TYPE, status.to_string());
                    span.set_status(Status::error(format!("HTTP {}", status)));
                }
            }
            Err(e) => {
                active.finish(NO_RESPONSE_STATUS, None);
                span.set_attribute(semconv::ERROR_TYPE, e.error_type());
                span.record_exception(e.error_type(), &e.to_string());
            }
        }
        span.end();

        outcome
    }

    async fn exchange(&self, request: Request<Body>, url: &str) -> Result<UpstreamResponse, UpstreamError> {
        let response: hyper::Response<hyper::body::Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| UpstreamError::Connect(error_chain(&e)))?;
        let status = response.status();
        let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| UpstreamError::Body(error_chain(&e)))?;

        Ok(UpstreamResponse {
            url: url.to_string(),
            status,
            body,
        })
    }
}

/// Render an error with its sources, e.g. "client error (Connect): connection refused".
fn error_chain(e: &(dyn StdError + 'static)) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
