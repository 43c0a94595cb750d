//! Response handling and error mapping.
//!
//! # Responsibilities
//! - Define the relay's fault taxonomy
//! - Map each fault kind to its HTTP status (pure function)
//! - Render faults as `{"detail": ...}` without internals
//!
//! # Design Decisions
//! - A gateway must let its caller tell "I am broken" (500) from "my
//!   upstream is broken" (502); malformed upstream bodies are upstream faults

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Faults that end a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Injected by configuration.
    #[error("{0}")]
    Simulated(String),

    /// Upstream call failed to complete or returned a non-2xx status.
    #[error("Receiver service error: {0}")]
    UpstreamTransport(String),

    /// Upstream returned 2xx with a body that is not JSON.
    #[error("Invalid JSON response from receiver: {0}")]
    UpstreamMalformed(String),

    /// The inbound request body could not be decoded.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// Any other local failure.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Local failure inside the receiver's processing step.
    #[error("Processing error: {0}")]
    Processing(String),
}

impl RelayError {
    /// HTTP status surfaced to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Simulated(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamMalformed(_) => StatusCode::BAD_GATEWAY,
            RelayError::InvalidBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `error.type` span attribute.
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::Simulated(_) => "simulated_error",
            RelayError::UpstreamTransport(_) => "upstream_transport_error",
            RelayError::UpstreamMalformed(_) => "json_decode_error",
            RelayError::InvalidBody(_) => "invalid_request_body",
            RelayError::Internal(_) => "internal_error",
            RelayError::Processing(_) => "processing_error",
        }
    }
}

/// Error body returned to callers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}
