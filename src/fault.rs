//! Synthetic latency and error injection.
//!
//! Latency is applied first, inside an `artificial_latency` span; the error
//! roll happens afterwards and before any business step.

use opentelemetry::KeyValue;
use std::time::Duration;

use crate::config::FaultConfig;
use crate::http::response::RelayError;
use crate::observability::semconv;
use crate::observability::trace::{SpanKind, Status, TraceScope};

/// Status message put on the server span for injected failures.
pub const SIMULATED_ERROR: &str = "Simulated error";

/// Applies the configured faults to one request at a time.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    error_rate: f64,
    latency: Duration,
}

impl FaultInjector {
    pub fn new(config: &FaultConfig) -> Self {
        Self {
            error_rate: config.error_rate,
            latency: Duration::from_millis(config.latency_ms),
        }
    }

    /// Sleep for the configured latency, if any, inside its own span.
    pub async fn apply_latency(&self, scope: &TraceScope) {
        if self.latency.is_zero() {
            return;
        }
        let span = scope.start_span(
            "artificial_latency",
            SpanKind::Internal,
            vec![KeyValue::new(
                semconv::APP_LATENCY_MS,
                i64::try_from(self.latency.as_millis()).unwrap_or(i64::MAX),
            )],
        );
        tokio::time::sleep(self.latency).await;
        span.end();
    }

    /// Roll for a simulated failure.
    pub fn should_fail(&self) -> bool {
        self.error_rate > 0.0 && fastrand::f64() < self.error_rate
    }

    /// Roll for a simulated failure and, on a hit, mark the active span.
    ///
    /// `detail` is the message returned to the caller.
    pub fn check(&self, scope: &TraceScope, detail: &str) -> Result<(), RelayError> {
        if !self.should_fail() {
            return Ok(());
        }
        scope.set_status(Status::error(SIMULATED_ERROR));
        scope.set_attribute(semconv::ERROR_TYPE, "simulated_error");
        scope.set_attribute(semconv::ERROR_MESSAGE, "Simulated error for testing");
        Err(RelayError::Simulated(detail.to_string()))
    }
}
