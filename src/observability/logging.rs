//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber
//! - Select pretty or JSON output
//! - Correlate request logs with trace context
//!
//! # Design Decisions
//! - Log level comes from `RUST_LOG`, with a relay-focused default
//! - Every request runs inside a `request` span carrying the service labels.
//!   Each trace span opened by the request nests a `span` span carrying its
//!   `trace_id` and `span_id`, so an event names the span active when it was
//!   emitted. JSON output reports it under `span`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "trace_relay=info,tower_http=info";

/// Install the global subscriber. Safe to call once per process.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}

/// Span wrapping one request; its fields label every event inside.
pub fn request_span(service_name: &str, tenant_id: &str) -> tracing::Span {
    tracing::info_span!("request", service.name = %service_name, tenant.id = %tenant_id)
}
