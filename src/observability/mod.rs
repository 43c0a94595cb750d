//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Telemetry middleware, upstream client and handlers produce:
//!     → trace.rs (OpenTelemetry spans in a per-request TraceScope, W3C propagation)
//!     → metrics.rs (active-request gauges, duration and size histograms)
//!     → logging.rs (structured events correlated by trace/span id)
//!
//! Consumers:
//!     → SDK span exporter (logging in production, in-memory in tests)
//!     → metrics facade (Prometheus scrape listener, when configured)
//!     → stdout (pretty or JSON)
//! ```
//!
//! # Design Decisions
//! - Providers are built once at startup into a [`Telemetry`] handle and
//!   injected into the server state; nothing is read from globals
//! - Request ID and trace id flow through every log line

pub mod logging;
pub mod metrics;
pub mod semconv;
pub mod trace;

use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::Resource;
use std::sync::Arc;

use crate::config::RelayConfig;
use self::metrics::{FacadeSink, HttpMeter, HttpSide, InMemoryMetrics, MetricSink};
use self::trace::{InMemorySpanExporter, LoggingExporter, Tracer};

/// Tracer and meters shared by one service.
#[derive(Clone)]
pub struct Telemetry {
    pub tracer: Tracer,
    pub server: Arc<HttpMeter>,
    pub client: Arc<HttpMeter>,
}

impl Telemetry {
    pub fn new<E>(resource: Resource, exporter: E, sinks: Vec<Arc<dyn MetricSink>>) -> Self
    where
        E: SpanExporter + 'static,
    {
        Self {
            tracer: Tracer::new(resource, exporter),
            server: Arc::new(HttpMeter::new(HttpSide::Server, sinks.clone())),
            client: Arc::new(HttpMeter::new(HttpSide::Client, sinks)),
        }
    }

    /// Production wiring: spans to the log, metrics to the `metrics` facade.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(resource_for(config), LoggingExporter, vec![Arc::new(FacadeSink)])
    }

    /// Wiring that keeps every span and metric record in memory.
    pub fn in_memory(config: &RelayConfig) -> (Self, InMemorySpanExporter, Arc<InMemoryMetrics>) {
        let spans = InMemorySpanExporter::default();
        let metrics = Arc::new(InMemoryMetrics::new());
        let telemetry = Self::new(
            resource_for(config),
            spans.clone(),
            vec![metrics.clone(), Arc::new(FacadeSink)],
        );
        (telemetry, spans, metrics)
    }

    /// Flush span export before the process exits.
    pub fn shutdown(&self) {
        self.tracer.shutdown();
    }
}

fn resource_for(config: &RelayConfig) -> Resource {
    trace::resource(
        &config.service.name,
        &config.service.version,
        &config.service.tenant_id,
    )
}
