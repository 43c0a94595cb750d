//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Track in-flight HTTP requests per attribute key (server and client side)
//! - Record request duration and body-size histograms
//! - Forward every emission to the `metrics` facade (Prometheus when installed)
//!
//! # Metrics
//! - `http.{server,client}.request.duration` (histogram, seconds)
//! - `http.{server,client}.active_requests` (up/down gauge)
//! - `http.{server,client}.request.body.size` (histogram, bytes)
//! - `http.{server,client}.response.body.size` (histogram, bytes)
//!
//! # Design Decisions
//! - Active counts are atomics in a concurrent map; no cross-request locks.
//!   A key is dropped once its count returns to zero, so arbitrary paths and
//!   `Host` values never accumulate.
//! - Increment and decrement are tied to an RAII guard so they always pair
//! - Unknown body sizes are omitted, never estimated

use dashmap::DashMap;
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::{KeyValue, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use crate::observability::semconv;

/// Install the Prometheus recorder with a scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics exporter started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Kind of instrument a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Histogram,
    UpDownCounter,
}

/// One emitted measurement. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub name: &'static str,
    pub kind: InstrumentKind,
    pub value: f64,
    pub attributes: Vec<KeyValue>,
    pub timestamp: SystemTime,
}

impl MetricRecord {
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }
}

/// Destination for metric records.
pub trait MetricSink: Send + Sync {
    fn record(&self, record: &MetricRecord);
}

/// Forwards records to the global `metrics` recorder.
#[derive(Debug, Default)]
pub struct FacadeSink;

impl MetricSink for FacadeSink {
    fn record(&self, record: &MetricRecord) {
        let labels: Vec<Label> = record
            .attributes
            .iter()
            .map(|kv| Label::new(kv.key.as_str().to_owned(), kv.value.to_string()))
            .collect();
        match record.kind {
            InstrumentKind::Histogram => {
                metrics::histogram!(record.name, labels).record(record.value);
            }
            InstrumentKind::UpDownCounter => {
                metrics::gauge!(record.name, labels).increment(record.value);
            }
        }
    }
}

/// Append-only in-memory record list.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    records: Mutex<Vec<MetricRecord>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn records_named(&self, name: &str) -> Vec<MetricRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.name == name)
            .collect()
    }
}

impl MetricSink for InMemoryMetrics {
    fn record(&self, record: &MetricRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}

/// Server or client side of an HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpSide {
    Server,
    Client,
}

impl HttpSide {
    fn duration(self) -> &'static str {
        match self {
            HttpSide::Server => semconv::HTTP_SERVER_REQUEST_DURATION,
            HttpSide::Client => semconv::HTTP_CLIENT_REQUEST_DURATION,
        }
    }

    fn active_requests(self) -> &'static str {
        match self {
            HttpSide::Server => semconv::HTTP_SERVER_ACTIVE_REQUESTS,
            HttpSide::Client => semconv::HTTP_CLIENT_ACTIVE_REQUESTS,
        }
    }

    fn request_body_size(self) -> &'static str {
        match self {
            HttpSide::Server => semconv::HTTP_SERVER_REQUEST_BODY_SIZE,
            HttpSide::Client => semconv::HTTP_CLIENT_REQUEST_BODY_SIZE,
        }
    }

    fn response_body_size(self) -> &'static str {
        match self {
            HttpSide::Server => semconv::HTTP_SERVER_RESPONSE_BODY_SIZE,
            HttpSide::Client => semconv::HTTP_CLIENT_RESPONSE_BODY_SIZE,
        }
    }
}

/// Attribute key of the active-request gauge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveRequestKey {
    pub server_address: String,
    pub server_port: u16,
    pub method: String,
    pub url_scheme: String,
    pub route: String,
}

impl ActiveRequestKey {
    /// Attributes of the active-request gauge.
    pub fn attributes(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new(semconv::SERVER_ADDRESS, self.server_address.clone()),
            KeyValue::new(semconv::SERVER_PORT, i64::from(self.server_port)),
            KeyValue::new(semconv::HTTP_REQUEST_METHOD, self.method.clone()),
            KeyValue::new(semconv::URL_SCHEME, self.url_scheme.clone()),
            KeyValue::new(semconv::HTTP_ROUTE, self.route.clone()),
        ]
    }

    /// Attributes of the duration and body-size histograms.
    pub fn attributes_with_status(&self, status: u16) -> Vec<KeyValue> {
        vec![
            KeyValue::new(semconv::HTTP_REQUEST_METHOD, self.method.clone()),
            KeyValue::new(semconv::HTTP_RESPONSE_STATUS_CODE, i64::from(status)),
            KeyValue::new(semconv::SERVER_ADDRESS, self.server_address.clone()),
            KeyValue::new(semconv::SERVER_PORT, i64::from(self.server_port)),
            KeyValue::new(semconv::URL_SCHEME, self.url_scheme.clone()),
            KeyValue::new(semconv::HTTP_ROUTE, self.route.clone()),
        ]
    }
}

/// HTTP instruments for one side of an exchange.
pub struct HttpMeter {
    side: HttpSide,
    active: DashMap<ActiveRequestKey, AtomicI64>,
    sinks: Vec<Arc<dyn MetricSink>>,
}

impl HttpMeter {
    pub fn new(side: HttpSide, sinks: Vec<Arc<dyn MetricSink>>) -> Self {
        Self {
            side,
            active: DashMap::new(),
            sinks,
        }
    }

    pub fn side(&self) -> HttpSide {
        self.side
    }

    /// Current in-flight count for `key`.
    pub fn active_count(&self, key: &ActiveRequestKey) -> i64 {
        self.active
            .get(key)
            .map(|count| count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of keys with requests in flight.
    pub fn tracked_keys(&self) -> usize {
        self.active.len()
    }

    /// Mark a request as in flight. The returned guard decrements on finish or drop.
    pub fn start(self: &Arc<Self>, key: ActiveRequestKey, request_body_size: Option<u64>) -> ActiveRequestGuard {
        self.active
            .entry(key.clone())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::SeqCst);
        self.emit(self.side.active_requests(), InstrumentKind::UpDownCounter, 1.0, key.attributes());

        ActiveRequestGuard {
            meter: self.clone(),
            key,
            started: Instant::now(),
            request_body_size,
            released: false,
        }
    }

    fn release(&self, key: &ActiveRequestKey) {
        // Decrement under the shard lock so a concurrent `start` on the same
        // key either sees the entry or recreates it.
        self.active
            .remove_if(key, |_, count| count.fetch_sub(1, Ordering::SeqCst) == 1);
        self.emit(self.side.active_requests(), InstrumentKind::UpDownCounter, -1.0, key.attributes());
    }

    fn emit(&self, name: &'static str, kind: InstrumentKind, value: f64, attributes: Vec<KeyValue>) {
        let record = MetricRecord {
            name,
            kind,
            value,
            attributes,
            timestamp: SystemTime::now(),
        };
        for sink in &self.sinks {
            sink.record(&record);
        }
    }
}

/// One in-flight request on an [`HttpMeter`].
pub struct ActiveRequestGuard {
    meter: Arc<HttpMeter>,
    key: ActiveRequestKey,
    started: Instant,
    request_body_size: Option<u64>,
    released: bool,
}

impl ActiveRequestGuard {
    pub fn key(&self) -> &ActiveRequestKey {
        &self.key
    }

    /// Close the request: decrement the gauge, then record duration and sizes.
    pub fn finish(mut self, status: u16, response_body_size: Option<u64>) {
        self.release();

        let side = self.meter.side;
        let attributes = self.key.attributes_with_status(status);
        let elapsed = self.started.elapsed().as_secs_f64();
        self.meter
            .emit(side.duration(), InstrumentKind::Histogram, elapsed, attributes.clone());

        if let Some(size) = self.request_body_size.filter(|s| *s > 0) {
            self.meter
                .emit(side.request_body_size(), InstrumentKind::Histogram, size as f64, attributes.clone());
        }
        if let Some(size) = response_body_size.filter(|s| *s > 0) {
            self.meter
                .emit(side.response_body_size(), InstrumentKind::Histogram, size as f64, attributes);
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.meter.release(&self.key);
        }
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.release();
    }
}
