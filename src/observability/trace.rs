//! Distributed tracing support.
//!
//! # Responsibilities
//! - Build the OpenTelemetry tracer provider for one service
//! - Extract W3C trace context from incoming requests
//! - Propagate trace context to upstream requests
//! - Keep the per-request stack of active spans
//! - Correlate log events with the active span
//!
//! # Design Decisions
//! - The "current span" lives in an explicit [`TraceScope`] holding one
//!   `opentelemetry::Context` per open span. Scopes are never shared between
//!   requests and nothing is attached to the thread-local context.
//! - [`SpanGuard`] closes its span exactly once: on `end*` or on drop.
//! - Status is kept on the scope until the span ends. A span that ends
//!   without an explicit status is recorded as OK.
//! - Every span also opens a `tracing` span with its ids, so events emitted
//!   inside it carry the active `span_id`.

use axum::http::HeaderMap;
use futures_util::future::BoxFuture;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, TraceContextExt, TraceId, Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, Key, KeyValue, Value};
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::export::trace::{ExportResult, SpanExporter};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Config, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use std::borrow::Cow;
use std::future::{ready, Future};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::Instrument;

use crate::observability::semconv;

pub use opentelemetry::trace::{SpanKind, Status};
pub use opentelemetry_sdk::export::trace::SpanData;
pub use opentelemetry_sdk::testing::trace::InMemorySpanExporter;

/// W3C trace-context header name.
pub const TRACEPARENT: &str = "traceparent";

const INSTRUMENTATION_NAME: &str = "trace-relay";

/// Process-level labels stamped on every exported span.
pub fn resource(service_name: &str, service_version: &str, tenant_id: &str) -> Resource {
    Resource::new([
        KeyValue::new(semconv::SERVICE_NAME, service_name.to_string()),
        KeyValue::new(semconv::TENANT_ID, tenant_id.to_string()),
        KeyValue::new(semconv::SERVICE_VERSION, service_version.to_string()),
    ])
}

/// Extract the remote parent context from request headers.
///
/// Missing or invalid headers yield an empty context; the request then
/// starts a new trace.
pub fn extract_context(headers: &HeaderMap) -> Context {
    TraceContextPropagator::new().extract_with_context(&Context::new(), &HeaderExtractor(headers))
}

/// The remote span context named by `traceparent`, when valid.
pub fn extract_span_context(headers: &HeaderMap) -> Option<SpanContext> {
    let cx = extract_context(headers);
    let span_context = cx.span().span_context().clone();
    span_context.is_valid().then_some(span_context)
}

/// Emits one structured log event per finished span.
#[derive(Debug, Default)]
pub struct LoggingExporter;

impl SpanExporter for LoggingExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        for span in &batch {
            let status = match &span.status {
                Status::Error { description } => format!("error: {}", description),
                Status::Ok => "ok".to_string(),
                Status::Unset => "unset".to_string(),
            };
            let attributes = span
                .attributes
                .iter()
                .map(|kv| format!("{}={}", kv.key, kv.value))
                .collect::<Vec<_>>()
                .join(" ");
            let duration_ms = span
                .end_time
                .duration_since(span.start_time)
                .map(|d| d.as_secs_f64() * 1000.0)
                .unwrap_or_default();
            tracing::debug!(
                target: "trace_relay::spans",
                trace_id = %span.span_context.trace_id(),
                span_id = %span.span_context.span_id(),
                parent_span_id = %span.parent_span_id,
                span.name = %span.name,
                span.kind = ?span.span_kind,
                status = %status,
                duration_ms,
                attributes = %attributes,
                "Span finished"
            );
        }
        Box::pin(ready(Ok(())))
    }
}

/// Read access to exported spans, for tests and local inspection.
pub trait InMemorySpans {
    /// Every finished span, in finish order.
    fn finished_spans(&self) -> Vec<SpanData>;

    /// Finished spans with the given name.
    fn spans_named(&self, name: &str) -> Vec<SpanData> {
        self.finished_spans()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }
}

impl InMemorySpans for InMemorySpanExporter {
    fn finished_spans(&self) -> Vec<SpanData> {
        self.get_finished_spans().unwrap_or_default()
    }
}

/// Convenience accessors on exported spans.
pub trait SpanDataExt {
    fn attribute(&self, key: &str) -> Option<&Value>;
    fn trace_id(&self) -> TraceId;
    fn span_id(&self) -> SpanId;
    fn is_error(&self) -> bool;
    fn has_event(&self, name: &str) -> bool;
}

impl SpanDataExt for SpanData {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    fn trace_id(&self) -> TraceId {
        self.span_context.trace_id()
    }

    fn span_id(&self) -> SpanId {
        self.span_context.span_id()
    }

    fn is_error(&self) -> bool {
        matches!(self.status, Status::Error { .. })
    }

    fn has_event(&self, name: &str) -> bool {
        self.events.iter().any(|event| event.name == name)
    }
}

/// Creates per-request scopes on top of the SDK tracer provider.
#[derive(Clone, Debug)]
pub struct Tracer {
    provider: TracerProvider,
    tracer: opentelemetry_sdk::trace::Tracer,
}

impl Tracer {
    /// Every span is sampled and handed to `exporter` as soon as it ends.
    pub fn new<E>(resource: Resource, exporter: E) -> Self
    where
        E: SpanExporter + 'static,
    {
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter)
            .with_config(
                Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_resource(resource),
            )
            .build();
        let tracer = provider.tracer(INSTRUMENTATION_NAME);
        Self { provider, tracer }
    }

    /// Start a scope for one request, continuing the trace named by its headers.
    pub fn scope(&self, headers: &HeaderMap) -> TraceScope {
        self.scope_with_parent(extract_context(headers))
    }

    /// Start a scope under an explicit parent context.
    pub fn scope_with_parent(&self, parent: Context) -> TraceScope {
        TraceScope {
            tracer: self.tracer.clone(),
            inner: Arc::new(Mutex::new(ScopeState {
                parent,
                stack: Vec::new(),
            })),
        }
    }

    /// Flush and stop the provider.
    pub fn shutdown(&self) {
        if let Err(e) = self.provider.shutdown() {
            tracing::warn!(error = %e, "Tracer provider shutdown failed");
        }
    }
}

struct OpenSpan {
    cx: Context,
    status: Status,
    log_span: tracing::Span,
}

impl OpenSpan {
    fn span_id(&self) -> SpanId {
        self.cx.span().span_context().span_id()
    }
}

struct ScopeState {
    parent: Context,
    stack: Vec<OpenSpan>,
}

impl ScopeState {
    fn active_cx(&self) -> &Context {
        self.stack.last().map(|open| &open.cx).unwrap_or(&self.parent)
    }

    fn find_mut(&mut self, id: SpanId) -> Option<&mut OpenSpan> {
        self.stack.iter_mut().rev().find(|open| open.span_id() == id)
    }
}

/// The active-span stack of one request.
///
/// Cloning shares the same stack; clones stay inside the owning request task.
#[derive(Clone)]
pub struct TraceScope {
    tracer: opentelemetry_sdk::trace::Tracer,
    inner: Arc<Mutex<ScopeState>>,
}

impl TraceScope {
    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a span as a child of the active span and make it active.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> SpanGuard {
        let name = name.into();
        let mut state = self.lock();
        let parent_cx = state.active_cx().clone();

        let span = self
            .tracer
            .span_builder(name.clone())
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, &parent_cx);
        let span_context = span.span_context().clone();

        let log_span = match state.stack.last() {
            Some(parent) => tracing::info_span!(
                parent: &parent.log_span,
                "span",
                otel.name = %name,
                trace_id = %span_context.trace_id(),
                span_id = %span_context.span_id(),
            ),
            None => tracing::info_span!(
                "span",
                otel.name = %name,
                trace_id = %span_context.trace_id(),
                span_id = %span_context.span_id(),
            ),
        };

        state.stack.push(OpenSpan {
            cx: parent_cx.with_span(span),
            status: Status::Unset,
            log_span: log_span.clone(),
        });

        SpanGuard {
            scope: self.clone(),
            span_context,
            log_span,
            ended: false,
        }
    }

    /// Context of the active span, or the remote parent when none is open.
    pub fn current_context(&self) -> Option<SpanContext> {
        let state = self.lock();
        let span_context = state.active_cx().span().span_context().clone();
        span_context.is_valid().then_some(span_context)
    }

    /// Set an attribute on the active span.
    pub fn set_attribute(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let state = self.lock();
        if let Some(open) = state.stack.last() {
            open.cx.span().set_attribute(KeyValue::new(key, value));
        }
    }

    /// Set the status of the active span.
    pub fn set_status(&self, status: Status) {
        if let Some(open) = self.lock().stack.last_mut() {
            open.status = status;
        }
    }

    /// Record an error on the active span: exception event plus ERROR status.
    pub fn record_exception(&self, error_type: &str, message: &str) {
        if let Some(open) = self.lock().stack.last_mut() {
            mark_exception(open, error_type, message);
        }
    }

    /// Write the active context as `traceparent`.
    pub fn inject(&self, headers: &mut HeaderMap) {
        let cx = self.lock().active_cx().clone();
        TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(headers));
    }

    fn finish(&self, id: SpanId, unwinding: bool) {
        let open = {
            let mut state = self.lock();
            let Some(pos) = state.stack.iter().rposition(|open| open.span_id() == id) else {
                return;
            };
            state.stack.remove(pos)
        };

        let status = match open.status {
            Status::Unset if unwinding => Status::error("panicked"),
            Status::Unset => Status::Ok,
            status => status,
        };
        let span = open.cx.span();
        span.set_status(status);
        span.end();
    }
}

fn mark_exception(open: &mut OpenSpan, error_type: &str, message: &str) {
    open.cx.span().add_event(
        semconv::EXCEPTION_EVENT,
        vec![
            KeyValue::new(semconv::EXCEPTION_TYPE, error_type.to_string()),
            KeyValue::new(semconv::EXCEPTION_MESSAGE, message.to_string()),
        ],
    );
    open.status = Status::error(message.to_string());
}

/// Handle to one open span. Ends the span when consumed or dropped.
pub struct SpanGuard {
    scope: TraceScope,
    span_context: SpanContext,
    log_span: tracing::Span,
    ended: bool,
}

impl SpanGuard {
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    pub fn span_id(&self) -> SpanId {
        self.span_context.span_id()
    }

    pub fn trace_id(&self) -> TraceId {
        self.span_context.trace_id()
    }

    /// Log span of this span; events inside it carry its ids.
    pub fn log_span(&self) -> &tracing::Span {
        &self.log_span
    }

    /// Run `f` with this span's ids on every log event.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.log_span.in_scope(f)
    }

    /// Run `future` with this span's ids on every log event.
    pub fn instrument<F: Future>(&self, future: F) -> tracing::instrument::Instrumented<F> {
        future.instrument(self.log_span.clone())
    }

    /// Set an attribute on this span, active or not.
    pub fn set_attribute(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let mut state = self.scope.lock();
        if let Some(open) = state.find_mut(self.span_id()) {
            open.cx.span().set_attribute(KeyValue::new(key, value));
        }
    }

    /// Status recorded so far on this span.
    pub fn status(&self) -> Status {
        let mut state = self.scope.lock();
        state
            .find_mut(self.span_id())
            .map(|open| open.status.clone())
            .unwrap_or_default()
    }

    pub fn set_status(&self, status: Status) {
        if let Some(open) = self.scope.lock().find_mut(self.span_id()) {
            open.status = status;
        }
    }

    pub fn record_exception(&self, error_type: &str, message: &str) {
        if let Some(open) = self.scope.lock().find_mut(self.span_id()) {
            mark_exception(open, error_type, message);
        }
    }

    /// Close the span. Unset status becomes OK.
    pub fn end(mut self) {
        self.close();
    }

    /// Close the span, recording the error if the step failed.
    pub fn end_with_result<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        if let Err(e) = result {
            self.record_exception(std::any::type_name::<E>(), &e.to_string());
        }
        self.end();
    }

    fn close(&mut self) {
        if !self.ended {
            self.ended = true;
            self.scope.finish(self.span_id(), std::thread::panicking());
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.close();
    }
}
