//! Receiver worker: `POST /process`.
//!
//! # Data Flow
//! ```text
//! forwarded envelope {request_id, tenant_id, sender, data}
//!     → artificial latency (optional)
//!     → simulated error roll (500 "Simulated processing error")
//!     → process_data span → database_query span (simulated dependency)
//!     → 200 with the processing result
//! ```
//!
//! A failed database query ends the request with 500
//! `Processing error: <cause>`, recorded on every open span.

use axum::{body::Bytes, extract::State, http::HeaderMap, Extension, Json};
use opentelemetry::KeyValue;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::FaultConfig;
use crate::fault::FaultInjector;
use crate::http::handlers::{json_object, resolve_request_id, str_field, ServiceInfo, UNKNOWN};
use crate::http::response::RelayError;
use crate::observability::semconv;
use crate::observability::trace::{SpanKind, Status, TraceScope};

/// Extra processing after the dependency call.
const POST_QUERY_WORK: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct ReceiverState {
    pub service: ServiceInfo,
    pub faults: FaultInjector,
    pub database: SimulatedDatabase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseResult {
    pub records: u32,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("simulated database query failed")]
    QueryFailed,
}

impl DatabaseError {
    /// Value of the `error.type` attribute.
    pub fn error_type(&self) -> &'static str {
        match self {
            DatabaseError::QueryFailed => "database_error",
        }
    }
}

/// Stand-in dependency: sleeps for the query time, then fails with
/// probability `error_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedDatabase {
    query_time: Duration,
    error_rate: f64,
}

impl SimulatedDatabase {
    pub fn new(config: &FaultConfig) -> Self {
        Self {
            query_time: Duration::from_millis(config.processing_time_ms),
            error_rate: config.db_error_rate,
        }
    }

    /// Run one query under a `database_query` CLIENT span.
    pub async fn query(&self, scope: &TraceScope, tenant_id: &str) -> Result<DatabaseResult, DatabaseError> {
        let span = scope.start_span(
            "database_query",
            SpanKind::Client,
            vec![
                KeyValue::new(semconv::DB_SYSTEM, "simulated"),
                KeyValue::new(semconv::DB_OPERATION, "select"),
                KeyValue::new(semconv::DB_NAME, "demo_db"),
                KeyValue::new(semconv::APP_TENANT_ID, tenant_id.to_string()),
            ],
        );

        tokio::time::sleep(self.query_time).await;

        if self.error_rate > 0.0 && fastrand::f64() < self.error_rate {
            let e = DatabaseError::QueryFailed;
            span.set_attribute(semconv::ERROR_TYPE, e.error_type());
            span.record_exception(e.error_type(), &e.to_string());
            span.in_scope(|| tracing::warn!(tenant.id = %tenant_id, error.message = %e, "Database query failed"));
            span.end();
            return Err(e);
        }

        let records: u32 = rand::thread_rng().gen_range(1..=10);
        span.set_attribute(semconv::APP_DB_RECORDS_COUNT, i64::from(records));
        span.in_scope(|| tracing::debug!(tenant.id = %tenant_id, db.records.count = records, "Database query completed"));
        span.end();

        Ok(DatabaseResult {
            records,
            status: "success".to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub status: String,
    pub request_id: String,
    pub tenant_id: String,
    pub sender: String,
    pub receiver: String,
    pub database_result: DatabaseResult,
    pub processing_time_seconds: f64,
}

/// `POST /process`
pub async fn process(
    State(state): State<ReceiverState>,
    Extension(scope): Extension<TraceScope>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProcessResponse>, RelayError> {
    let started = Instant::now();
    scope.set_attribute(semconv::APP_ENDPOINT_TYPE, "api");

    let envelope = json_object(&body).inspect_err(|e| {
        tracing::warn!(tenant.id = %state.service.tenant_id, error.message = %e, "Rejected request body");
    })?;
    let request_id = resolve_request_id(&envelope, &headers);
    let sender = str_field(&envelope, "sender").unwrap_or(UNKNOWN).to_string();
    let tenant_id = str_field(&envelope, "tenant_id")
        .unwrap_or(state.service.tenant_id.as_str())
        .to_string();

    scope.set_attribute(semconv::APP_TENANT_ID, tenant_id.clone());
    scope.set_attribute(semconv::APP_REQUEST_ID, request_id.clone());
    scope.set_attribute(semconv::APP_SENDER_SERVICE, sender.clone());

    tracing::info!(
        request.id = %request_id,
        sender.service = %sender,
        tenant.id = %tenant_id,
        "Received request for processing"
    );

    state.faults.apply_latency(&scope).await;

    if let Err(e) = state.faults.check(&scope, "Simulated processing error") {
        tracing::error!(
            request.id = %request_id,
            tenant.id = %tenant_id,
            "Simulated error occurred during processing"
        );
        return Err(e);
    }

    let span = scope.start_span(
        "process_data",
        SpanKind::Internal,
        vec![
            KeyValue::new(semconv::APP_REQUEST_ID, request_id.clone()),
            KeyValue::new(semconv::APP_TENANT_ID, tenant_id.clone()),
            KeyValue::new(semconv::APP_SENDER_SERVICE, sender.clone()),
        ],
    );

    let database_result = match span.instrument(state.database.query(&scope, &tenant_id)).await {
        Ok(result) => result,
        Err(e) => {
            let error = RelayError::Processing(e.to_string());
            let message = error.to_string();
            span.set_attribute(semconv::APP_PROCESSING_SUCCESS, false);
            span.record_exception(error.error_type(), &message);
            span.in_scope(|| {
                tracing::error!(
                    request.id = %request_id,
                    tenant.id = %tenant_id,
                    error.message = %message,
                    "Unexpected error during processing"
                )
            });
            span.end();
            scope.record_exception(error.error_type(), &message);
            return Err(error);
        }
    };
    span.instrument(tokio::time::sleep(POST_QUERY_WORK)).await;

    let processing_time_seconds = started.elapsed().as_secs_f64();
    span.set_attribute(semconv::APP_PROCESSING_SUCCESS, true);
    span.set_attribute(semconv::APP_PROCESSING_DURATION_SECONDS, processing_time_seconds);
    span.set_status(Status::Ok);
    span.end();
    scope.set_status(Status::Ok);

    tracing::info!(request.id = %request_id, tenant.id = %tenant_id, "Request processed successfully");
    Ok(Json(ProcessResponse {
        status: "processed".to_string(),
        request_id,
        tenant_id,
        sender,
        receiver: state.service.name.clone(),
        database_result,
        processing_time_seconds,
    }))
}
