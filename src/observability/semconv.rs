//! Semantic-convention names for metrics and span attributes.
//!
//! Instrument names and the standard attribute keys follow the OpenTelemetry
//! HTTP conventions; `app.*` keys are relay-specific.

// Server instruments
pub const HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";
pub const HTTP_SERVER_ACTIVE_REQUESTS: &str = "http.server.active_requests";
pub const HTTP_SERVER_REQUEST_BODY_SIZE: &str = "http.server.request.body.size";
pub const HTTP_SERVER_RESPONSE_BODY_SIZE: &str = "http.server.response.body.size";

// Client instruments
pub const HTTP_CLIENT_REQUEST_DURATION: &str = "http.client.request.duration";
pub const HTTP_CLIENT_ACTIVE_REQUESTS: &str = "http.client.active_requests";
pub const HTTP_CLIENT_REQUEST_BODY_SIZE: &str = "http.client.request.body.size";
pub const HTTP_CLIENT_RESPONSE_BODY_SIZE: &str = "http.client.response.body.size";

// HTTP attributes
pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";
pub const HTTP_ROUTE: &str = "http.route";
pub const SERVER_ADDRESS: &str = "server.address";
pub const SERVER_PORT: &str = "server.port";
pub const URL_SCHEME: &str = "url.scheme";
pub const URL_FULL: &str = "url.full";
pub const PEER_SERVICE: &str = "peer.service";

// Errors
pub const ERROR_TYPE: &str = "error.type";
pub const ERROR_MESSAGE: &str = "error.message";
pub const EXCEPTION_EVENT: &str = "exception";
pub const EXCEPTION_TYPE: &str = "exception.type";
pub const EXCEPTION_MESSAGE: &str = "exception.message";

// Simulated database
pub const DB_SYSTEM: &str = "db.system";
pub const DB_OPERATION: &str = "db.operation";
pub const DB_NAME: &str = "db.name";

// Resource
pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_VERSION: &str = "service.version";
pub const TENANT_ID: &str = "tenant.id";

// Application
pub const APP_ENDPOINT_TYPE: &str = "app.endpoint.type";
pub const APP_TENANT_ID: &str = "app.tenant.id";
pub const APP_REQUEST_ID: &str = "app.request.id";
pub const APP_SENDER_SERVICE: &str = "app.sender.service";
pub const APP_LATENCY_MS: &str = "app.latency.ms";
pub const APP_RECEIVER_RESPONSE_STATUS: &str = "app.receiver.response.status";
pub const APP_DB_RECORDS_COUNT: &str = "app.db.records.count";
pub const APP_PROCESSING_SUCCESS: &str = "app.processing.success";
pub const APP_PROCESSING_DURATION_SECONDS: &str = "app.processing.duration_seconds";
