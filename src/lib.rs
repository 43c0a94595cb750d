//! trace-relay: a sender/receiver service pair that forwards HTTP requests
//! across a service boundary while emitting correlated traces, metrics and logs.

pub mod config;
pub mod fault;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::{RelayConfig, ServiceRole};
pub use http::RelayServer;
pub use lifecycle::Shutdown;
pub use observability::Telemetry;
