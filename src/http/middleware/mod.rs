//! HTTP middleware installed around handler dispatch.

pub mod telemetry;

pub use telemetry::{telemetry_middleware, TelemetryState};
