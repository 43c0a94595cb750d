//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers)
//!     → request.rs (request ID, per-request context)
//!     → middleware/telemetry.rs (server span, gauges, histograms)
//!     → handlers.rs | sender.rs | receiver.rs
//!         → client.rs (instrumented upstream call, sender only)
//!     → response.rs (fault → status + JSON detail)
//! ```

pub mod client;
pub mod handlers;
pub mod middleware;
pub mod receiver;
pub mod request;
pub mod response;
pub mod sender;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::RelayError;
pub use server::{RelayServer, ServerError};
