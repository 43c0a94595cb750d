//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional) or role defaults
//!     → loader.rs (parse, apply environment overrides)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → cloned into the server state at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Environment variables win over the file

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load, load_with_env, ConfigError};
pub use schema::{
    FaultConfig, ListenerConfig, LogFormat, ObservabilityConfig, RelayConfig, ServiceConfig,
    ServiceRole, UpstreamConfig,
};
