//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for both relay
//! services. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Collector used when neither an explicit endpoint nor a node address is set.
pub const DEFAULT_COLLECTOR_ENDPOINT: &str =
    "http://opentelemetry-collector.otel-collector.svc.cluster.local:4317";

/// Which side of the forwarding chain this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// Gateway that forwards `/send` to the receiver.
    #[default]
    Sender,
    /// Worker that serves `/process`.
    Receiver,
}

impl ServiceRole {
    /// Service name used when none is configured.
    pub fn default_service_name(self) -> &'static str {
        match self {
            ServiceRole::Sender => "sender-service",
            ServiceRole::Receiver => "receiver-service",
        }
    }
}

/// Root configuration for a relay service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Identity labels attached to every span, metric and log.
    pub service: ServiceConfig,

    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Where the sender forwards to.
    pub upstream: UpstreamConfig,

    /// Synthetic latency and error injection.
    pub faults: FaultConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl RelayConfig {
    /// Defaults for the given role, with the role-specific service name.
    pub fn for_role(role: ServiceRole) -> Self {
        let mut config = Self::default();
        config.service.role = role;
        config.service.name = role.default_service_name().to_string();
        config
    }
}

/// Service identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Role served by this process.
    pub role: ServiceRole,

    /// `service.name` label. Blank resolves to the role default at load time.
    pub name: String,

    /// `tenant.id` label. Not an isolation boundary.
    pub tenant_id: String,

    /// `service.version` resource attribute.
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            role: ServiceRole::Sender,
            name: String::new(),
            tenant_id: "default".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Upstream (receiver) settings used by the sender.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the receiver service.
    pub receiver_url: String,

    /// Bound on the whole outbound call, in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            receiver_url: "http://receiver-service:8000".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Fault and latency injection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Probability in [0, 1] that a request fails with a simulated error.
    pub error_rate: f64,

    /// Artificial latency added before the error check, in milliseconds.
    pub latency_ms: u64,

    /// Simulated dependency time on the receiver, in milliseconds.
    pub processing_time_ms: u64,

    /// Probability in [0, 1] that the receiver's database query fails.
    pub db_error_rate: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            error_rate: 0.0,
            latency_ms: 0,
            processing_time_ms: 100,
            db_error_rate: 0.0,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Explicit collector endpoint. Blank means unset.
    pub otlp_endpoint: String,

    /// Node address used to derive the collector endpoint.
    pub node_ip: String,

    /// Collector port paired with `node_ip`.
    pub otlp_port: u16,

    /// Log output format.
    pub log_format: LogFormat,

    /// Prometheus scrape listener; disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            node_ip: String::new(),
            otlp_port: 4317,
            log_format: LogFormat::Pretty,
            metrics_address: None,
        }
    }
}

impl ObservabilityConfig {
    /// Resolve the collector endpoint: explicit, then node address, then default.
    pub fn collector_endpoint(&self) -> String {
        let explicit = self.otlp_endpoint.trim();
        if !explicit.is_empty() {
            return explicit.to_string();
        }
        let node_ip = self.node_ip.trim();
        if !node_ip.is_empty() {
            return format!("http://{}:{}", node_ip, self.otlp_port);
        }
        DEFAULT_COLLECTOR_ENDPOINT.to_string()
    }
}
