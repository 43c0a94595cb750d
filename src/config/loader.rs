//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::{LogFormat, RelayConfig, ServiceRole};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value '{value}' for {var}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the effective configuration for `role`.
///
/// Layers: role defaults or `path`, then environment overrides, then validation.
pub fn load(role: ServiceRole, path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    load_with_env(role, path, |var| std::env::var(var).ok())
}

/// Same as [`load`], reading variables through `lookup`.
pub fn load_with_env<F>(
    role: ServiceRole,
    path: Option<&Path>,
    lookup: F,
) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => RelayConfig::for_role(role),
    };
    config.service.role = role;

    apply_env_overrides(&mut config, &lookup)?;

    if config.service.name.trim().is_empty() {
        config.service.name = role.default_service_name().to_string();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("OTEL_SERVICE_NAME") {
        config.service.name = v;
    }
    if let Some(v) = lookup("TENANT_ID") {
        config.service.tenant_id = v;
    }
    if let Some(v) = lookup("BIND_ADDRESS") {
        config.listener.bind_address = v;
    }
    if let Some(v) = lookup("RECEIVER_SERVICE_URL") {
        config.upstream.receiver_url = v;
    }
    if let Some(v) = parsed(lookup, "ERROR_RATE")? {
        config.faults.error_rate = v;
    }
    if let Some(v) = parsed(lookup, "LATENCY_MS")? {
        config.faults.latency_ms = v;
    }
    if let Some(v) = parsed(lookup, "PROCESSING_TIME_MS")? {
        config.faults.processing_time_ms = v;
    }
    if let Some(v) = parsed(lookup, "DB_ERROR_RATE")? {
        config.faults.db_error_rate = v;
    }
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.observability.otlp_endpoint = v;
    }
    if let Some(v) = lookup("NODE_IP") {
        config.observability.node_ip = v;
    }
    if let Some(v) = parsed(lookup, "OTLP_PORT")? {
        config.observability.otlp_port = v;
    }
    if let Some(v) = lookup("LOG_FORMAT") {
        config.observability.log_format = match v.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "" => LogFormat::Pretty,
            _ => return Err(ConfigError::Env { var: "LOG_FORMAT", value: v }),
        };
    }
    if let Some(v) = lookup("METRICS_ADDRESS") {
        config.observability.metrics_address = Some(v).filter(|s| !s.trim().is_empty());
    }
    Ok(())
}

fn parsed<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
