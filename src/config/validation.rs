//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and that addresses
//! and URLs are usable. All problems are reported together, not just the first.

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::RelayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("faults.error_rate must be within [0, 1], got {0}")]
    ErrorRateOutOfRange(f64),

    #[error("faults.db_error_rate must be within [0, 1], got {0}")]
    DbErrorRateOutOfRange(f64),

    #[error("listener.bind_address '{0}' is not a socket address")]
    InvalidBindAddress(String),

    #[error("upstream.receiver_url '{url}' is invalid: {reason}")]
    InvalidReceiverUrl { url: String, reason: String },

    #[error("upstream.timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let rate = config.faults.error_rate;
    if !is_probability(rate) {
        errors.push(ValidationError::ErrorRateOutOfRange(rate));
    }

    let rate = config.faults.db_error_rate;
    if !is_probability(rate) {
        errors.push(ValidationError::DbErrorRateOutOfRange(rate));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if let Err(reason) = check_receiver_url(&config.upstream.receiver_url) {
        errors.push(ValidationError::InvalidReceiverUrl {
            url: config.upstream.receiver_url.clone(),
            reason,
        });
    }

    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    if let Some(addr) = &config.observability.metrics_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidMetricsAddress(addr.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_probability(rate: f64) -> bool {
    rate.is_finite() && (0.0..=1.0).contains(&rate)
}

fn check_receiver_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = RelayConfig::default();
        config.faults.error_rate = 1.5;
        config.listener.bind_address = "nowhere".into();
        config.upstream.receiver_url = "ftp://receiver".into();
        config.upstream.timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert_eq!(errors[0], ValidationError::ErrorRateOutOfRange(1.5));
        assert!(matches!(errors[2], ValidationError::InvalidReceiverUrl { .. }));
    }

    #[test]
    fn test_error_rate_rejects_nan() {
        let mut config = RelayConfig::default();
        config.faults.error_rate = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_db_error_rate_range() {
        let mut config = RelayConfig::default();
        config.faults.db_error_rate = 1.0;
        assert!(validate_config(&config).is_ok());

        config.faults.db_error_rate = -0.1;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::DbErrorRateOutOfRange(-0.1)]
        );
    }

    #[test]
    fn test_https_receiver_is_accepted() {
        let mut config = RelayConfig::default();
        config.upstream.receiver_url = "https://receiver.internal:8443/api".into();
        assert!(validate_config(&config).is_ok());
    }
}
