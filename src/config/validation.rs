//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backend.url is required (set it in the config file or ROTKI_URL)")]
    MissingBackend,

    #[error("backend.url `{0}` is not an absolute http:// URL")]
    InvalidBackend(String),

    #[error("listener.bind_address `{0}` is not a socket address")]
    InvalidBindAddress(String),

    #[error("observability.metrics_address `{0}` is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("mock.tick_interval_ms must be greater than zero")]
    ZeroTickInterval,

    #[error("security.max_body_size must be greater than zero")]
    ZeroBodyLimit,
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let backend = config.backend.url.trim();
    if backend.is_empty() {
        errors.push(ValidationError::MissingBackend);
    } else {
        match Url::parse(backend) {
            Ok(url) if url.scheme() == "http" && url.host().is_some() => {}
            _ => errors.push(ValidationError::InvalidBackend(backend.to_string())),
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.mock.tick_interval_ms == 0 {
        errors.push(ValidationError::ZeroTickInterval);
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
