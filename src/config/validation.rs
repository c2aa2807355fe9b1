//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that the proxy and server URLs are usable
//! - Validate value ranges (timeouts > 0, sizes > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs after CLI overrides are merged, before anything touches the network

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::schema::{BridgeConfig, ProxySettings};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = ProxySettings::from_url(&config.proxy.url) {
        errors.push(e);
    }
    if let Err(e) = parse_server_url(&config.server.url) {
        errors.push(e);
    }

    let timeouts = [
        ("timeouts.request", config.timeouts.request),
        ("timeouts.detect", config.timeouts.detect),
        ("timeouts.read", config.timeouts.read),
    ];
    for (field, value) in timeouts {
        if value.is_zero() {
            errors.push(ValidationError::new(field, "timeout must be positive"));
        }
    }

    if config.relay.max_line_bytes == 0 {
        errors.push(ValidationError::new(
            "relay.max_line_bytes",
            "line limit must be positive",
        ));
    }
    if config.relay.queue_capacity == 0 {
        errors.push(ValidationError::new(
            "relay.queue_capacity",
            "queue capacity must be positive",
        ));
    }

    if let Err(e) = validate_log_level(&config.observability.log_level) {
        errors.push(e);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn parse_server_url(raw: &str) -> Result<url::Url, ValidationError> {
    let invalid = |message: String| ValidationError::new("server.url", message);

    if raw.trim().is_empty() {
        return Err(invalid("server URL is required (use --server)".into()));
    }
    let url = url::Url::parse(raw.trim())
        .map_err(|e| invalid(format!("invalid server URL format: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("server URL must start with http:// or https://".into()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("server URL must include host".into()));
    }
    Ok(url)
}

/// A bare level (`debug`) or a full `EnvFilter` directive list.
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let invalid = |detail: String| {
        ValidationError::new(
            "observability.log_level",
            format!("invalid log level '{}': {}", level, detail),
        )
    };

    if level.contains('=') || level.contains(',') {
        EnvFilter::try_new(level)
            .map(|_| ())
            .map_err(|e| invalid(e.to_string()))
    } else {
        level
            .parse::<LevelFilter>()
            .map(|_| ())
            .map_err(|_| invalid("expected trace, debug, info, warn, error or off".into()))
    }
}
