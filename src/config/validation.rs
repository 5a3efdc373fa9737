//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, batch sizes, bucket bounds)
//! - Validate addresses and the collector endpoint
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::{AppConfig, ExporterKind};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// One rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint and collect all violations.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.catalog.recent_limit == 0 {
        errors.push(ValidationError::new("catalog.recent_limit", "must be > 0"));
    }

    let telemetry = &config.telemetry;
    if telemetry.service_name.trim().is_empty() {
        errors.push(ValidationError::new("telemetry.service_name", "must not be empty"));
    }
    if telemetry.exporter == ExporterKind::HttpJson {
        match Url::parse(&telemetry.endpoint) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::new(
                "telemetry.endpoint",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                "telemetry.endpoint",
                format!("'{}': {}", telemetry.endpoint, e),
            )),
        }
    }
    if telemetry.max_queue_size == 0 {
        errors.push(ValidationError::new("telemetry.max_queue_size", "must be > 0"));
    }
    if telemetry.max_batch_size == 0 {
        errors.push(ValidationError::new("telemetry.max_batch_size", "must be > 0"));
    } else if telemetry.max_batch_size > telemetry.max_queue_size {
        errors.push(ValidationError::new(
            "telemetry.max_batch_size",
            "must not exceed max_queue_size",
        ));
    }
    if telemetry.scheduled_delay_ms == 0 {
        errors.push(ValidationError::new("telemetry.scheduled_delay_ms", "must be > 0"));
    }
    if telemetry.metrics_interval_secs == 0 {
        errors.push(ValidationError::new("telemetry.metrics_interval_secs", "must be > 0"));
    }
    if telemetry.retry_base_delay_ms > telemetry.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "telemetry.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }

    let buckets = &telemetry.latency_buckets;
    if buckets.is_empty() {
        errors.push(ValidationError::new("telemetry.latency_buckets", "must not be empty"));
    } else if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
        errors.push(ValidationError::new(
            "telemetry.latency_buckets",
            "bounds must be finite and positive",
        ));
    } else if buckets.windows(2).any(|w| w[0] >= w[1]) {
        errors.push(ValidationError::new(
            "telemetry.latency_buckets",
            "bounds must be strictly ascending",
        ));
    }

    if telemetry.prometheus_enabled
        && telemetry.prometheus_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "telemetry.prometheus_address",
            format!("'{}' is not a socket address", telemetry.prometheus_address),
        ));
    }

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "logging.level",
            format!("expected one of {}", LOG_LEVELS.join(", ")),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
