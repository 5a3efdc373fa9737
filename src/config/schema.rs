//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the catalog
//! service. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::export::{PipelineConfig, Resource};
use crate::observability::metrics::DEFAULT_LATENCY_BUCKETS;
use crate::resilience::retries::RetryPolicy;

/// Root configuration for the catalog service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Product store settings.
    pub database: DatabaseConfig,

    /// Simulated work in catalog operations.
    pub catalog: CatalogConfig,

    /// Tracing, metrics and export settings.
    pub telemetry: TelemetryConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Grace period for in-flight requests and the final export flush.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 10,
        }
    }
}

/// Product store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Value of the `db.system` span tag.
    pub system: String,

    /// Simulated round-trip latency per store call, in milliseconds.
    pub latency_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            system: "in_memory".to_string(),
            latency_ms: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Catalog operation timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Simulated work before listing products.
    pub list_delay_ms: u64,

    /// Simulated validation time when creating a product.
    pub create_delay_ms: u64,

    /// Duration of the slow endpoint.
    pub slow_delay_ms: u64,

    /// Delay before the error endpoint fails.
    pub error_delay_ms: u64,

    /// Maximum products returned by a list.
    pub recent_limit: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            list_delay_ms: 50,
            create_delay_ms: 20,
            slow_delay_ms: 2000,
            error_delay_ms: 100,
            recent_limit: 100,
        }
    }
}

impl CatalogConfig {
    pub fn list_delay(&self) -> Duration {
        Duration::from_millis(self.list_delay_ms)
    }

    pub fn create_delay(&self) -> Duration {
        Duration::from_millis(self.create_delay_ms)
    }

    pub fn slow_delay(&self) -> Duration {
        Duration::from_millis(self.slow_delay_ms)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_millis(self.error_delay_ms)
    }
}

/// Where finished spans and metric snapshots are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExporterKind {
    /// JSON over HTTP POST to `endpoint`.
    HttpJson,
    /// Structured log lines.
    Logging,
    /// Discard.
    None,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Record spans. Metrics are always collected.
    pub enabled: bool,

    /// `service.name` resource attribute.
    pub service_name: String,

    /// `service.version` resource attribute.
    pub service_version: String,

    /// `deployment.environment` resource attribute, if set.
    pub environment: Option<String>,

    pub exporter: ExporterKind,

    /// Collector base URL for the `http_json` exporter.
    pub endpoint: String,

    /// Per-request export timeout in milliseconds.
    pub export_timeout_ms: u64,

    /// Finished spans buffered before new ones are dropped.
    pub max_queue_size: usize,

    /// Spans per export call.
    pub max_batch_size: usize,

    /// Maximum age of a pending span batch in milliseconds.
    pub scheduled_delay_ms: u64,

    /// Interval between metric snapshot exports in seconds.
    pub metrics_interval_secs: u64,

    /// Retries after a failed export.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Attach statement text (`db.query.text`) to data spans.
    pub capture_db_statements: bool,

    /// Bucket upper bounds, in seconds, for every latency histogram.
    pub latency_buckets: Vec<f64>,

    /// Serve a Prometheus scrape endpoint.
    pub prometheus_enabled: bool,

    /// Prometheus scrape endpoint bind address.
    pub prometheus_address: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "catalog-api".to_string(),
            service_version: "1.0.0".to_string(),
            environment: None,
            exporter: ExporterKind::Logging,
            endpoint: "http://localhost:4318".to_string(),
            export_timeout_ms: 10_000,
            max_queue_size: 2048,
            max_batch_size: 512,
            scheduled_delay_ms: 5000,
            metrics_interval_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
            capture_db_statements: true,
            latency_buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
            prometheus_enabled: false,
            prometheus_address: "0.0.0.0:9464".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn resource(&self) -> Resource {
        let resource = Resource::new(self.service_name.clone(), self.service_version.clone());
        match &self.environment {
            Some(env) => resource.with_attribute("deployment.environment", env.clone()),
            None => resource,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_queue_size: self.max_queue_size,
            max_batch_size: self.max_batch_size,
            scheduled_delay: Duration::from_millis(self.scheduled_delay_ms),
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay_ms: self.retry_base_delay_ms,
                max_delay_ms: self.retry_max_delay_ms,
            },
        }
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides.
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
