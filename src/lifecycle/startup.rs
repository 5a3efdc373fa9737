//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the telemetry stack: registry, default instruments, tracer,
//!   exporter, export pipeline, optional Prometheus endpoint
//! - Build the catalog and the HTTP server on top of it
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Without an exporter spans are not recorded; metrics still are
//! - The export pipeline has its own stop trigger, fired by
//!   `TelemetryRuntime::finish` once the server has drained

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

use crate::catalog::{CatalogService, ProductRepository, ProductStore};
use crate::config::{AppConfig, ExporterKind, TelemetryConfig};
use crate::export::{ExportPipeline, HttpJsonExporter, LoggingExporter, TelemetryExporter};
use crate::http::{AppState, HttpServer};
use crate::instrumentation::DataInstrumentation;
use crate::lifecycle::Shutdown;
use crate::observability::metrics::{init_prometheus, register_default_instruments};
use crate::observability::{MeterRegistry, Telemetry, TelemetryError, Tracer};

/// Telemetry handles plus the export worker.
pub struct TelemetryRuntime {
    pub telemetry: Telemetry,
    pub pipeline: Option<ExportPipeline>,
    worker: Option<JoinHandle<()>>,
    stop: Shutdown,
}

impl TelemetryRuntime {
    /// Stop the export worker and wait for its final flush.
    ///
    /// Call after the HTTP server has drained, so spans of requests that
    /// finished during the drain are still exported. Gives up after `grace`.
    pub async fn finish(self, grace: Duration) {
        self.stop.trigger();
        let Some(worker) = self.worker else {
            return;
        };
        match tokio::time::timeout(grace, worker).await {
            Ok(Ok(())) => tracing::info!("Telemetry flushed"),
            Ok(Err(e)) => tracing::error!(error = %e, "Export worker failed"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "Telemetry flush did not finish in time"
            ),
        }
    }
}

/// Build the exporter selected by configuration.
pub fn build_exporter(
    config: &TelemetryConfig,
) -> Result<Option<Arc<dyn TelemetryExporter>>, TelemetryError> {
    let exporter: Arc<dyn TelemetryExporter> = match config.exporter {
        ExporterKind::HttpJson => {
            let endpoint = Url::parse(&config.endpoint)
                .map_err(|e| TelemetryError::Exporter(format!("{}: {}", config.endpoint, e)))?;
            let exporter = HttpJsonExporter::new(&endpoint, config.export_timeout())
                .map_err(|e| TelemetryError::Exporter(e.to_string()))?;
            Arc::new(exporter)
        }
        ExporterKind::Logging => Arc::new(LoggingExporter),
        ExporterKind::None => return Ok(None),
    };
    Ok(Some(exporter))
}

/// Build telemetry with the configured exporter.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryRuntime, TelemetryError> {
    let exporter = build_exporter(config)?;
    if config.prometheus_enabled {
        let addr: SocketAddr = config.prometheus_address.parse().map_err(|_| {
            TelemetryError::Prometheus(format!("invalid address '{}'", config.prometheus_address))
        })?;
        init_prometheus(addr)?;
    }
    init_telemetry_with_exporter(config, exporter)
}

/// Build telemetry around a given exporter. Tests pass an in-memory one.
pub fn init_telemetry_with_exporter(
    config: &TelemetryConfig,
    exporter: Option<Arc<dyn TelemetryExporter>>,
) -> Result<TelemetryRuntime, TelemetryError> {
    let stop = Shutdown::new();
    let resource = config.resource();
    let meters = Arc::new(MeterRegistry::new());
    register_default_instruments(&meters, &config.latency_buckets)?;

    let (tracer, pipeline, worker) = match exporter {
        Some(exporter) => {
            let (pipeline, worker) = ExportPipeline::start(
                exporter,
                resource.clone(),
                meters.clone(),
                config.pipeline_config(),
                stop.clone(),
            );
            let tracer = if config.enabled {
                Tracer::new(Arc::new(pipeline.clone()))
            } else {
                Tracer::disabled()
            };
            (tracer, Some(pipeline), Some(worker))
        }
        None => (Tracer::disabled(), None, None),
    };

    tracing::info!(
        service = %resource.service_name,
        version = %resource.service_version,
        tracing_enabled = tracer.is_enabled(),
        exporter = ?config.exporter,
        "Telemetry initialized"
    );

    Ok(TelemetryRuntime {
        telemetry: Telemetry::new(tracer, meters, resource),
        pipeline,
        worker,
        stop,
    })
}

/// Wire the catalog onto the telemetry stack and build the HTTP server.
pub fn build_server(config: &AppConfig, runtime: &TelemetryRuntime) -> HttpServer {
    let telemetry = runtime.telemetry.clone();
    let store = Arc::new(ProductStore::new(config.database.latency()));
    let data = DataInstrumentation::new(
        telemetry.meters().clone(),
        config.database.system.clone(),
        config.telemetry.capture_db_statements,
    );
    let catalog = CatalogService::new(
        ProductRepository::new(store, data),
        telemetry.meters().clone(),
        config.catalog.clone(),
    );

    HttpServer::new(
        config,
        AppState {
            catalog,
            telemetry,
            pipeline: runtime.pipeline.clone(),
        },
    )
}
