//! Exporters that ship span batches and metric snapshots.

use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::export::resource::Resource;
use crate::observability::metrics::MetricsSnapshot;
use crate::observability::trace::{SpanData, SpanProcessor};

/// Finished spans plus the resource they came from.
#[derive(Debug, Clone, Serialize)]
pub struct SpanBatch {
    pub resource: Resource,
    pub spans: Vec<SpanData>,
}

/// One registry snapshot plus the resource it came from.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsBatch {
    pub resource: Resource,
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
}

/// Error types for export operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExportError {
    /// Network-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Collector answered with a non-success status.
    #[error("collector returned HTTP {0}")]
    Status(u16),

    /// Export request timed out.
    #[error("export timed out")]
    Timeout,

    /// Exporter could not be constructed.
    #[error("invalid exporter configuration: {0}")]
    Config(String),
}

/// Destination for telemetry batches.
pub trait TelemetryExporter: Send + Sync {
    fn export_spans<'a>(&'a self, batch: &'a SpanBatch) -> BoxFuture<'a, Result<(), ExportError>>;

    fn export_metrics<'a>(
        &'a self,
        batch: &'a MetricsBatch,
    ) -> BoxFuture<'a, Result<(), ExportError>>;

    /// Exporter name for logs.
    fn name(&self) -> &str;
}

/// POSTs JSON batches to `{endpoint}/v1/traces` and `{endpoint}/v1/metrics`.
pub struct HttpJsonExporter {
    client: reqwest::Client,
    traces_url: Url,
    metrics_url: Url,
}

impl HttpJsonExporter {
    pub fn new(endpoint: &Url, timeout: Duration) -> Result<Self, ExportError> {
        let mut base = endpoint.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| ExportError::Config(format!("{}: {}", path, e)))
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            traces_url: join("v1/traces")?,
            metrics_url: join("v1/metrics")?,
        })
    }

    pub fn traces_url(&self) -> &Url {
        &self.traces_url
    }

    pub fn metrics_url(&self) -> &Url {
        &self.metrics_url
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &Url, body: &T) -> Result<(), ExportError> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExportError::Timeout
                } else {
                    ExportError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Status(status.as_u16()))
        }
    }
}

impl TelemetryExporter for HttpJsonExporter {
    fn export_spans<'a>(&'a self, batch: &'a SpanBatch) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(self.post(&self.traces_url, batch))
    }

    fn export_metrics<'a>(
        &'a self,
        batch: &'a MetricsBatch,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(self.post(&self.metrics_url, batch))
    }

    fn name(&self) -> &str {
        "http_json"
    }
}

/// Writes spans and metric summaries to the log stream.
pub struct LoggingExporter;

impl TelemetryExporter for LoggingExporter {
    fn export_spans<'a>(&'a self, batch: &'a SpanBatch) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            for span in &batch.spans {
                tracing::info!(
                    service = %batch.resource.service_name,
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    parent_span_id = ?span.parent_span_id.map(|id| id.to_string()),
                    name = %span.name,
                    duration_ms = span.duration().as_secs_f64() * 1000.0,
                    status = ?span.status,
                    "Span finished"
                );
            }
            Ok(())
        })
    }

    fn export_metrics<'a>(
        &'a self,
        batch: &'a MetricsBatch,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            tracing::info!(
                service = %batch.resource.service_name,
                instruments = batch.snapshot.metrics.len(),
                "Metric snapshot"
            );
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Keeps everything in memory; for tests and local inspection.
///
/// Also usable directly as a `SpanProcessor`, bypassing batching.
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    inner: Arc<Mutex<InMemoryState>>,
    failures_remaining: Arc<AtomicU32>,
}

#[derive(Default)]
struct InMemoryState {
    spans: Vec<SpanData>,
    span_resources: Vec<Resource>,
    metrics: Vec<MetricsBatch>,
    attempts: u32,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` export calls with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.state().spans.clone()
    }

    /// Resource of every span batch received, in order.
    pub fn span_resources(&self) -> Vec<Resource> {
        self.state().span_resources.clone()
    }

    pub fn metric_batches(&self) -> Vec<MetricsBatch> {
        self.state().metrics.clone()
    }

    /// Export calls received, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.spans.clear();
        state.span_resources.clear();
        state.metrics.clear();
    }

    fn state(&self) -> MutexGuard<'_, InMemoryState> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn should_fail(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl TelemetryExporter for InMemoryExporter {
    fn export_spans<'a>(&'a self, batch: &'a SpanBatch) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            self.state().attempts += 1;
            if self.should_fail() {
                return Err(ExportError::Transport("injected failure".to_string()));
            }
            let mut state = self.state();
            state.spans.extend(batch.spans.iter().cloned());
            state.span_resources.push(batch.resource.clone());
            Ok(())
        })
    }

    fn export_metrics<'a>(
        &'a self,
        batch: &'a MetricsBatch,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            self.state().attempts += 1;
            if self.should_fail() {
                return Err(ExportError::Transport("injected failure".to_string()));
            }
            self.state().metrics.push(batch.clone());
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

impl SpanProcessor for InMemoryExporter {
    fn on_end(&self, span: SpanData) {
        self.state().spans.push(span);
    }
}
