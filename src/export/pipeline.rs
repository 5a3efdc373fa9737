//! Batching export pipeline.
//!
//! # Responsibilities
//! - Accept finished spans from request tasks without blocking them
//! - Batch spans by size and age, snapshot metrics periodically
//! - Attach the resource descriptor to every batch
//! - Retry failed exports a bounded number of times, then drop
//!
//! # Design Decisions
//! - Bounded queue; when it is full the span is dropped and counted
//! - A single background task owns the exporter
//! - Delivery is at-most-once
//! - Shutdown flushes the pending batch and a final metric snapshot

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::export::exporter::{MetricsBatch, SpanBatch, TelemetryExporter};
use crate::export::resource::Resource;
use crate::lifecycle::Shutdown;
use crate::observability::metrics::MeterRegistry;
use crate::observability::trace::{SpanData, SpanProcessor};
use crate::resilience::retries::{retry_with_backoff, RetryPolicy};

/// Batching and retry settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Spans buffered before new ones are dropped.
    pub max_queue_size: usize,
    /// Spans per export call.
    pub max_batch_size: usize,
    /// Maximum age of a pending batch.
    pub scheduled_delay: Duration,
    /// Interval between metric snapshots.
    pub metrics_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
            metrics_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Default)]
struct PipelineStats {
    spans_queued: AtomicU64,
    spans_dropped: AtomicU64,
    spans_exported: AtomicU64,
    batches_exported: AtomicU64,
    metric_snapshots_exported: AtomicU64,
    export_failures: AtomicU64,
}

/// Point-in-time pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub spans_queued: u64,
    pub spans_dropped: u64,
    pub spans_exported: u64,
    pub batches_exported: u64,
    pub metric_snapshots_exported: u64,
    pub export_failures: u64,
}

/// Handle used by the tracer to submit finished spans. Cheap to clone.
#[derive(Clone)]
pub struct ExportPipeline {
    sender: mpsc::Sender<SpanData>,
    stats: Arc<PipelineStats>,
}

impl ExportPipeline {
    /// Spawn the export worker.
    ///
    /// The worker stops when `shutdown` fires or every handle is dropped,
    /// flushing what it holds first. Await the returned handle to wait for
    /// the final flush.
    pub fn start(
        exporter: Arc<dyn TelemetryExporter>,
        resource: Resource,
        meters: Arc<MeterRegistry>,
        config: PipelineConfig,
        shutdown: Shutdown,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.max_queue_size.max(1));
        let stats = Arc::new(PipelineStats::default());

        tracing::info!(
            exporter = exporter.name(),
            service = %resource.service_name,
            max_batch_size = config.max_batch_size,
            "Export pipeline starting"
        );

        let worker = Worker {
            receiver,
            exporter,
            resource,
            meters,
            batch: Vec::with_capacity(config.max_batch_size),
            config,
            stats: stats.clone(),
        };
        let handle = tokio::spawn(worker.run(shutdown));

        (Self { sender, stats }, handle)
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStatsSnapshot {
            spans_queued: load(&self.stats.spans_queued),
            spans_dropped: load(&self.stats.spans_dropped),
            spans_exported: load(&self.stats.spans_exported),
            batches_exported: load(&self.stats.batches_exported),
            metric_snapshots_exported: load(&self.stats.metric_snapshots_exported),
            export_failures: load(&self.stats.export_failures),
        }
    }
}

impl SpanProcessor for ExportPipeline {
    fn on_end(&self, span: SpanData) {
        match self.sender.try_send(span) {
            Ok(()) => {
                self.stats.spans_queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(span)) => {
                self.stats.spans_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(span = %span.name, "Export queue full, dropping span");
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.spans_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

struct Worker {
    receiver: mpsc::Receiver<SpanData>,
    exporter: Arc<dyn TelemetryExporter>,
    resource: Resource,
    meters: Arc<MeterRegistry>,
    batch: Vec<SpanData>,
    config: PipelineConfig,
    stats: Arc<PipelineStats>,
}

impl Worker {
    async fn run(mut self, shutdown: Shutdown) {
        let delay = self.config.scheduled_delay.max(Duration::from_millis(1));
        let mut flush_tick = time::interval_at(Instant::now() + delay, delay);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let period = self.config.metrics_interval.max(Duration::from_millis(1));
        let mut metrics_tick = time::interval_at(Instant::now() + period, period);
        metrics_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(span) => {
                        self.batch.push(span);
                        if self.batch.len() >= self.config.max_batch_size {
                            self.flush_spans().await;
                        }
                    }
                    None => break,
                },
                _ = flush_tick.tick() => self.flush_spans().await,
                _ = metrics_tick.tick() => self.export_metrics().await,
                _ = shutdown.signalled() => {
                    tracing::info!("Export pipeline received shutdown signal");
                    break;
                }
            }
        }

        self.receiver.close();
        while let Ok(span) = self.receiver.try_recv() {
            self.batch.push(span);
            if self.batch.len() >= self.config.max_batch_size {
                self.flush_spans().await;
            }
        }
        self.flush_spans().await;
        self.export_metrics().await;
        tracing::info!("Export pipeline stopped");
    }

    async fn flush_spans(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let batch = SpanBatch {
            resource: self.resource.clone(),
            spans: std::mem::take(&mut self.batch),
        };
        let count = batch.spans.len() as u64;
        let exporter = &self.exporter;
        let batch_ref = &batch;

        let outcome = retry_with_backoff(self.config.retry, "export_spans", || {
            exporter.export_spans(batch_ref)
        })
        .await;

        match outcome.result {
            Ok(()) => {
                self.stats.spans_exported.fetch_add(count, Ordering::Relaxed);
                self.stats.batches_exported.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.export_failures.fetch_add(1, Ordering::Relaxed);
                self.stats.spans_dropped.fetch_add(count, Ordering::Relaxed);
                tracing::warn!(
                    exporter = self.exporter.name(),
                    spans = count,
                    attempts = outcome.attempts,
                    error = %e,
                    "Dropping span batch after failed export"
                );
            }
        }
    }

    async fn export_metrics(&mut self) {
        let batch = MetricsBatch {
            resource: self.resource.clone(),
            snapshot: self.meters.snapshot(),
        };
        let exporter = &self.exporter;
        let batch_ref = &batch;

        let outcome = retry_with_backoff(self.config.retry, "export_metrics", || {
            exporter.export_metrics(batch_ref)
        })
        .await;

        match outcome.result {
            Ok(()) => {
                self.stats
                    .metric_snapshots_exported
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.export_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    exporter = self.exporter.name(),
                    attempts = outcome.attempts,
                    error = %e,
                    "Dropping metric snapshot after failed export"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::exporter::InMemoryExporter;
    use crate::observability::trace::Tracer;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            max_queue_size: 64,
            max_batch_size: 4,
            scheduled_delay: Duration::from_millis(20),
            metrics_interval: Duration::from_secs(3600),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
        }
    }

    fn start(
        exporter: &InMemoryExporter,
        config: PipelineConfig,
        shutdown: &Shutdown,
    ) -> (ExportPipeline, JoinHandle<()>) {
        ExportPipeline::start(
            Arc::new(exporter.clone()),
            Resource::new("catalog-api", "1.0.0"),
            Arc::new(MeterRegistry::new()),
            config,
            shutdown.clone(),
        )
    }

    fn emit(pipeline: &ExportPipeline, count: usize) {
        let tracer = Tracer::new(Arc::new(pipeline.clone()));
        let scope = tracer.scope();
        for i in 0..count {
            let mut span = scope.start_span(format!("span-{}", i));
            span.end();
        }
    }

    #[tokio::test]
    async fn test_batches_carry_resource() {
        let exporter = InMemoryExporter::new();
        let shutdown = Shutdown::new();
        let (pipeline, handle) = start(&exporter, fast_config(), &shutdown);

        emit(&pipeline, 10);
        shutdown.trigger();
        handle.await.unwrap();

        assert_eq!(exporter.spans().len(), 10);
        let resources = exporter.span_resources();
        assert!(resources.len() >= 3, "10 spans in batches of at most 4");
        assert!(resources
            .iter()
            .all(|r| r.service_name == "catalog-api" && r.service_version == "1.0.0"));

        let stats = pipeline.stats();
        assert_eq!(stats.spans_exported, 10);
        assert_eq!(stats.spans_dropped, 0);
        assert_eq!(exporter.metric_batches().len(), 1, "final snapshot on shutdown");
    }

    #[tokio::test]
    async fn test_scheduled_flush_without_full_batch() {
        let exporter = InMemoryExporter::new();
        let shutdown = Shutdown::new();
        let (pipeline, _handle) = start(&exporter, fast_config(), &shutdown);

        emit(&pipeline, 1);
        for _ in 0..100 {
            if !exporter.spans().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(exporter.spans().len(), 1);
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_failed_export_retried_then_succeeds() {
        let exporter = InMemoryExporter::new();
        exporter.fail_next(2);
        let shutdown = Shutdown::new();
        let (pipeline, handle) = start(&exporter, fast_config(), &shutdown);

        emit(&pipeline, 2);
        shutdown.trigger();
        handle.await.unwrap();

        assert_eq!(exporter.spans().len(), 2);
        assert_eq!(pipeline.stats().export_failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_batch() {
        let exporter = InMemoryExporter::new();
        exporter.fail_next(100);
        let shutdown = Shutdown::new();
        let (pipeline, handle) = start(&exporter, fast_config(), &shutdown);

        emit(&pipeline, 3);
        shutdown.trigger();
        handle.await.unwrap();

        assert!(exporter.spans().is_empty());
        let stats = pipeline.stats();
        assert_eq!(stats.spans_dropped, 3);
        assert!(stats.export_failures >= 1);
        // three attempts per export call: initial + two retries
        assert_eq!(exporter.attempts() % 3, 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let exporter = InMemoryExporter::new();
        let shutdown = Shutdown::new();
        let config = PipelineConfig {
            max_queue_size: 2,
            max_batch_size: 1000,
            scheduled_delay: Duration::from_secs(3600),
            ..fast_config()
        };
        let (pipeline, handle) = start(&exporter, config, &shutdown);

        // Synchronous burst: the worker cannot drain between sends.
        emit(&pipeline, 50);
        let stats = pipeline.stats();
        assert!(stats.spans_dropped > 0);
        assert_eq!(stats.spans_queued + stats.spans_dropped, 50);

        shutdown.trigger();
        handle.await.unwrap();
        assert_eq!(exporter.spans().len() as u64, stats.spans_queued);
    }

    #[tokio::test]
    async fn test_spans_after_stop_are_dropped() {
        let exporter = InMemoryExporter::new();
        let shutdown = Shutdown::new();
        let (pipeline, handle) = start(&exporter, fast_config(), &shutdown);

        shutdown.trigger();
        handle.await.unwrap();

        emit(&pipeline, 1);
        assert_eq!(pipeline.stats().spans_dropped, 1);
    }
}
