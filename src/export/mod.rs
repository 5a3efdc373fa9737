//! Telemetry export.
//!
//! # Data Flow
//! ```text
//! Span ends → ExportPipeline (bounded queue)
//!     → batch by size / age → TelemetryExporter::export_spans
//! Metric interval tick → MeterRegistry::snapshot
//!     → TelemetryExporter::export_metrics
//! ```
//! Every batch carries the process `Resource`.

pub mod exporter;
pub mod pipeline;
pub mod resource;

pub use exporter::{
    ExportError, HttpJsonExporter, InMemoryExporter, LoggingExporter, MetricsBatch,
    SpanBatch, TelemetryExporter,
};
pub use pipeline::{ExportPipeline, PipelineConfig, PipelineStatsSnapshot};
pub use resource::Resource;
