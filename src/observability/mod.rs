//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request handling produces:
//!     → trace.rs (spans on a per-request TraceScope)
//!     → metrics.rs (counters, histograms)
//!         → exemplar.rs (active span → exemplar on the data point)
//!     → logging.rs (structured log events)
//!
//! Consumers:
//!     → export pipeline (span batches + metric snapshots)
//!     → Prometheus scrape endpoint (optional)
//!     → log output (stdout)
//! ```
//!
//! # Design Decisions
//! - One `Telemetry` value per process, constructed at startup and passed
//!   explicitly into every request handler
//! - Telemetry never fails a business operation

pub mod error;
pub mod exemplar;
pub mod logging;
pub mod metrics;
pub mod trace;

use std::sync::Arc;

pub use self::error::TelemetryError;
pub use self::exemplar::Exemplar;
pub use self::metrics::{MeterRegistry, MetricsSnapshot, Observation};
pub use self::trace::{
    AttributeValue, ReportableError, Span, SpanContext, SpanData, SpanId, SpanKind, SpanStatus,
    TraceId, TraceScope, Tracer,
};

use crate::export::Resource;

/// Process-wide observability context: tracer, instruments and resource.
#[derive(Clone)]
pub struct Telemetry {
    tracer: Tracer,
    meters: Arc<MeterRegistry>,
    resource: Resource,
}

impl Telemetry {
    pub fn new(tracer: Tracer, meters: Arc<MeterRegistry>, resource: Resource) -> Self {
        Self {
            tracer,
            meters,
            resource,
        }
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn meters(&self) -> &Arc<MeterRegistry> {
        &self.meters
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// New per-request scope.
    pub fn scope(&self) -> TraceScope {
        self.tracer.scope()
    }
}
