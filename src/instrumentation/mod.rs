//! Automatic instrumentation at the process boundaries.
//!
//! # Data Flow
//! ```text
//! Inbound (inbound.rs):
//!     HTTP request → trace_http middleware
//!         → begin: Server span, parent from `traceparent`
//!         → enrich: standard HTTP tags
//!         → handler runs with the TraceScope in request extensions
//!         → end: status code, duration histogram, request counter
//!
//! Outbound (outbound.rs):
//!     store call → DataInstrumentation::instrument
//!         → begin: Client span named `<OPERATION> <collection>`
//!         → enrich: db.* tags, statement text when capture is on
//!         → end: duration histogram, exception on failure
//! ```
//!
//! # Design Decisions
//! - Adapters never alter the wrapped operation's result
//! - Metrics are recorded before the span ends so they carry an exemplar

pub mod inbound;
pub mod outbound;

use crate::observability::{Span, TraceScope};

pub use inbound::{
    trace_http, HttpServerInstrumentation, RecordedException, RequestMeta, ResponseMeta,
};
pub use outbound::{DataInstrumentation, DbOutcome, DbStatement};

/// Hooks around one boundary crossing.
///
/// `begin` opens the span on the caller's scope, `enrich` adds the standard
/// tags, `end` records the outcome and closes the span.
pub trait Instrumentation {
    /// Metadata known before the operation runs.
    type Request;
    /// Metadata known after it completes.
    type Outcome;

    fn begin(&self, scope: &TraceScope, request: &Self::Request) -> Span;

    fn enrich(&self, _span: &mut Span, _request: &Self::Request) {}

    fn end(
        &self,
        scope: &TraceScope,
        span: Span,
        request: &Self::Request,
        outcome: &Self::Outcome,
    );
}
