//! Exemplar correlation between metric observations and spans.

use serde::Serialize;
use std::time::SystemTime;

use crate::observability::trace::{serialize_unix_nanos, SpanContext, SpanId, TraceId};

/// Link from a metric data point back to the span that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exemplar {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub value: f64,
    #[serde(rename = "time_unix_nano", serialize_with = "serialize_unix_nanos")]
    pub timestamp: SystemTime,
}

/// Build the exemplar for an observation recorded while `active` was the
/// active span. No active span, no exemplar.
pub fn exemplar_for(active: Option<SpanContext>, value: f64, time: SystemTime) -> Option<Exemplar> {
    active.map(|ctx| Exemplar {
        trace_id: ctx.trace_id,
        span_id: ctx.span_id,
        value,
        timestamp: time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exemplar_requires_active_span() {
        let now = SystemTime::now();
        assert!(exemplar_for(None, 0.25, now).is_none());

        let ctx = SpanContext {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
        };
        let exemplar = exemplar_for(Some(ctx), 0.25, now).unwrap();
        assert_eq!(exemplar.trace_id, ctx.trace_id);
        assert_eq!(exemplar.span_id, ctx.span_id);
        assert_eq!(exemplar.value, 0.25);
        assert_eq!(exemplar.timestamp, now);
    }
}
