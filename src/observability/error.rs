//! Telemetry configuration errors.

use thiserror::Error;

/// Misconfiguration detected while wiring telemetry at startup.
///
/// All variants are fatal: startup aborts instead of aggregating into a
/// corrupted instrument.
#[derive(Debug, Error, PartialEq)]
pub enum TelemetryError {
    /// Histogram registered twice with different bucket boundaries.
    #[error("histogram '{name}' already registered with buckets {existing:?}, got {requested:?}")]
    ConflictingHistogram {
        name: String,
        existing: Vec<f64>,
        requested: Vec<f64>,
    },

    /// Name already used by an instrument of another kind.
    #[error("instrument '{name}' already registered as a {existing}")]
    KindMismatch { name: String, existing: &'static str },

    /// Bucket boundaries empty, non-finite or not strictly ascending.
    #[error("invalid bucket boundaries for '{name}': {reason}")]
    InvalidBuckets { name: String, reason: String },

    /// Prometheus scrape endpoint could not be installed.
    #[error("prometheus exporter: {0}")]
    Prometheus(String),

    /// Span/metric exporter could not be built.
    #[error("exporter setup: {0}")]
    Exporter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::ConflictingHistogram {
            name: "http.server.request.duration".into(),
            existing: vec![0.1, 1.0],
            requested: vec![0.5],
        };
        let text = err.to_string();
        assert!(text.contains("http.server.request.duration"));
        assert!(text.contains("0.5"));

        let err = TelemetryError::KindMismatch {
            name: "x".into(),
            existing: "counter",
        };
        assert_eq!(err.to_string(), "instrument 'x' already registered as a counter");
    }
}
