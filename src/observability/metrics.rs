//! Metric instrument registry.
//!
//! # Responsibilities
//! - Register named counters and histograms once at startup
//! - Aggregate observations per dimension set (cumulative buckets, count, sum)
//! - Attach exemplars for observations recorded inside an active span
//! - Mirror every observation into the `metrics` facade for Prometheus scrapes
//!
//! # Metrics
//! - `http.server.request.duration` (histogram): inbound request latency
//! - `http.server.requests` (counter): inbound requests by route, status
//! - `db.client.operation.duration` (histogram): data-store round trips
//! - `catalog.operation.duration` (histogram): business operation latency
//!
//! # Design Decisions
//! - Bucket boundaries are fixed per name; redefinition is a startup error
//! - Record path is atomics only once a series exists
//! - Misuse on the record path is logged and dropped, never returned

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::observability::error::TelemetryError;
use crate::observability::exemplar::{exemplar_for, Exemplar};
use crate::observability::trace::{serialize_unix_nanos, TraceScope};

pub const HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";
pub const HTTP_SERVER_REQUESTS: &str = "http.server.requests";
pub const DB_CLIENT_OPERATION_DURATION: &str = "db.client.operation.duration";
pub const CATALOG_OPERATION_DURATION: &str = "catalog.operation.duration";

/// Latency buckets in seconds, 5ms to 10s.
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Sorted dimension attributes identifying one series of an instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Dimensions(BTreeMap<String, String>);

impl Dimensions {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn labels(&self) -> Vec<metrics::Label> {
        self.0
            .iter()
            .map(|(k, v)| metrics::Label::new(k.clone(), v.clone()))
            .collect()
    }
}

/// One histogram observation as recorded.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub instrument: String,
    pub value: f64,
    pub dimensions: Dimensions,
    #[serde(rename = "time_unix_nano", serialize_with = "serialize_unix_nanos")]
    pub time: SystemTime,
    pub exemplar: Option<Exemplar>,
}

#[derive(Clone)]
enum Instrument {
    Counter(Arc<Counter>),
    Histogram(Arc<Histogram>),
}

impl Instrument {
    fn kind(&self) -> &'static str {
        match self {
            Instrument::Counter(_) => "counter",
            Instrument::Histogram(_) => "histogram",
        }
    }
}

struct Counter {
    description: String,
    series: DashMap<Dimensions, AtomicU64>,
}

struct Histogram {
    description: String,
    bounds: Vec<f64>,
    series: DashMap<Dimensions, Arc<HistogramSeries>>,
}

struct HistogramSeries {
    /// Cumulative counts; index `bounds.len()` is the `+Inf` bucket.
    bucket_counts: Vec<AtomicU64>,
    count: AtomicU64,
    sum_bits: AtomicU64,
    /// Most recent exemplar that fell into each (non-cumulative) bucket.
    exemplars: Vec<Mutex<Option<Exemplar>>>,
}

impl HistogramSeries {
    fn new(bucket_len: usize) -> Self {
        Self {
            bucket_counts: (0..bucket_len).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
            exemplars: (0..bucket_len).map(|_| Mutex::new(None)).collect(),
        }
    }

    fn record(&self, bounds: &[f64], value: f64, exemplar: Option<Exemplar>) {
        // First bucket whose upper bound is >= value; `bounds.len()` means +Inf.
        let index = bounds.partition_point(|&bound| bound < value);
        for bucket in &self.bucket_counts[index..] {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });

        if let Some(exemplar) = exemplar {
            let mut slot = self.exemplars[index]
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            *slot = Some(exemplar);
        }
    }

    fn point(&self, dimensions: &Dimensions) -> HistogramPoint {
        HistogramPoint {
            dimensions: dimensions.clone(),
            count: self.count.load(Ordering::Relaxed),
            sum: f64::from_bits(self.sum_bits.load(Ordering::Relaxed)),
            bucket_counts: self
                .bucket_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            exemplars: self
                .exemplars
                .iter()
                .filter_map(|slot| slot.lock().unwrap_or_else(|err| err.into_inner()).clone())
                .collect(),
        }
    }
}

/// Registry of all instruments in the process.
///
/// Created once at startup, shared via `Arc` by every request.
#[derive(Default)]
pub struct MeterRegistry {
    instruments: DashMap<String, Instrument>,
}

impl MeterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a histogram with fixed bucket upper bounds.
    ///
    /// Registering the same name with identical bounds is a no-op.
    pub fn register_histogram(
        &self,
        name: &str,
        description: &str,
        bounds: &[f64],
    ) -> Result<(), TelemetryError> {
        validate_bounds(name, bounds)?;

        match self.instruments.entry(name.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                Instrument::Histogram(existing) if existing.bounds == bounds => {
                    tracing::debug!(instrument = %name, "Histogram already registered");
                    Ok(())
                }
                Instrument::Histogram(existing) => Err(TelemetryError::ConflictingHistogram {
                    name: name.to_string(),
                    existing: existing.bounds.clone(),
                    requested: bounds.to_vec(),
                }),
                other => Err(TelemetryError::KindMismatch {
                    name: name.to_string(),
                    existing: other.kind(),
                }),
            },
            Entry::Vacant(entry) => {
                entry.insert(Instrument::Histogram(Arc::new(Histogram {
                    description: description.to_string(),
                    bounds: bounds.to_vec(),
                    series: DashMap::new(),
                })));
                metrics::describe_histogram!(
                    name.to_string(),
                    metrics::Unit::Seconds,
                    description.to_string()
                );
                tracing::debug!(instrument = %name, buckets = bounds.len(), "Histogram registered");
                Ok(())
            }
        }
    }

    /// Register a monotonic counter. Idempotent.
    pub fn register_counter(&self, name: &str, description: &str) -> Result<(), TelemetryError> {
        match self.instruments.entry(name.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                Instrument::Counter(_) => Ok(()),
                other => Err(TelemetryError::KindMismatch {
                    name: name.to_string(),
                    existing: other.kind(),
                }),
            },
            Entry::Vacant(entry) => {
                entry.insert(Instrument::Counter(Arc::new(Counter {
                    description: description.to_string(),
                    series: DashMap::new(),
                })));
                metrics::describe_counter!(name.to_string(), description.to_string());
                Ok(())
            }
        }
    }

    /// Bucket boundaries of a registered histogram.
    pub fn histogram_bounds(&self, name: &str) -> Option<Vec<f64>> {
        match self.instruments.get(name).map(|i| i.value().clone()) {
            Some(Instrument::Histogram(h)) => Some(h.bounds.clone()),
            _ => None,
        }
    }

    /// Record one histogram observation.
    ///
    /// When `scope` has an active span the observation carries an exemplar
    /// pointing at it. Returns `None` when the observation was dropped.
    pub fn record(
        &self,
        scope: &TraceScope,
        name: &str,
        value: f64,
        dimensions: &[(&str, &str)],
    ) -> Option<Observation> {
        if !value.is_finite() || value < 0.0 {
            tracing::warn!(instrument = %name, value, "Dropping invalid histogram value");
            return None;
        }

        let histogram = match self.instruments.get(name).map(|i| i.value().clone()) {
            Some(Instrument::Histogram(h)) => h,
            Some(other) => {
                tracing::warn!(instrument = %name, kind = other.kind(), "Record on non-histogram instrument");
                return None;
            }
            None => {
                tracing::warn!(instrument = %name, "Record on unregistered histogram");
                return None;
            }
        };

        let time = SystemTime::now();
        let exemplar = exemplar_for(scope.active(), value, time);
        let dimensions = Dimensions::from_pairs(dimensions.iter().copied());

        let series = histogram
            .series
            .entry(dimensions.clone())
            .or_insert_with(|| Arc::new(HistogramSeries::new(histogram.bounds.len() + 1)))
            .value()
            .clone();
        series.record(&histogram.bounds, value, exemplar.clone());

        metrics::histogram!(name.to_string(), dimensions.labels()).record(value);

        Some(Observation {
            instrument: name.to_string(),
            value,
            dimensions,
            time,
            exemplar,
        })
    }

    /// Increment a counter.
    pub fn add(&self, name: &str, value: u64, dimensions: &[(&str, &str)]) {
        let counter = match self.instruments.get(name).map(|i| i.value().clone()) {
            Some(Instrument::Counter(c)) => c,
            _ => {
                tracing::warn!(instrument = %name, "Add on unregistered counter");
                return;
            }
        };

        let dimensions = Dimensions::from_pairs(dimensions.iter().copied());
        let labels = dimensions.labels();
        counter
            .series
            .entry(dimensions)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);

        metrics::counter!(name.to_string(), labels).increment(value);
    }

    /// Point-in-time copy of every instrument, sorted by name.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut metrics: Vec<MetricData> = self
            .instruments
            .iter()
            .map(|entry| match entry.value() {
                Instrument::Counter(counter) => {
                    let mut points: Vec<CounterPoint> = counter
                        .series
                        .iter()
                        .map(|s| CounterPoint {
                            dimensions: s.key().clone(),
                            value: s.value().load(Ordering::Relaxed),
                        })
                        .collect();
                    points.sort_by(|a, b| a.dimensions.cmp(&b.dimensions));
                    MetricData::Counter(CounterData {
                        name: entry.key().clone(),
                        description: counter.description.clone(),
                        points,
                    })
                }
                Instrument::Histogram(histogram) => {
                    let mut points: Vec<HistogramPoint> = histogram
                        .series
                        .iter()
                        .map(|s| s.value().point(s.key()))
                        .collect();
                    points.sort_by(|a, b| a.dimensions.cmp(&b.dimensions));
                    MetricData::Histogram(HistogramData {
                        name: entry.key().clone(),
                        description: histogram.description.clone(),
                        bounds: histogram.bounds.clone(),
                        points,
                    })
                }
            })
            .collect();
        metrics.sort_by(|a, b| a.name().cmp(b.name()));

        MetricsSnapshot {
            timestamp: SystemTime::now(),
            metrics,
        }
    }
}

fn validate_bounds(name: &str, bounds: &[f64]) -> Result<(), TelemetryError> {
    let invalid = |reason: &str| TelemetryError::InvalidBuckets {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if bounds.is_empty() {
        return Err(invalid("no boundaries"));
    }
    if bounds.iter().any(|b| !b.is_finite()) {
        return Err(invalid("boundaries must be finite"));
    }
    if bounds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("boundaries must be strictly ascending"));
    }
    Ok(())
}

/// Register the instruments used by the HTTP, data and catalog layers.
pub fn register_default_instruments(
    registry: &MeterRegistry,
    latency_buckets: &[f64],
) -> Result<(), TelemetryError> {
    registry.register_histogram(
        HTTP_SERVER_REQUEST_DURATION,
        "Duration of inbound HTTP requests",
        latency_buckets,
    )?;
    registry.register_counter(HTTP_SERVER_REQUESTS, "Inbound HTTP requests")?;
    registry.register_histogram(
        DB_CLIENT_OPERATION_DURATION,
        "Duration of data store round trips",
        latency_buckets,
    )?;
    registry.register_histogram(
        CATALOG_OPERATION_DURATION,
        "Duration of catalog business operations",
        latency_buckets,
    )?;
    Ok(())
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_prometheus(addr: SocketAddr) -> Result<(), TelemetryError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TelemetryError::Prometheus(e.to_string()))?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Registry contents at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "time_unix_nano", serialize_with = "serialize_unix_nanos")]
    pub timestamp: SystemTime,
    pub metrics: Vec<MetricData>,
}

impl MetricsSnapshot {
    pub fn histogram(&self, name: &str) -> Option<&HistogramData> {
        self.metrics.iter().find_map(|m| match m {
            MetricData::Histogram(h) if h.name == name => Some(h),
            _ => None,
        })
    }

    pub fn counter(&self, name: &str) -> Option<&CounterData> {
        self.metrics.iter().find_map(|m| match m {
            MetricData::Counter(c) if c.name == name => Some(c),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricData {
    Counter(CounterData),
    Histogram(HistogramData),
}

impl MetricData {
    pub fn name(&self) -> &str {
        match self {
            MetricData::Counter(c) => &c.name,
            MetricData::Histogram(h) => &h.name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterData {
    pub name: String,
    pub description: String,
    pub points: Vec<CounterPoint>,
}

impl CounterData {
    pub fn total(&self) -> u64 {
        self.points.iter().map(|p| p.value).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterPoint {
    pub dimensions: Dimensions,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramData {
    pub name: String,
    pub description: String,
    pub bounds: Vec<f64>,
    pub points: Vec<HistogramPoint>,
}

impl HistogramData {
    /// Observation count across all dimension sets.
    pub fn total_count(&self) -> u64 {
        self.points.iter().map(|p| p.count).sum()
    }

    /// The series whose dimensions include every given pair.
    pub fn point_matching(&self, dimensions: &[(&str, &str)]) -> Option<&HistogramPoint> {
        self.points.iter().find(|p| {
            dimensions
                .iter()
                .all(|(k, v)| p.dimensions.get(k) == Some(*v))
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramPoint {
    pub dimensions: Dimensions,
    pub count: u64,
    pub sum: f64,
    /// Cumulative counts per bound, followed by the `+Inf` bucket.
    pub bucket_counts: Vec<u64>,
    pub exemplars: Vec<Exemplar>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::trace::Tracer;

    const BOUNDS: &[f64] = &[0.1, 0.5, 1.0];

    fn registry() -> MeterRegistry {
        let registry = MeterRegistry::new();
        registry
            .register_histogram("latency", "test latency", BOUNDS)
            .unwrap();
        registry
    }

    #[test]
    fn test_cumulative_buckets() {
        let registry = registry();
        let scope = Tracer::disabled().scope();

        registry.record(&scope, "latency", 0.05, &[]);
        registry.record(&scope, "latency", 0.5, &[]);
        registry.record(&scope, "latency", 0.7, &[]);
        registry.record(&scope, "latency", 3.0, &[]);

        let snapshot = registry.snapshot();
        let point = &snapshot.histogram("latency").unwrap().points[0];
        // le=0.1, le=0.5, le=1.0, +Inf
        assert_eq!(point.bucket_counts, vec![1, 2, 3, 4]);
        assert_eq!(point.count, 4);
        assert!((point.sum - 4.25).abs() < 1e-9);
    }

    #[test]
    fn test_series_split_by_dimensions() {
        let registry = registry();
        let scope = Tracer::disabled().scope();

        registry.record(&scope, "latency", 0.2, &[("route", "a"), ("status", "200")]);
        registry.record(&scope, "latency", 0.2, &[("status", "200"), ("route", "a")]);
        registry.record(&scope, "latency", 0.2, &[("route", "b"), ("status", "200")]);

        let snapshot = registry.snapshot();
        let histogram = snapshot.histogram("latency").unwrap();
        assert_eq!(histogram.points.len(), 2);
        assert_eq!(histogram.point_matching(&[("route", "a")]).unwrap().count, 2);
        assert_eq!(histogram.total_count(), 3);
    }

    #[test]
    fn test_exemplar_iff_active_span() {
        let exporter = crate::export::InMemoryExporter::new();
        let tracer = Tracer::new(Arc::new(exporter));
        let registry = registry();
        let scope = tracer.scope();

        let detached = registry.record(&scope, "latency", 0.2, &[]).unwrap();
        assert!(detached.exemplar.is_none());

        let mut span = scope.start_span("work");
        let ctx = span.context().unwrap();
        let observed = registry.record(&scope, "latency", 0.3, &[]).unwrap();
        span.end();

        let exemplar = observed.exemplar.unwrap();
        assert_eq!(exemplar.trace_id, ctx.trace_id);
        assert_eq!(exemplar.span_id, ctx.span_id);
        assert_eq!(exemplar.value, 0.3);

        let after = registry.record(&scope, "latency", 0.4, &[]).unwrap();
        assert!(after.exemplar.is_none());

        let snapshot = registry.snapshot();
        let point = &snapshot.histogram("latency").unwrap().points[0];
        assert_eq!(point.exemplars.len(), 1);
        assert_eq!(point.exemplars[0].span_id, ctx.span_id);
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let registry = registry();
        let scope = Tracer::disabled().scope();
        registry.record(&scope, "latency", 0.2, &[]);

        registry
            .register_histogram("latency", "test latency", BOUNDS)
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.histogram("latency").unwrap().total_count(), 1);
        assert_eq!(registry.histogram_bounds("latency").unwrap(), BOUNDS.to_vec());
    }

    #[test]
    fn test_conflicting_bounds_rejected() {
        let registry = registry();
        let err = registry
            .register_histogram("latency", "test latency", &[0.1, 0.2])
            .unwrap_err();
        assert!(matches!(err, TelemetryError::ConflictingHistogram { .. }));
        assert_eq!(registry.histogram_bounds("latency").unwrap(), BOUNDS.to_vec());
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let registry = registry();
        registry.register_counter("requests", "test").unwrap();
        registry.register_counter("requests", "test").unwrap();

        assert!(matches!(
            registry.register_counter("latency", "x"),
            Err(TelemetryError::KindMismatch { existing: "histogram", .. })
        ));
        assert!(matches!(
            registry.register_histogram("requests", "x", BOUNDS),
            Err(TelemetryError::KindMismatch { existing: "counter", .. })
        ));
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let registry = MeterRegistry::new();
        for bounds in [&[][..], &[0.5, 0.1][..], &[0.1, 0.1][..], &[f64::NAN][..]] {
            assert!(matches!(
                registry.register_histogram("bad", "x", bounds),
                Err(TelemetryError::InvalidBuckets { .. })
            ));
        }
    }

    #[test]
    fn test_misuse_is_dropped() {
        let registry = registry();
        let scope = Tracer::disabled().scope();

        assert!(registry.record(&scope, "missing", 1.0, &[]).is_none());
        assert!(registry.record(&scope, "latency", f64::NAN, &[]).is_none());
        assert!(registry.record(&scope, "latency", -1.0, &[]).is_none());
        registry.add("missing", 1, &[]);

        let snapshot = registry.snapshot();
        assert!(snapshot.histogram("latency").unwrap().points.is_empty());
    }

    #[test]
    fn test_counter_add() {
        let registry = MeterRegistry::new();
        registry.register_counter("requests", "test").unwrap();
        registry.add("requests", 1, &[("route", "a")]);
        registry.add("requests", 2, &[("route", "a")]);
        registry.add("requests", 1, &[("route", "b")]);

        let snapshot = registry.snapshot();
        let counter = snapshot.counter("requests").unwrap();
        assert_eq!(counter.total(), 4);
        assert_eq!(counter.points.len(), 2);
    }

    #[test]
    fn test_concurrent_records_lose_nothing() {
        let registry = Arc::new(registry());
        let tracer = Tracer::disabled();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let scope = tracer.scope();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        registry.record(&scope, "latency", f64::from(i % 10) * 0.1, &[]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        let point = &snapshot.histogram("latency").unwrap().points[0];
        assert_eq!(point.count, 8000);
        assert_eq!(*point.bucket_counts.last().unwrap(), 8000);
    }

    #[test]
    fn test_default_instruments_register_once() {
        let registry = MeterRegistry::new();
        register_default_instruments(&registry, DEFAULT_LATENCY_BUCKETS).unwrap();
        register_default_instruments(&registry, DEFAULT_LATENCY_BUCKETS).unwrap();
        assert!(register_default_instruments(&registry, &[1.0]).is_err());
    }
}
