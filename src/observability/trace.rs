//! Span creation and active-span propagation.
//!
//! # Responsibilities
//! - Generate trace and span identifiers
//! - Track the active span of one logical request (`TraceScope`)
//! - Record tags, status and exceptions on open spans
//! - Hand finished spans to a `SpanProcessor`
//!
//! # Design Decisions
//! - The active-span stack travels with the request as an explicit value, so
//!   it survives `.await` points and worker-thread migration
//! - `Span` is either recording or a no-op; call sites never branch on it
//! - Dropping an open span ends it, so every exit path pops the stack

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// 128-bit identifier shared by every span of one trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// Generate a random, non-zero trace id.
    pub fn random() -> Self {
        loop {
            let id = fastrand::u128(..);
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Parse a 32-digit lowercase hex trace id.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        match u128::from_str_radix(hex, 16) {
            Ok(0) | Err(_) => None,
            Ok(id) => Some(Self(id)),
        }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit identifier unique to one span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Generate a random, non-zero span id.
    pub fn random() -> Self {
        loop {
            let id = fastrand::u64(..);
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Parse a 16-digit lowercase hex span id.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 16 {
            return None;
        }
        match u64::from_str_radix(hex, 16) {
            Ok(0) | Err(_) => None,
            Ok(id) => Some(Self(id)),
        }
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identity of a span: the pair carried in exemplars and `traceparent` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl SpanContext {
    /// Parse a W3C `traceparent` header (`00-<trace>-<span>-<flags>`).
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = TraceId::from_hex(parts.next()?)?;
        let span_id = SpanId::from_hex(parts.next()?)?;
        let flags = parts.next()?;
        if version != "00" || flags.len() != 2 || parts.next().is_some() {
            return None;
        }
        Some(Self { trace_id, span_id })
    }

    /// Render as a sampled W3C `traceparent` header.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Inbound request handled by this process.
    Server,
    /// Outbound call (database round trip).
    Client,
    /// In-process business logic.
    Internal,
}

/// Terminal status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { message: String },
}

impl SpanStatus {
    pub fn error(message: impl Into<String>) -> Self {
        SpanStatus::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

/// Tag value attached to spans and events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<&String> for AttributeValue {
    fn from(v: &String) -> Self {
        AttributeValue::String(v.clone())
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(i64::from(v))
    }
}

impl From<u16> for AttributeValue {
    fn from(v: u16) -> Self {
        AttributeValue::Int(i64::from(v))
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AttributeValue,
}

/// A timestamped event inside a span (currently only exceptions).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    #[serde(rename = "time_unix_nano", serialize_with = "serialize_unix_nanos")]
    pub timestamp: SystemTime,
    pub attributes: Vec<KeyValue>,
}

/// Errors that can describe themselves on a span.
///
/// `error_type` becomes the `error.type` tag and the `exception.type` event
/// attribute.
pub trait ReportableError: fmt::Display {
    fn error_type(&self) -> &'static str;
}

/// A closed span, ready for export.
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    #[serde(rename = "start_time_unix_nano", serialize_with = "serialize_unix_nanos")]
    pub start_time: SystemTime,
    #[serde(rename = "end_time_unix_nano", serialize_with = "serialize_unix_nanos")]
    pub end_time: SystemTime,
    pub status: SpanStatus,
    pub attributes: Vec<KeyValue>,
    pub events: Vec<SpanEvent>,
}

impl SpanData {
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
        }
    }

    /// Look up a tag by key.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| &kv.value)
    }

    pub fn duration(&self) -> std::time::Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }
}

pub(crate) fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

pub(crate) fn serialize_unix_nanos<S: Serializer>(
    time: &SystemTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(unix_nanos(*time))
}

/// Receives every span when it ends.
///
/// Implementations must not block: `on_end` runs on the request path.
pub trait SpanProcessor: Send + Sync {
    fn on_end(&self, span: SpanData);
}

struct NoopProcessor;

impl SpanProcessor for NoopProcessor {
    fn on_end(&self, _span: SpanData) {}
}

/// Process-wide span factory. Cheap to clone.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    enabled: bool,
    processor: Arc<dyn SpanProcessor>,
}

impl Tracer {
    /// Create a recording tracer that hands finished spans to `processor`.
    pub fn new(processor: Arc<dyn SpanProcessor>) -> Self {
        Self {
            inner: Arc::new(TracerInner {
                enabled: true,
                processor,
            }),
        }
    }

    /// A tracer whose spans are all no-ops.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TracerInner {
                enabled: false,
                processor: Arc::new(NoopProcessor),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Open a fresh scope for one logical request.
    pub fn scope(&self) -> TraceScope {
        self.scope_with_remote_parent(None)
    }

    /// Open a scope whose root spans continue a caller's trace.
    pub fn scope_with_remote_parent(&self, remote_parent: Option<SpanContext>) -> TraceScope {
        TraceScope {
            tracer: self.clone(),
            remote_parent,
            stack: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Active-span context of one logical request chain.
///
/// Clones share the same stack; pass a clone into every call that may start
/// child spans or record metrics.
#[derive(Clone)]
pub struct TraceScope {
    tracer: Tracer,
    remote_parent: Option<SpanContext>,
    stack: Arc<Mutex<Vec<SpanContext>>>,
}

impl TraceScope {
    /// Start an internal span as a child of the active span.
    pub fn start_span(&self, name: impl Into<String>) -> Span {
        self.start_span_with_kind(name, SpanKind::Internal)
    }

    /// Start a span of the given kind and make it the active span.
    pub fn start_span_with_kind(&self, name: impl Into<String>, kind: SpanKind) -> Span {
        if !self.tracer.is_enabled() {
            return Span::Noop;
        }

        let span_id = SpanId::random();
        let (trace_id, parent) = {
            let mut stack = self.lock();
            let parent = stack.last().copied().or(self.remote_parent);
            let trace_id = parent.map_or_else(TraceId::random, |p| p.trace_id);
            stack.push(SpanContext { trace_id, span_id });
            (trace_id, parent.map(|p| p.span_id))
        };

        Span::Recording(RecordingSpan {
            context: SpanContext { trace_id, span_id },
            parent_span_id: parent,
            name: name.into(),
            kind,
            start_time: SystemTime::now(),
            started: Instant::now(),
            status: SpanStatus::Unset,
            attributes: Vec::new(),
            events: Vec::new(),
            ended: false,
            scope: self.clone(),
        })
    }

    /// The currently active span, if any.
    pub fn active(&self) -> Option<SpanContext> {
        self.lock().last().copied()
    }

    /// Number of open spans in this scope.
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    fn pop(&self, span_id: SpanId) {
        let mut stack = self.lock();
        match stack.last() {
            Some(top) if top.span_id == span_id => {
                stack.pop();
            }
            _ => {
                // Ended out of order: drop only this entry.
                if let Some(pos) = stack.iter().rposition(|c| c.span_id == span_id) {
                    stack.remove(pos);
                    tracing::debug!(span_id = %span_id, "Span ended while a child was still active");
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SpanContext>> {
        self.stack.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Handle to an open span, or a no-op when tracing is disabled.
pub enum Span {
    Recording(RecordingSpan),
    Noop,
}

impl Span {
    /// Append a tag, or overwrite an existing tag with the same key.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Span::Recording(span) = self {
            span.set_tag(key.into(), value.into());
        }
    }

    /// Set the terminal status. The last call before `end` wins.
    pub fn set_status(&mut self, status: SpanStatus) {
        if let Span::Recording(span) = self {
            if !span.ended {
                span.status = status;
            }
        }
    }

    /// Record an exception event with its type and message.
    pub fn record_exception(&mut self, error_type: &str, message: &str) {
        if let Span::Recording(span) = self {
            if span.ended {
                return;
            }
            span.events.push(SpanEvent {
                name: "exception".to_string(),
                timestamp: SystemTime::now(),
                attributes: vec![
                    KeyValue {
                        key: "exception.type".to_string(),
                        value: error_type.into(),
                    },
                    KeyValue {
                        key: "exception.message".to_string(),
                        value: message.into(),
                    },
                ],
            });
        }
    }

    /// Mark the span failed: exception event, `error.type` tag, Error status.
    pub fn record_error<E: ReportableError + ?Sized>(&mut self, error: &E) {
        let message = error.to_string();
        self.record_exception(error.error_type(), &message);
        self.set_tag("error.type", error.error_type());
        self.set_status(SpanStatus::error(message));
    }

    /// Close the span. Later calls are no-ops.
    pub fn end(&mut self) {
        if let Span::Recording(span) = self {
            span.finish();
        }
    }

    pub fn context(&self) -> Option<SpanContext> {
        match self {
            Span::Recording(span) => Some(span.context),
            Span::Noop => None,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Span::Recording(span) if !span.ended)
    }
}

pub struct RecordingSpan {
    context: SpanContext,
    parent_span_id: Option<SpanId>,
    name: String,
    kind: SpanKind,
    start_time: SystemTime,
    started: Instant,
    status: SpanStatus,
    attributes: Vec<KeyValue>,
    events: Vec<SpanEvent>,
    ended: bool,
    scope: TraceScope,
}

impl RecordingSpan {
    fn set_tag(&mut self, key: String, value: AttributeValue) {
        if self.ended {
            return;
        }
        match self.attributes.iter_mut().find(|kv| kv.key == key) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(KeyValue { key, value }),
        }
    }

    fn finish(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        // Monotonic clock keeps end >= start even if wall time steps back.
        let end_time = self.start_time + self.started.elapsed();
        self.scope.pop(self.context.span_id);

        let data = SpanData {
            trace_id: self.context.trace_id,
            span_id: self.context.span_id,
            parent_span_id: self.parent_span_id,
            name: std::mem::take(&mut self.name),
            kind: self.kind,
            start_time: self.start_time,
            end_time,
            status: self.status.clone(),
            attributes: std::mem::take(&mut self.attributes),
            events: std::mem::take(&mut self.events),
        };
        self.scope.tracer.inner.processor.on_end(data);
    }
}

impl Drop for RecordingSpan {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        // Not ended explicitly: the owning future was dropped or unwound.
        if std::thread::panicking() && !self.status.is_error() {
            self.status = SpanStatus::error("panicked");
        } else if self.status == SpanStatus::Unset {
            self.status = SpanStatus::error("cancelled");
        }
        self.finish();
    }
}
