//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber once per process
//! - Honour `RUST_LOG`, falling back to the configured level
//! - Emit JSON in production, human-readable lines otherwise
//! - Correlate log events with the request's trace

use tracing::field::{display, Empty};
use tracing_subscriber::{
    fmt::{
        self,
        format::{Format, Json, JsonFields},
        MakeWriter,
    },
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::observability::SpanContext;

/// Install the global subscriber.
///
/// Returns an error if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(json_layer(std::io::stdout))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    }
}

/// JSON lines with the enclosing span's fields under `span`.
fn json_layer<S, W>(writer: W) -> fmt::Layer<S, JsonFields, Format<Json>, W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(writer)
}

/// Log span for one request. Events inside it carry `trace_id` and
/// `span_id`; both stay empty when the request is not traced.
pub fn correlation_span(context: Option<SpanContext>) -> tracing::Span {
    let span = tracing::info_span!("request", trace_id = Empty, span_id = Empty);
    if let Some(ctx) = context {
        span.record("trace_id", display(ctx.trace_id));
        span.record("span_id", display(ctx.span_id));
    }
    span
}

fn default_directives(level: &str) -> String {
    format!("catalog_telemetry={level},tower_http={level}")
}
