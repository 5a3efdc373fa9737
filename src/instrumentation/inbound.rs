//! Inbound HTTP instrumentation.
//!
//! # Responsibilities
//! - Open a Server span per request, continuing a remote `traceparent`
//! - Tag the span with standard HTTP attributes
//! - Hand the request's `TraceScope` to handlers through extensions
//! - Record request duration and count inside the span
//! - Close the span on every exit path, including cancellation and panics
//! - Run the handler inside a log span carrying the trace and span ids

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::instrumentation::Instrumentation;
use crate::observability::logging::correlation_span;
use crate::observability::metrics::{HTTP_SERVER_REQUESTS, HTTP_SERVER_REQUEST_DURATION};
use crate::observability::{
    MeterRegistry, Span, SpanContext, SpanKind, SpanStatus, Telemetry, TraceScope,
};

pub const TRACEPARENT: &str = "traceparent";
pub const X_REQUEST_ID: &str = "x-request-id";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Exception attached to an error response by the handler layer, recorded
/// on the Server span by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedException {
    pub error_type: String,
    pub message: String,
}

/// What the adapter reads from an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub method: String,
    /// Matched route template, e.g. `/api/products/{id}`.
    pub route: Option<String>,
    pub scheme: String,
    pub host: Option<String>,
    pub content_length: Option<u64>,
    pub request_id: Option<String>,
    pub user_agent: Option<String>,
    pub parent: Option<SpanContext>,
}

impl RequestMeta {
    pub fn from_request<B>(request: &axum::http::Request<B>) -> Self {
        let headers = request.headers();
        let scheme = header_str(headers, X_FORWARDED_PROTO)
            .map(str::to_ascii_lowercase)
            .or_else(|| request.uri().scheme_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());
        let host = header_str(headers, header::HOST.as_str())
            .map(str::to_string)
            .or_else(|| request.uri().authority().map(|a| a.to_string()));

        Self {
            method: request.method().to_string(),
            route: request
                .extensions()
                .get::<MatchedPath>()
                .map(|path| path.as_str().to_string()),
            scheme,
            host,
            content_length: header_str(headers, header::CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse().ok()),
            request_id: header_str(headers, X_REQUEST_ID).map(str::to_string),
            user_agent: header_str(headers, header::USER_AGENT.as_str()).map(str::to_string),
            parent: header_str(headers, TRACEPARENT).and_then(SpanContext::from_traceparent),
        }
    }

    /// `GET /api/products/{id}`, or just the method when no route matched.
    pub fn span_name(&self) -> String {
        match &self.route {
            Some(route) => format!("{} {}", self.method, route),
            None => self.method.clone(),
        }
    }

    fn route_label(&self) -> &str {
        self.route.as_deref().unwrap_or("unmatched")
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// What the adapter reads from the response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: u16,
    pub elapsed: Duration,
    pub exception: Option<RecordedException>,
}

impl ResponseMeta {
    pub fn from_response(response: &Response, elapsed: Duration) -> Self {
        Self {
            status: response.status().as_u16(),
            elapsed,
            exception: response.extensions().get::<RecordedException>().cloned(),
        }
    }
}

/// Server-side HTTP adapter.
#[derive(Clone)]
pub struct HttpServerInstrumentation {
    meters: Arc<MeterRegistry>,
}

impl HttpServerInstrumentation {
    pub fn new(meters: Arc<MeterRegistry>) -> Self {
        Self { meters }
    }
}

impl Instrumentation for HttpServerInstrumentation {
    type Request = RequestMeta;
    type Outcome = ResponseMeta;

    fn begin(&self, scope: &TraceScope, request: &RequestMeta) -> Span {
        scope.start_span_with_kind(request.span_name(), SpanKind::Server)
    }

    fn enrich(&self, span: &mut Span, request: &RequestMeta) {
        span.set_tag("http.request.method", request.method.as_str());
        span.set_tag("http.route", request.route_label());
        span.set_tag("url.scheme", request.scheme.as_str());
        if let Some(host) = &request.host {
            span.set_tag("server.address", host);
        }
        if let Some(length) = request.content_length {
            span.set_tag("http.request_content_length", length);
        }
        if let Some(id) = &request.request_id {
            span.set_tag("http.request_id", id);
        }
        if let Some(agent) = &request.user_agent {
            span.set_tag("user_agent.original", agent);
        }
    }

    fn end(
        &self,
        scope: &TraceScope,
        mut span: Span,
        request: &RequestMeta,
        outcome: &ResponseMeta,
    ) {
        span.set_tag("http.response.status_code", outcome.status);

        if let Some(exception) = &outcome.exception {
            span.record_exception(&exception.error_type, &exception.message);
            span.set_tag("error.type", exception.error_type.as_str());
        }
        if outcome.status >= 500 {
            let message = outcome
                .exception
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| format!("HTTP {}", outcome.status));
            span.set_status(SpanStatus::error(message));
        }

        let status = outcome.status.to_string();
        let dimensions = [
            ("http.request.method", request.method.as_str()),
            ("http.route", request.route_label()),
            ("http.response.status_code", status.as_str()),
        ];
        // Recorded while the Server span is still active.
        self.meters.record(
            scope,
            HTTP_SERVER_REQUEST_DURATION,
            outcome.elapsed.as_secs_f64(),
            &dimensions,
        );
        self.meters.add(HTTP_SERVER_REQUESTS, 1, &dimensions);

        span.end();
    }
}

/// Ends the Server span with an error if the request future is dropped or
/// unwinds before the response is produced.
struct InFlight {
    instrumentation: HttpServerInstrumentation,
    scope: TraceScope,
    meta: RequestMeta,
    span: Option<Span>,
    started: Instant,
}

impl InFlight {
    fn complete(mut self, response: &Response) {
        if let Some(span) = self.span.take() {
            let outcome = ResponseMeta::from_response(response, self.started.elapsed());
            self.instrumentation
                .end(&self.scope, span, &self.meta, &outcome);
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let Some(mut span) = self.span.take() else {
            return;
        };
        if std::thread::panicking() {
            span.record_exception("panic", "handler panicked");
            span.set_tag("error.type", "panic");
            span.set_status(SpanStatus::error("panicked"));
            tracing::error!(route = %self.meta.route_label(), "Request handler panicked");
        } else {
            span.set_status(SpanStatus::error("request cancelled"));
            tracing::debug!(
                route = %self.meta.route_label(),
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Request cancelled before completion"
            );
        }
        span.end();
    }
}

/// Axum middleware; install with `route_layer` so the matched route is known.
pub async fn trace_http(
    State(telemetry): State<Telemetry>,
    mut request: Request,
    next: Next,
) -> Response {
    let instrumentation = HttpServerInstrumentation::new(telemetry.meters().clone());
    let meta = RequestMeta::from_request(&request);
    let scope = telemetry.tracer().scope_with_remote_parent(meta.parent);

    let mut span = instrumentation.begin(&scope, &meta);
    instrumentation.enrich(&mut span, &meta);
    request.extensions_mut().insert(scope.clone());
    let log_span = correlation_span(span.context());

    let in_flight = InFlight {
        instrumentation,
        scope,
        meta,
        span: Some(span),
        started: Instant::now(),
    };

    let response = next.run(request).instrument(log_span).await;
    in_flight.complete(&response);
    response
}
