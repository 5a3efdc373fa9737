//! Outbound data-store instrumentation.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::instrumentation::Instrumentation;
use crate::observability::metrics::DB_CLIENT_OPERATION_DURATION;
use crate::observability::{MeterRegistry, ReportableError, Span, SpanKind, SpanStatus, TraceScope};

/// One round trip to the store.
#[derive(Debug, Clone)]
pub struct DbStatement {
    /// `SELECT`, `INSERT`, ...
    pub operation: &'static str,
    pub collection: &'static str,
    /// Statement text, only attached when capture is enabled.
    pub text: String,
}

impl DbStatement {
    pub fn new(operation: &'static str, collection: &'static str, text: impl Into<String>) -> Self {
        Self {
            operation,
            collection,
            text: text.into(),
        }
    }

    pub fn span_name(&self) -> String {
        format!("{} {}", self.operation, self.collection)
    }
}

#[derive(Debug, Clone)]
pub struct DbOutcome {
    pub elapsed: Duration,
    /// `(error_type, message)` of a failed call.
    pub error: Option<(&'static str, String)>,
}

/// Client-side adapter for store calls.
#[derive(Clone)]
pub struct DataInstrumentation {
    meters: Arc<MeterRegistry>,
    system: String,
    capture_statement: bool,
}

impl DataInstrumentation {
    pub fn new(meters: Arc<MeterRegistry>, system: impl Into<String>, capture_statement: bool) -> Self {
        Self {
            meters,
            system: system.into(),
            capture_statement,
        }
    }

    /// Run `call` inside a Client span. The result is returned as is.
    pub async fn instrument<T, E, F>(
        &self,
        scope: &TraceScope,
        statement: DbStatement,
        call: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: ReportableError,
    {
        let mut span = self.begin(scope, &statement);
        self.enrich(&mut span, &statement);

        let started = Instant::now();
        let result = call.await;
        let outcome = DbOutcome {
            elapsed: started.elapsed(),
            error: result
                .as_ref()
                .err()
                .map(|e| (e.error_type(), e.to_string())),
        };

        self.end(scope, span, &statement, &outcome);
        result
    }
}

impl Instrumentation for DataInstrumentation {
    type Request = DbStatement;
    type Outcome = DbOutcome;

    fn begin(&self, scope: &TraceScope, statement: &DbStatement) -> Span {
        scope.start_span_with_kind(statement.span_name(), SpanKind::Client)
    }

    fn enrich(&self, span: &mut Span, statement: &DbStatement) {
        span.set_tag("db.system", self.system.as_str());
        span.set_tag("db.operation.name", statement.operation);
        span.set_tag("db.collection.name", statement.collection);
        if self.capture_statement {
            span.set_tag("db.query.text", statement.text.as_str());
        }
    }

    fn end(&self, scope: &TraceScope, mut span: Span, statement: &DbStatement, outcome: &DbOutcome) {
        let result = if let Some((error_type, message)) = &outcome.error {
            span.record_exception(error_type, message);
            span.set_tag("error.type", *error_type);
            span.set_status(SpanStatus::error(message.as_str()));
            "error"
        } else {
            "ok"
        };

        self.meters.record(
            scope,
            DB_CLIENT_OPERATION_DURATION,
            outcome.elapsed.as_secs_f64(),
            &[
                ("db.system", self.system.as_str()),
                ("db.operation.name", statement.operation),
                ("db.collection.name", statement.collection),
                ("outcome", result),
            ],
        );

        span.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemoryExporter;
    use crate::observability::metrics::{register_default_instruments, DEFAULT_LATENCY_BUCKETS};
    use crate::observability::{AttributeValue, Tracer};
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    #[error("connection reset")]
    struct Reset;

    impl ReportableError for Reset {
        fn error_type(&self) -> &'static str {
            "StoreUnavailable"
        }
    }

    fn setup(capture: bool) -> (InMemoryExporter, Arc<MeterRegistry>, DataInstrumentation, TraceScope) {
        let exporter = InMemoryExporter::new();
        let meters = Arc::new(MeterRegistry::new());
        register_default_instruments(&meters, DEFAULT_LATENCY_BUCKETS).unwrap();
        let data = DataInstrumentation::new(meters.clone(), "in_memory", capture);
        let scope = Tracer::new(Arc::new(exporter.clone())).scope();
        (exporter, meters, data, scope)
    }

    fn select() -> DbStatement {
        DbStatement::new("SELECT", "products", "SELECT * FROM products WHERE id = $1")
    }

    #[tokio::test]
    async fn test_client_span_under_active_parent() {
        let (exporter, meters, data, scope) = setup(true);
        let parent = scope.start_span("GetProduct.BusinessLogic");

        let rows = data
            .instrument(&scope, select(), async { Ok::<_, Reset>(vec![1, 2]) })
            .await;
        assert_eq!(rows, Ok(vec![1, 2]));
        drop(parent);

        let spans = exporter.spans();
        let client = &spans[0];
        let parent = &spans[1];
        assert_eq!(client.name, "SELECT products");
        assert_eq!(client.kind, SpanKind::Client);
        assert_eq!(client.parent_span_id, Some(parent.span_id));
        assert_eq!(
            client.attribute("db.query.text"),
            Some(&AttributeValue::from("SELECT * FROM products WHERE id = $1"))
        );
        assert_eq!(client.attribute("db.collection.name"), Some(&AttributeValue::from("products")));

        let snapshot = meters.snapshot();
        let point = &snapshot.histogram(DB_CLIENT_OPERATION_DURATION).unwrap().points[0];
        assert_eq!(point.exemplars[0].span_id, client.span_id);
    }

    #[tokio::test]
    async fn test_statement_text_omitted_without_capture() {
        let (exporter, _, data, scope) = setup(false);
        data.instrument(&scope, select(), async { Ok::<_, Reset>(()) })
            .await
            .unwrap();
        assert!(exporter.spans()[0].attribute("db.query.text").is_none());
    }

    #[tokio::test]
    async fn test_dropped_round_trip_closes_client_span() {
        let (exporter, meters, data, scope) = setup(false);
        let call = data.instrument(&scope, select(), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, Reset>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), call).await.is_err());

        assert_eq!(scope.depth(), 0);
        let span = &exporter.spans()[0];
        assert_eq!(span.name, "SELECT products");
        assert_eq!(span.status, SpanStatus::error("cancelled"));
        assert!(meters.snapshot().histogram(DB_CLIENT_OPERATION_DURATION).unwrap().points.is_empty());
    }

    #[tokio::test]
    async fn test_failure_recorded_and_returned_unchanged() {
        let (exporter, meters, data, scope) = setup(false);
        let result = data
            .instrument(&scope, select(), async { Err::<(), _>(Reset) })
            .await;
        assert_eq!(result, Err(Reset));

        let span = &exporter.spans()[0];
        assert_eq!(span.status, SpanStatus::error("connection reset"));
        assert_eq!(span.attribute("error.type"), Some(&AttributeValue::from("StoreUnavailable")));
        assert_eq!(span.events[0].name, "exception");

        let snapshot = meters.snapshot();
        let histogram = snapshot.histogram(DB_CLIENT_OPERATION_DURATION).unwrap();
        assert!(histogram.point_matching(&[("outcome", "error")]).is_some());
    }
}
