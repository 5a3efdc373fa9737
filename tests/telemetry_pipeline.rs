//! Exemplars, context propagation and export through a running server.

use serde_json::Value;
use std::collections::HashSet;

use catalog_sdk::CatalogClient;
use catalog_telemetry::observability::SpanKind;

mod common;

/// The point of `instrument` whose dimensions contain every given pair.
fn find_point<'a>(report: &'a Value, instrument: &str, dims: &[(&str, &str)]) -> Option<&'a Value> {
    report["metrics"]
        .as_array()?
        .iter()
        .find(|m| m["name"] == instrument)?["points"]
        .as_array()?
        .iter()
        .find(|p| dims.iter().all(|(k, v)| p["dimensions"][*k] == *v))
}

fn count(point: Option<&Value>) -> u64 {
    point.and_then(|p| p["count"].as_u64()).unwrap_or(0)
}

#[tokio::test]
async fn test_concurrent_slow_requests_each_observed_once() {
    let app = common::spawn_app().await;
    let before = app.client.telemetry_metrics().await.unwrap();
    let slow_dims = [("operation", "slow"), ("outcome", "ok")];
    let baseline = count(find_point(&before, "catalog.operation.duration", &slow_dims));

    const N: usize = 6;
    let calls = (0..N).map(|_| app.client.slow());
    for result in futures_util::future::join_all(calls).await {
        result.unwrap();
    }

    let after = app.client.telemetry_metrics().await.unwrap();
    let point = find_point(&after, "catalog.operation.duration", &slow_dims);
    assert_eq!(count(point) - baseline, N as u64);

    let http_point = find_point(
        &after,
        "http.server.request.duration",
        &[("http.route", "/api/products/slow")],
    );
    assert_eq!(count(http_point), N as u64);

    let spans = app
        .wait_for_spans(|s| {
            s.iter()
                .filter(|s| s.name == "SlowEndpoint.Processing")
                .count()
                == N
        })
        .await;
    let business: HashSet<String> = spans
        .iter()
        .filter(|s| s.name == "SlowEndpoint.Processing")
        .map(|s| s.span_id.to_string())
        .collect();
    assert_eq!(business.len(), N, "every request gets its own business span");

    let exemplars = point.unwrap()["exemplars"].as_array().unwrap();
    assert!(!exemplars.is_empty());
    for exemplar in exemplars {
        let span_id = exemplar["span_id"].as_str().unwrap();
        assert!(business.contains(span_id), "exemplar {} has no span", span_id);
    }

    app.stop().await;
}

#[tokio::test]
async fn test_request_histogram_exemplar_points_at_server_span() {
    let app = common::spawn_app().await;
    app.client.list_products().await.unwrap();

    let spans = app
        .wait_for_spans(|s| s.iter().any(|s| s.name == "GET /api/products"))
        .await;
    let server = spans.iter().find(|s| s.name == "GET /api/products").unwrap();

    let report = app.client.telemetry_metrics().await.unwrap();
    let point = find_point(
        &report,
        "http.server.request.duration",
        &[("http.route", "/api/products"), ("http.response.status_code", "200")],
    )
    .unwrap();
    let exemplar = &point["exemplars"][0];
    assert_eq!(exemplar["trace_id"], server.trace_id.to_string());
    assert_eq!(exemplar["span_id"], server.span_id.to_string());

    let db = find_point(
        &report,
        "db.client.operation.duration",
        &[("db.operation.name", "SELECT")],
    )
    .unwrap();
    assert_eq!(db["exemplars"][0]["trace_id"], server.trace_id.to_string());

    app.stop().await;
}

#[tokio::test]
async fn test_traceparent_continues_caller_trace() {
    let app = common::spawn_app().await;
    let client = CatalogClient::new(&app.url())
        .with_traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");

    client.list_products().await.unwrap();

    let spans = app
        .wait_for_spans(|s| s.iter().any(|s| s.kind == SpanKind::Server))
        .await;
    assert!(spans
        .iter()
        .all(|s| s.trace_id.to_string() == "4bf92f3577b34da6a3ce929d0e0e4736"));
    let server = spans.iter().find(|s| s.kind == SpanKind::Server).unwrap();
    assert_eq!(
        server.parent_span_id.map(|id| id.to_string()).as_deref(),
        Some("00f067aa0ba902b7")
    );

    app.stop().await;
}

#[tokio::test]
async fn test_separate_requests_get_separate_traces() {
    let app = common::spawn_app().await;
    app.client.health().await.unwrap();
    app.client.health().await.unwrap();

    let spans = app
        .wait_for_spans(|s| s.iter().filter(|s| s.kind == SpanKind::Server).count() == 2)
        .await;
    assert_ne!(spans[0].trace_id, spans[1].trace_id);
    assert!(spans.iter().all(|s| s.parent_span_id.is_none()));

    app.stop().await;
}

#[tokio::test]
async fn test_shutdown_flushes_spans_and_metrics_with_resource() {
    let mut config = common::test_config();
    config.telemetry.scheduled_delay_ms = 60_000;
    config.telemetry.environment = Some("test".to_string());
    let app = common::spawn_app_with(config).await;

    app.client.create_product("Flush", 1.0).await.unwrap();
    assert!(app.exporter.spans().is_empty(), "batch still pending");

    let exporter = app.stop().await;
    assert!(exporter
        .spans()
        .iter()
        .any(|s| s.name == "CreateProduct.BusinessLogic"));

    let resources = exporter.span_resources();
    assert!(!resources.is_empty());
    assert!(resources.iter().all(|r| r.service_name == "catalog-api-test"
        && r.attributes.get("deployment.environment").map(String::as_str) == Some("test")));

    let batches = exporter.metric_batches();
    let last = batches.last().unwrap();
    assert_eq!(last.resource.service_name, "catalog-api-test");
    assert!(last
        .snapshot
        .histogram("catalog.operation.duration")
        .is_some_and(|h| h.total_count() >= 1));
}

#[tokio::test]
async fn test_shutdown_keeps_spans_of_in_flight_request() {
    let mut config = common::test_config();
    config.catalog.slow_delay_ms = 500;
    let app = common::spawn_app_with(config).await;

    let client = app.client.clone();
    let call = tokio::spawn(async move { client.slow().await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let exporter = app.stop().await;
    let report = call.await.unwrap().unwrap();
    assert_eq!(report.message, "Slow operation completed");

    let spans = exporter.spans();
    let server = spans
        .iter()
        .find(|s| s.name == "GET /api/products/slow")
        .expect("server span exported after drain");
    assert!(!server.status.is_error());
    let business = spans
        .iter()
        .find(|s| s.name == "SlowEndpoint.Processing")
        .expect("business span exported after drain");
    assert_eq!(business.trace_id, server.trace_id);

    let last = exporter.metric_batches().pop().unwrap();
    let histogram = last.snapshot.histogram("catalog.operation.duration").unwrap();
    assert!(histogram.point_matching(&[("operation", "slow")]).is_some());
}

#[tokio::test]
async fn test_response_carries_request_id() {
    let app = common::spawn_app().await;
    let response = app.client.get("/health").await.unwrap();
    let id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(id.len(), 36);
    app.stop().await;
}
