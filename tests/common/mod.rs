//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use catalog_sdk::CatalogClient;
use catalog_telemetry::config::AppConfig;
use catalog_telemetry::export::{InMemoryExporter, TelemetryExporter};
use catalog_telemetry::lifecycle::{build_server, init_telemetry_with_exporter, Shutdown, TelemetryRuntime};
use catalog_telemetry::observability::SpanData;

/// A running server wired to an in-memory exporter.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: CatalogClient,
    pub exporter: InMemoryExporter,
    pub shutdown: Shutdown,
    runtime: TelemetryRuntime,
    server: JoinHandle<()>,
}

/// Config with no simulated delays and fast span flushing.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.database.latency_ms = 0;
    config.catalog.list_delay_ms = 0;
    config.catalog.create_delay_ms = 0;
    config.catalog.slow_delay_ms = 50;
    config.catalog.error_delay_ms = 0;
    config.telemetry.service_name = "catalog-api-test".to_string();
    config.telemetry.scheduled_delay_ms = 20;
    config.telemetry.max_batch_size = 16;
    config
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

pub async fn spawn_app_with(config: AppConfig) -> TestApp {
    let exporter = InMemoryExporter::new();
    let shutdown = Shutdown::new();
    let sink: Arc<dyn TelemetryExporter> = Arc::new(exporter.clone());
    let runtime = init_telemetry_with_exporter(&config.telemetry, Some(sink)).unwrap();
    let server = build_server(&config, &runtime);

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = shutdown.clone();
    let server = tokio::spawn(async move {
        server.run(listener, stop).await.unwrap();
    });

    TestApp {
        addr,
        client: CatalogClient::new(&format!("http://{}", addr)),
        exporter,
        shutdown,
        runtime,
        server,
    }
}

impl TestApp {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Poll the exporter until `done` holds for the exported spans.
    pub async fn wait_for_spans<F>(&self, done: F) -> Vec<SpanData>
    where
        F: Fn(&[SpanData]) -> bool,
    {
        for _ in 0..200 {
            let spans = self.exporter.spans();
            if done(&spans) {
                return spans;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("spans not exported in time: {:#?}", self.exporter.spans());
    }

    /// Drain the server, then wait for the final telemetry flush.
    pub async fn stop(self) -> InMemoryExporter {
        self.shutdown.trigger();
        let _ = self.server.await;
        self.runtime.finish(Duration::from_secs(5)).await;
        self.exporter
    }
}
