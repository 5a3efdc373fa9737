//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, access log, timeout, body limit, panic capture)
//! - Install the inbound instrumentation on every route
//! - Bind server to listener and stop on the shutdown signal

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::get,
    Router,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::catalog::CatalogService;
use crate::config::AppConfig;
use crate::export::ExportPipeline;
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::response::panic_response;
use crate::instrumentation::trace_http;
use crate::lifecycle::Shutdown;
use crate::observability::Telemetry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogService,
    pub telemetry: Telemetry,
    /// Absent when spans are not exported.
    pub pipeline: Option<ExportPipeline>,
}

/// HTTP server for the catalog API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &AppConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: AppState) -> Router {
        let telemetry = state.telemetry.clone();

        Router::new()
            .route(
                "/api/products",
                get(handlers::list_products).post(handlers::create_product),
            )
            .route("/api/products/slow", get(handlers::slow_operation))
            .route("/api/products/error", get(handlers::error_operation))
            .route("/api/products/{id}", get(handlers::get_product))
            .route("/api/telemetry/metrics", get(handlers::telemetry_metrics))
            .route("/health", get(handlers::health))
            // Panics become 500s inside the Server span.
            .route_layer(CatchPanicLayer::custom(panic_response))
            .route_layer(middleware::from_fn_with_state(telemetry, trace_http))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(propagate_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.timeouts.request_secs,
                    )))
                    .layer(DefaultBodyLimit::max(config.listener.max_body_size)),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.signalled().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
