//! Catalog business logic.
//!
//! # Responsibilities
//! - Implement list / get / create / slow / error
//! - Wrap each operation in one Internal business span with domain tags
//! - Record `catalog.operation.duration` while that span is active
//!
//! # Design Decisions
//! - Absence is `Ok(None)`, not an error: the span stays Unset
//! - Failures mark the business span and then propagate unchanged

use std::sync::Arc;
use std::time::Instant;

use crate::catalog::error::CatalogError;
use crate::catalog::model::{CreateProductRequest, Product, SlowReport};
use crate::catalog::repository::ProductRepository;
use crate::config::CatalogConfig;
use crate::observability::metrics::CATALOG_OPERATION_DURATION;
use crate::observability::{MeterRegistry, Span, TraceScope};

pub const SIMULATED_ERROR_MESSAGE: &str = "Simulated error for testing";

#[derive(Clone)]
pub struct CatalogService {
    repository: ProductRepository,
    meters: Arc<MeterRegistry>,
    config: CatalogConfig,
}

impl CatalogService {
    pub fn new(repository: ProductRepository, meters: Arc<MeterRegistry>, config: CatalogConfig) -> Self {
        Self {
            repository,
            meters,
            config,
        }
    }

    /// Most recent products, newest first.
    pub async fn list(&self, scope: &TraceScope) -> Result<Vec<Product>, CatalogError> {
        let started = Instant::now();
        let mut span = scope.start_span("GetProducts.BusinessLogic");
        span.set_tag("operation", "fetch_products");

        tokio::time::sleep(self.config.list_delay()).await;

        let result = self
            .repository
            .list_recent(scope, self.config.recent_limit)
            .await
            .map_err(CatalogError::from);
        if let Ok(products) = &result {
            span.set_tag("products.count", products.len());
        }

        self.finish(scope, span, "list", started, result)
    }

    pub async fn get(&self, scope: &TraceScope, id: i64) -> Result<Option<Product>, CatalogError> {
        let started = Instant::now();
        let mut span = scope.start_span("GetProduct.BusinessLogic");
        span.set_tag("product.id", id);

        let result = self
            .repository
            .find(scope, id)
            .await
            .map_err(CatalogError::from);
        if let Ok(found) = &result {
            span.set_tag("result", if found.is_some() { "found" } else { "not_found" });
        }

        self.finish(scope, span, "get", started, result)
    }

    pub async fn create(
        &self,
        scope: &TraceScope,
        request: CreateProductRequest,
    ) -> Result<Product, CatalogError> {
        let started = Instant::now();
        let mut span = scope.start_span("CreateProduct.BusinessLogic");
        let name = request.name.trim();
        span.set_tag("product.name", name);
        span.set_tag("product.price", request.price);

        tokio::time::sleep(self.config.create_delay()).await;

        let result = match validate(&request) {
            Ok(()) => self
                .repository
                .insert(scope, name, request.price)
                .await
                .map_err(CatalogError::from),
            Err(e) => Err(e),
        };
        if let Ok(product) = &result {
            span.set_tag("product.created_id", product.id);
            tracing::info!(product_id = product.id, name = %product.name, "Product created");
        }

        self.finish(scope, span, "create", started, result)
    }

    /// Long-running operation followed by a count query.
    pub async fn slow(&self, scope: &TraceScope) -> Result<SlowReport, CatalogError> {
        let started = Instant::now();
        let mut span = scope.start_span("SlowEndpoint.Processing");

        tokio::time::sleep(self.config.slow_delay()).await;

        let result = self
            .repository
            .count(scope)
            .await
            .map(|total| SlowReport {
                message: "Slow operation completed".to_string(),
                total_products: total,
            })
            .map_err(CatalogError::from);
        if let Ok(report) = &result {
            span.set_tag("total.products", report.total_products);
        }

        self.finish(scope, span, "slow", started, result)
    }

    /// Always fails with `InvalidOperation`.
    pub async fn error(&self, scope: &TraceScope) -> Result<(), CatalogError> {
        let started = Instant::now();
        let span = scope.start_span("ErrorEndpoint.Processing");

        tokio::time::sleep(self.config.error_delay()).await;

        let result = Err(CatalogError::InvalidOperation(
            SIMULATED_ERROR_MESSAGE.to_string(),
        ));
        self.finish(scope, span, "error", started, result)
    }

    fn finish<T>(
        &self,
        scope: &TraceScope,
        mut span: Span,
        operation: &str,
        started: Instant,
        result: Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => {
                span.record_error(e);
                tracing::warn!(operation, error = %e, "Catalog operation failed");
                "error"
            }
        };

        self.meters.record(
            scope,
            CATALOG_OPERATION_DURATION,
            started.elapsed().as_secs_f64(),
            &[("operation", operation), ("outcome", outcome)],
        );

        span.end();
        result
    }
}

fn validate(request: &CreateProductRequest) -> Result<(), CatalogError> {
    if request.name.trim().is_empty() {
        return Err(CatalogError::Validation("Product name is required".to_string()));
    }
    if !request.price.is_finite() || request.price < 0.0 {
        return Err(CatalogError::Validation(
            "Price must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}
