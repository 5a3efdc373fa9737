//! Route handlers.
//!
//! Each handler takes the request's `TraceScope` from extensions (placed
//! there by the inbound adapter) and passes it down to the catalog.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::Serialize;

use crate::catalog::{CreateProductRequest, Product, SlowReport};
use crate::export::{PipelineStatsSnapshot, Resource};
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::observability::{MetricsSnapshot, TraceScope};

pub async fn list_products(
    State(state): State<AppState>,
    Extension(scope): Extension<TraceScope>,
) -> Result<Json<Vec<Product>>, ApiError> {
    let products = state.catalog.list(&scope).await?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Extension(scope): Extension<TraceScope>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, ApiError> {
    match state.catalog.get(&scope, id).await? {
        Some(product) => Ok(Json(product)),
        None => Err(ApiError::NotFound(format!("Product {} not found", id))),
    }
}

pub async fn create_product(
    State(state): State<AppState>,
    Extension(scope): Extension<TraceScope>,
    Json(request): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state.catalog.create(&scope, request).await?;
    let location = format!("/api/products/{}", product.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(product),
    ))
}

pub async fn slow_operation(
    State(state): State<AppState>,
    Extension(scope): Extension<TraceScope>,
) -> Result<Json<SlowReport>, ApiError> {
    Ok(Json(state.catalog.slow(&scope).await?))
}

pub async fn error_operation(
    State(state): State<AppState>,
    Extension(scope): Extension<TraceScope>,
) -> Result<StatusCode, ApiError> {
    state.catalog.error(&scope).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: String,
    pub version: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let resource = state.telemetry.resource();
    Json(HealthReport {
        status: "healthy",
        service: resource.service_name.clone(),
        version: resource.service_version.clone(),
    })
}

/// Registry snapshot plus export pipeline counters.
#[derive(Debug, Serialize)]
pub struct TelemetryReport {
    pub resource: Resource,
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub pipeline: Option<PipelineStatsSnapshot>,
}

pub async fn telemetry_metrics(State(state): State<AppState>) -> Json<TelemetryReport> {
    Json(TelemetryReport {
        resource: state.telemetry.resource().clone(),
        snapshot: state.telemetry.meters().snapshot(),
        pipeline: state.pipeline.as_ref().map(|p| p.stats()),
    })
}
