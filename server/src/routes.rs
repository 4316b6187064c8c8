//! HTTP adapter over the rate engine.
//!
//! Every response is wrapped in [`ApiResponse`]. Handlers only translate
//! query parameters into engine calls and engine results into status codes.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use ratekeeper_common::RefreshState;
use ratekeeper_fx::{CacheStats, RateEngine, RefreshResult, SourceHealth};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Response envelope shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    fn fail(message: impl Into<String>, error: Option<String>, data: Option<T>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Health payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub version: String,
    pub source: SourceHealth,
    pub currency_count: usize,
    pub refresh_state: RefreshState,
}

/// Payload of a single-currency lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyData {
    pub currency: ratekeeper_common::Currency,
    pub from_cache: bool,
}

/// Payload of a collection lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyListData {
    pub currencies: Vec<ratekeeper_common::Currency>,
    pub count: usize,
    pub from_cache: bool,
}

#[derive(Debug, Default, Deserialize)]
struct CurrencyParams {
    cache: Option<bool>,
    include_stale: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshParams {
    force: Option<bool>,
}

/// Build the API router.
pub fn router(engine: Arc<RateEngine>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/currencies", get(list_currencies))
        .route("/api/v1/currencies/refresh", post(refresh_currencies))
        .route("/api/v1/currencies/:id", get(get_currency))
        .route("/api/v1/cache/stats", get(cache_stats))
        .layer(middleware::from_fn(log_requests))
        .with_state(engine)
}

async fn health(State(engine): State<Arc<RateEngine>>) -> Json<ApiResponse<HealthReport>> {
    let timeout = engine.config().refresh.liveness_timeout;
    let source = engine.source_health(timeout).await;

    let report = HealthReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        source,
        currency_count: engine.currency_count(),
        refresh_state: engine.refresh_state(),
    };
    Json(ApiResponse::ok("API is running", report))
}

async fn list_currencies(
    State(engine): State<Arc<RateEngine>>,
    Query(params): Query<CurrencyParams>,
) -> Json<ApiResponse<CurrencyListData>> {
    let result = engine.get_all_currencies(
        params.cache.unwrap_or(true),
        params.include_stale.unwrap_or(false),
    );

    let data = CurrencyListData {
        currencies: result.currencies,
        count: result.count,
        from_cache: result.from_cache,
    };
    Json(ApiResponse::ok(result.message, data))
}

async fn get_currency(
    State(engine): State<Arc<RateEngine>>,
    Path(id): Path<String>,
    Query(params): Query<CurrencyParams>,
) -> (StatusCode, Json<ApiResponse<CurrencyData>>) {
    let result = engine.get_currency(&id, params.cache.unwrap_or(true));

    match result.currency {
        Some(currency) if result.success => {
            let data = CurrencyData {
                currency,
                from_cache: result.from_cache,
            };
            (StatusCode::OK, Json(ApiResponse::ok(result.message, data)))
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::fail(
                result.message,
                Some("NOT_FOUND".to_string()),
                None,
            )),
        ),
    }
}

async fn refresh_currencies(
    State(engine): State<Arc<RateEngine>>,
    Query(params): Query<RefreshParams>,
) -> (StatusCode, Json<ApiResponse<RefreshResult>>) {
    let result = engine.refresh_default(params.force.unwrap_or(false)).await;
    let status = refresh_status(&result);

    let response = if result.success {
        ApiResponse::ok(result.message.clone(), result)
    } else {
        ApiResponse::fail(result.message.clone(), result.error_code.clone(), Some(result))
    };
    (status, Json(response))
}

async fn cache_stats(State(engine): State<Arc<RateEngine>>) -> Json<ApiResponse<CacheStats>> {
    Json(ApiResponse::ok("Cache statistics", engine.cache_stats()))
}

/// Map a refresh outcome to an HTTP status.
pub fn refresh_status(result: &RefreshResult) -> StatusCode {
    if result.success {
        return StatusCode::OK;
    }

    match result.error_code.as_deref() {
        Some("SOURCE_UNAVAILABLE") => StatusCode::SERVICE_UNAVAILABLE,
        Some("TIMEOUT") => StatusCode::GATEWAY_TIMEOUT,
        Some("REFRESH_IN_PROGRESS") => StatusCode::CONFLICT,
        Some("TOTAL_EXTRACTION_FAILURE") => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if path.ends_with("/health") {
        debug!(%method, %path, status, elapsed_ms, "HTTP request");
    } else {
        info!(%method, %path, status, elapsed_ms, "HTTP request");
    }
    response
}
