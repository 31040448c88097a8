//! Read-only HTTP API over the query engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/products/{code}` | One product by code |
//! | `GET`  | `/search?q=&limit=&complete_only=&mode=` | Ranked search hits |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "limit must be a positive integer" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `storage_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use catalog_mirror_core::models::{SearchHit, StoredRecord};
use catalog_mirror_core::search::SearchMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::CatalogError;
use crate::query::QueryEngine;

#[derive(Clone)]
struct AppState {
    engine: Arc<QueryEngine>,
}

/// Serve the API on `[server].bind` until Ctrl-C, then close the read pool.
///
/// The store is opened before binding, so a missing or unbuilt store stops
/// startup with `StorageUnavailable`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(QueryEngine::open(config).await?);
    let app = router(Arc::clone(&engine));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("catalog server listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.close().await;
    info!("server stopped");
    Ok(())
}

/// Build the router around an already-open engine.
pub fn router(engine: Arc<QueryEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/products/{code}", get(handle_product))
        .route("/search", get(handle_search))
        .layer(cors)
        .with_state(AppState { engine })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

/// Map an engine error to a response, using the [`CatalogError`] kind
/// when there is one.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<CatalogError>() {
            Some(CatalogError::InvalidParameter(msg)) => bad_request(msg.clone()),
            Some(e @ CatalogError::StorageUnavailable { .. }) => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "storage_unavailable",
                message: e.to_string(),
            },
            _ => {
                error!(error = %format!("{:#}", err), "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: err.to_string(),
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /products/{code} ============

async fn handle_product(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<StoredRecord>, AppError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(bad_request("product code must not be empty"));
    }

    state
        .engine
        .get_by_key(code)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("product not found: {}", code)))
}

// ============ GET /search ============

/// Raw query string. Parsed by hand so that every malformed value gets the
/// JSON error body rather than axum's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<String>,
    complete_only: Option<String>,
    mode: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let term = params.q.unwrap_or_default();
    let limit = match params.limit.as_deref() {
        Some(raw) => parse_limit(raw)?,
        None => state.engine.default_limit(),
    };
    let complete_only = match params.complete_only.as_deref() {
        Some(raw) => parse_flag(raw)?,
        None => false,
    };
    let mode = match params.mode.as_deref() {
        Some(raw) => raw
            .parse::<SearchMode>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => SearchMode::default(),
    };

    let results = state
        .engine
        .search_hits(&term, limit, complete_only, mode)
        .await?;
    Ok(Json(SearchResponse { results }))
}

/// Positive integer. Values above the engine maximum are clamped later.
fn parse_limit(raw: &str) -> Result<i64, CatalogError> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(CatalogError::InvalidParameter(format!(
            "limit must be a positive integer, got '{}'",
            raw
        ))),
    }
}

fn parse_flag(raw: &str) -> Result<bool, CatalogError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(CatalogError::InvalidParameter(format!(
            "complete_only must be true or false, got '{}'",
            raw
        ))),
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        anyhow::Error::from(err).into()
    }
}
