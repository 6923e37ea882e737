//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `{api_prefix}/search` | Natural-language search, returns `{sql, results}` |
//! | `GET`  | `/health` | Database connectivity (200 or 503) |
//! | `GET`  | `/ready` | Readiness and version |
//!
//! # Error Contract
//!
//! ```json
//! { "detail": "query must not be empty", "error_code": "INVALID_QUERY" }
//! ```
//!
//! Problems with the request or with what the model produced are reported
//! as `400` with the reason. Generator and database failures are `500` with
//! a generic message; the details go to the log only. A rejected template is
//! never echoed back.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, ServerConfig};
use crate::db;
use crate::generator::OllamaGenerator;
use crate::models::{SearchRequest, SearchResponse};
use crate::pipeline::TranslationPipeline;
use crate::prompts::PromptBook;
use crate::repository::MySqlPropertyRepository;
use crate::search::{SearchError, SearchService};

#[derive(Clone)]
pub struct AppState {
    service: Arc<SearchService>,
}

impl AppState {
    pub fn new(service: Arc<SearchService>) -> Self {
        Self { service }
    }
}

/// Wires the production stack from `config` and serves until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let prompts = Arc::new(PromptBook::load(&config.prompts)?);
    let generator = Arc::new(OllamaGenerator::new(&config.generator)?);
    let pipeline = TranslationPipeline::new(config, generator, prompts);

    let pool = db::connect(config)?;
    let repository = Arc::new(MySqlPropertyRepository::new(
        pool,
        &config.pipeline.placeholder,
    ));

    let state = AppState::new(Arc::new(SearchService::new(pipeline, repository)));
    let app = router(state, &config.server)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        search = %format!("{}/search", config.server.api_prefix),
        "server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

pub fn router(state: AppState, config: &ServerConfig) -> anyhow::Result<Router> {
    let prefix = config.api_prefix.trim_end_matches('/');

    Ok(Router::new()
        .route(&format!("{}/search", prefix), post(handle_search))
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .layer(cors_layer(&config.cors_origins)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(origins: &str) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.trim() == "*" {
        return Ok(layer.allow_origin(Any));
    }

    let list = origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| anyhow::anyhow!("invalid CORS origin in [server].cors_origins: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(list)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    error_code: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(code: &str, detail: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: code.to_string(),
        detail: detail.into(),
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        if err.is_client_facing() {
            tracing::warn!(error = %err, code = err.code(), "search rejected");
            bad_request(err.code(), err.public_message())
        } else {
            tracing::error!(error = %err, code = err.code(), "search failed");
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: err.code().to_string(),
                detail: "Failed to process search request. Check server logs.".to_string(),
            }
        }
    }
}

// ============ POST {api_prefix}/search ============

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request("INVALID_REQUEST", e.body_text()))?;
    let response = state.service.search(&request.query).await?;
    Ok(Json(response))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.service.health_check().await {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "connected",
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                database: "disconnected",
            }),
        )
    }
}

// ============ GET /ready ============

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    version: &'static str,
}

async fn handle_ready() -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}
