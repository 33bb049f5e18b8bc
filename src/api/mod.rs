//! HTTP API for health checks, status, and monitoring

use crate::cache::RateCache;
use crate::config::ApiConfig;
use crate::dispatch::{InFlight, TransactionDispatcher};
use crate::error::{EngineError, EngineResult};
use crate::providers::ProviderKind;
use crate::state::{TransactionStats, TransactionStore};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TransactionStore>,
    pub cache: RateCache,
    pub dispatcher: Arc<TransactionDispatcher>,
    pub providers: Vec<ProviderKind>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/stats", get(get_stats))
        .route("/processors", get(get_processors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> EngineResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|e| EngineError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - store and rate cache reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await.is_ok();
    let cache = state.cache.health_check().await.is_ok();
    let ready = database && cache;

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadinessResponse {
            ready,
            database,
            cache,
        }),
    )
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        providers: state.providers.clone(),
        in_flight: state.dispatcher.in_flight().len(),
    })
}

/// Transaction counts per canonical status
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)),
        Err(e) => {
            warn!("Stats query failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TransactionStats::default()),
            )
        }
    }
}

async fn get_processors(State(state): State<AppState>) -> impl IntoResponse {
    Json(ProcessorsResponse {
        processors: state.dispatcher.in_flight(),
    })
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    cache: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    providers: Vec<ProviderKind>,
    in_flight: usize,
}

#[derive(Serialize)]
struct ProcessorsResponse {
    processors: Vec<InFlight>,
}
