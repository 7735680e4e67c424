use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

use crate::{errors::ServiceError, handlers::AppState, ApiResponse};

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .route("/status", get(api_status))
}

/// Liveness check: answers as long as the service is running
async fn liveness_check() -> impl IntoResponse {
    Json(json!({
        "status": ComponentStatus::Up,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": get_uptime_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Readiness check: the lineage tables live in the database, so no database means no traces
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let db_result = state.db.ping().await;
    let db_latency = start.elapsed().as_millis() as u64;

    let (status_code, status) = match &db_result {
        Ok(()) => (StatusCode::OK, ComponentStatus::Up),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, ComponentStatus::Down),
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "checks": {
                "database": {
                    "status": status,
                    "latency_ms": db_latency,
                    "error": db_result.err().map(|e| e.to_string())
                }
            }
        })),
    )
}

async fn api_status(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let traceability = state.traceability.config();
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "stateset-traceability",
        "environment": state.config.environment,
        "recall_concurrency": traceability.recall_concurrency,
        "recall_max_spools": traceability.recall_max_spools,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}
