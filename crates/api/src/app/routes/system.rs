use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use gloria_infra::jobs::JobStore;

use crate::app::services::AppServices;
use crate::protection::CircuitState;

/// GET /health - liveness plus breaker and queue state
///
/// Answers 200 even while the breaker is open; the body says why
/// requests are being shed.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let breaker = services.breaker.snapshot();
    let status = match breaker.state {
        CircuitState::Closed => "ok",
        CircuitState::HalfOpen | CircuitState::Open => "degraded",
    };
    let jobs = services.jobs.stats().ok();

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "circuit_breaker": breaker,
            "jobs": jobs,
            "executor": services.executor_stats(),
        })),
    )
}
