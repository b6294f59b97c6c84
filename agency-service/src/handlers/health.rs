use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::services::metrics::get_metrics;
use crate::AppState;

/// Liveness probe with a database ping.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Postgres health check failed");
        e
    })?;

    Ok(Json(serde_json::json!({
        "success": true,
        "status": "healthy",
        "service": "agency-service",
        "checks": { "postgres": "up" }
    })))
}

/// Prometheus text exposition.
pub async fn metrics() -> String {
    get_metrics()
}
