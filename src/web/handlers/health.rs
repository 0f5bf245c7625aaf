//! Health check handler

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::web::AppState;

/// Returns basic application health including database connectivity
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&state.database.pool()).await {
        Ok(_) => "connected",
        Err(e) => {
            warn!("Health check database query failed: {}", e);
            "disconnected"
        }
    };

    let (status, label) = if database == "connected" {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status,
        Json(json!({
            "status": label,
            "database": database,
            "activeJobs": state.supervisor.active_job_count().await,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}
