use axum::Json;
use chrono::Utc;
use shared_types::HealthResponse;

/// Liveness probe; no auth, no store access.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}
