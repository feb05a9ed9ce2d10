//! Health check handler.

use axum::Json;

use crate::models::HealthResponse;

/// Liveness only; does not touch the model.
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}
