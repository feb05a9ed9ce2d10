//! Model lifecycle handlers.

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    models::{LoadModelResponse, ModelStatusConfig, ModelStatusResponse},
    session::LoadOutcome,
    state::AppState,
};

/// Load the model if needed. Concurrent calls share one load.
pub async fn handle_load_model(
    State(state): State<AppState>,
) -> (StatusCode, Json<LoadModelResponse>) {
    match state.session.load().await {
        Ok(LoadOutcome::AlreadyLoaded) => (
            StatusCode::OK,
            Json(LoadModelResponse::new(true, "model already loaded")),
        ),
        Ok(LoadOutcome::Loaded) => (
            StatusCode::OK,
            Json(LoadModelResponse::new(true, "model loaded successfully")),
        ),
        Err(err) => {
            tracing::error!(error = %err, "load_model request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LoadModelResponse::new(false, err.to_string())),
            )
        }
    }
}

/// Report the lifecycle state without waiting on loads or generations.
pub async fn handle_model_status(State(state): State<AppState>) -> Json<ModelStatusResponse> {
    let status = state.session.status();
    let model = state.session.config();
    let device = match status.placement {
        Some(placement) => placement.device.to_string(),
        None => model.device.to_string(),
    };

    Json(ModelStatusResponse {
        loaded: status.is_loaded(),
        state: status.phase,
        error: status.error,
        config: ModelStatusConfig {
            base_model: model.base_model.clone(),
            lora_adapter: model.lora_adapter.display().to_string(),
            device,
        },
    })
}
