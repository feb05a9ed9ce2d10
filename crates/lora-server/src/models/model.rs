//! Model lifecycle and health response types.

use serde::{Deserialize, Serialize};

use crate::session::SessionPhase;

/// Body of `/api/load_model` responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadModelResponse {
    pub success: bool,
    pub message: String,
}

impl LoadModelResponse {
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
        }
    }
}

/// Body of `/api/model_status`.
#[derive(Debug, Serialize)]
pub struct ModelStatusResponse {
    pub loaded: bool,
    pub state: SessionPhase,
    /// Most recent load failure, if the session is in the failed state.
    pub error: Option<String>,
    pub config: ModelStatusConfig,
}

#[derive(Debug, Serialize)]
pub struct ModelStatusConfig {
    pub base_model: String,
    pub lora_adapter: String,
    /// Configured preference, or the resolved device once loaded.
    pub device: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
