//! HTTP error handling and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lora_engine::{EngineError, ParamError};
use serde_json::json;

use crate::models::ChatResponse;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] ParamError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::InvalidParams(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error body used by the streaming endpoint before any event is sent.
    pub fn into_stream_response(self) -> Response {
        let status = self.log();
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }

    fn log(&self) -> StatusCode {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        status
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.log();
        (status, Json(ChatResponse::failure(self.to_string()))).into_response()
    }
}
