//! Chat request/response types.

use lora_engine::ParamOverrides;
use serde::{Deserialize, Serialize};

/// Body of `/api/chat` and `/api/chat_stream`.
///
/// Every field is optional at the wire level so a missing `prompt` is
/// reported as a validation error rather than a decode error.
#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    pub prompt: Option<String>,
    pub max_new_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// Stop sequences, replacing the runtime's end-of-sequence markers.
    pub stop: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn overrides(&self) -> ParamOverrides {
        ParamOverrides {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            stop_sequences: self.stop.clone(),
        }
    }
}

/// Body of `/api/chat` responses, success or failure.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn success(response: String) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error),
        }
    }
}
