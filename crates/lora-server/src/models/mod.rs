//! Request/response bodies of the HTTP API.

pub mod chat;
pub mod model;

pub use chat::{ChatRequest, ChatResponse};
pub use model::{HealthResponse, LoadModelResponse, ModelStatusConfig, ModelStatusResponse};
