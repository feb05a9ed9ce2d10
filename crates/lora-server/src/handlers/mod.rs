//! HTTP request handlers for API endpoints.

pub mod chat;
pub mod health;
pub mod model;

pub use chat::{handle_chat, handle_chat_stream};
pub use health::handle_health;
pub use model::{handle_load_model, handle_model_status};
