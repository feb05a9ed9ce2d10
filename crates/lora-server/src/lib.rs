//! # lora-server
//!
//! HTTP serving core for a locally hosted, adapter-tuned language model.
//!
//! The process owns exactly one model instance ([`ModelSession`]), loads it
//! lazily on first use, and runs at most one inference call at a time.
//! Responses come back either as one JSON body or as Server-Sent Events.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod session;
pub mod state;
pub mod streaming;

pub use config::{Cli, ModelConfig, ServerConfig};
pub use coordinator::{GenerationCoordinator, TokenEvent, TokenStream};
pub use error::ServerError;
pub use server::{create_router, run_server};
pub use session::{LoadOutcome, ModelSession, SessionPhase, SessionStatus};
pub use state::AppState;
