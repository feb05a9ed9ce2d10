//! Application state shared across handlers.

use std::sync::Arc;

use lora_engine::ModelRuntime;
use lora_runtime::{TelemetryHook, TracingTelemetry};

use crate::config::ServerConfig;
use crate::coordinator::GenerationCoordinator;
use crate::session::ModelSession;

#[derive(Clone)]
pub struct AppState {
    /// Owner of the single model instance.
    pub session: Arc<ModelSession>,
    /// Blocking and streamed generation over `session`.
    pub coordinator: Arc<GenerationCoordinator>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// State with generation metrics reported through `tracing`.
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: ServerConfig) -> Self {
        Self::with_telemetry(runtime, config, Arc::new(TracingTelemetry))
    }

    pub fn with_telemetry(
        runtime: Arc<dyn ModelRuntime>,
        config: ServerConfig,
        telemetry: Arc<dyn TelemetryHook>,
    ) -> Self {
        let session = ModelSession::new(runtime, config.model.clone());
        let coordinator = Arc::new(GenerationCoordinator::new(Arc::clone(&session), telemetry));
        Self {
            session,
            coordinator,
            config: Arc::new(config),
        }
    }
}
