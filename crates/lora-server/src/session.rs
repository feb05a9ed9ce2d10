//! Model session: owns the single model instance for the process.
//!
//! Two locks with distinct jobs:
//! - `state` (short, synchronous) guards the lifecycle. Exactly one caller
//!   starts a load; everyone else waits on `state_changed` for the outcome.
//! - `generation` (async, FIFO) admits one inference call at a time. The
//!   loaded model is only reachable through a [`GenerationPermit`].
//!
//! Lifecycle: `Unloaded -> Loading -> Ready | Failed`, and `Failed -> Loading`
//! on the next request. There is no unload.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use lora_engine::{
    resolve_placement, Device, DevicePreference, EngineError, LoadSpec, LoadedModel, ModelRuntime,
    Placement,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::config::ModelConfig;

/// Lifecycle phase as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// Point-in-time snapshot of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    /// Where the model lives, once ready.
    pub placement: Option<Placement>,
    /// Message of the most recent load failure.
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn is_loaded(&self) -> bool {
        self.phase == SessionPhase::Ready
    }
}

/// Result of an explicit load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The model was already ready; nothing happened.
    AlreadyLoaded,
    /// This call (or a concurrent one it waited on) completed a load.
    Loaded,
}

struct ReadyModel {
    model: Box<dyn LoadedModel>,
    placement: Placement,
}

enum ModelState {
    Unloaded,
    Loading,
    Ready(Arc<ReadyModel>),
    Failed(String),
}

/// Exclusive right to run one inference call.
///
/// The generation lock is released when the permit is dropped.
pub struct GenerationPermit {
    ready: Arc<ReadyModel>,
    _guard: OwnedMutexGuard<()>,
}

impl GenerationPermit {
    pub fn model(&self) -> &dyn LoadedModel {
        self.ready.model.as_ref()
    }

    pub fn placement(&self) -> Placement {
        self.ready.placement
    }
}

/// Process-wide owner of the model.
pub struct ModelSession {
    runtime: Arc<dyn ModelRuntime>,
    config: ModelConfig,
    state: Mutex<ModelState>,
    state_changed: Notify,
    generation: Arc<tokio::sync::Mutex<()>>,
}

impl ModelSession {
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: ModelConfig) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            config,
            state: Mutex::new(ModelState::Unloaded),
            state_changed: Notify::new(),
            generation: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Snapshot of the lifecycle. Never blocks on a load or a generation.
    pub fn status(&self) -> SessionStatus {
        match &*self.state.lock() {
            ModelState::Unloaded => SessionStatus {
                phase: SessionPhase::Unloaded,
                placement: None,
                error: None,
            },
            ModelState::Loading => SessionStatus {
                phase: SessionPhase::Loading,
                placement: None,
                error: None,
            },
            ModelState::Ready(ready) => SessionStatus {
                phase: SessionPhase::Ready,
                placement: Some(ready.placement),
                error: None,
            },
            ModelState::Failed(message) => SessionStatus {
                phase: SessionPhase::Failed,
                placement: None,
                error: Some(message.clone()),
            },
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(&*self.state.lock(), ModelState::Ready(_))
    }

    /// Whether an inference call currently holds the generation lock.
    pub fn generation_busy(&self) -> bool {
        self.generation.try_lock().is_err()
    }

    /// Load the model if it is not ready yet.
    pub async fn load(self: &Arc<Self>) -> Result<LoadOutcome, EngineError> {
        self.ready().await.map(|(_, outcome)| outcome)
    }

    /// Block until the model is ready, loading it if needed.
    pub async fn ensure_loaded(self: &Arc<Self>) -> Result<(), EngineError> {
        self.ready().await.map(|_| ())
    }

    /// Make sure the model is ready, then wait for the generation lock.
    ///
    /// Waiters are admitted in arrival order.
    pub async fn acquire(self: &Arc<Self>) -> Result<GenerationPermit, EngineError> {
        let (ready, _) = self.ready().await?;
        let guard = Arc::clone(&self.generation).lock_owned().await;
        Ok(GenerationPermit {
            ready,
            _guard: guard,
        })
    }

    async fn ready(self: &Arc<Self>) -> Result<(Arc<ReadyModel>, LoadOutcome), EngineError> {
        let mut notified = {
            let mut state = self.state.lock();
            if let ModelState::Ready(ready) = &*state {
                return Ok((Arc::clone(ready), LoadOutcome::AlreadyLoaded));
            }
            if matches!(*state, ModelState::Loading) {
                debug!("model load in progress, waiting");
            } else {
                *state = ModelState::Loading;
                self.spawn_load();
            }
            self.state_changed.notified()
        };

        loop {
            notified.await;
            notified = {
                let state = self.state.lock();
                match &*state {
                    ModelState::Ready(ready) => {
                        return Ok((Arc::clone(ready), LoadOutcome::Loaded));
                    }
                    ModelState::Failed(message) => {
                        return Err(EngineError::ModelLoad(message.clone()));
                    }
                    ModelState::Loading | ModelState::Unloaded => self.state_changed.notified(),
                }
            };
        }
    }

    // The load runs to completion on a blocking thread even if every caller
    // waiting on it goes away.
    fn spawn_load(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| session.run_load()))
                .unwrap_or_else(|_| {
                    Err(EngineError::ModelLoad(
                        "model runtime panicked during load".to_string(),
                    ))
                });
            session.finish_load(outcome);
        });
    }

    fn run_load(&self) -> Result<ReadyModel, EngineError> {
        let started = Instant::now();
        let accelerators = self.runtime.accelerators();
        let placement = resolve_placement(self.config.device, accelerators, self.config.large_model)
            .map_err(|err| EngineError::ModelLoad(err.to_string()))?;

        if self.config.device == DevicePreference::Auto
            && accelerators.mps
            && placement.device == Device::Cpu
        {
            info!("MPS is available but the model is large, using CPU");
        }

        info!(
            runtime = self.runtime.name(),
            base_model = %self.config.base_model,
            placement = %placement,
            quantization = %self.config.quantization,
            "loading base model"
        );
        let spec = LoadSpec {
            base_model: self.config.base_model.clone(),
            placement,
            quantization: self.config.quantization,
        };
        let mut model = self.runtime.load_base(&spec).map_err(as_load_error)?;

        info!(adapter = %self.config.lora_adapter.display(), "applying adapter");
        model
            .apply_adapter(&self.config.lora_adapter)
            .map_err(as_load_error)?;

        if self.config.merge_adapter {
            debug!("merging adapter into base weights");
            model.merge_adapter().map_err(as_load_error)?;
        }
        model.set_inference_mode();

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            placement = %placement,
            "model ready"
        );
        Ok(ReadyModel { model, placement })
    }

    fn finish_load(&self, outcome: Result<ReadyModel, EngineError>) {
        {
            let mut state = self.state.lock();
            *state = match outcome {
                Ok(ready) => ModelState::Ready(Arc::new(ready)),
                Err(err) => {
                    error!(error = %err, "model load failed");
                    ModelState::Failed(load_message(err))
                }
            };
        }
        self.state_changed.notify_waiters();
    }
}

fn as_load_error(err: EngineError) -> EngineError {
    match err {
        EngineError::ModelLoad(_) => err,
        other => EngineError::ModelLoad(other.to_string()),
    }
}

fn load_message(err: EngineError) -> String {
    match err {
        EngineError::ModelLoad(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lora_engine::{Accelerators, Precision};
    use lora_runtime::{LoadStep, MockRuntime};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::timeout;

    fn session_with(runtime: &Arc<MockRuntime>) -> Arc<ModelSession> {
        ModelSession::new(runtime.clone(), ModelConfig::default())
    }

    #[tokio::test]
    async fn starts_unloaded() {
        let runtime = Arc::new(MockRuntime::new());
        let session = session_with(&runtime);

        let status = session.status();
        assert_eq!(status.phase, SessionPhase::Unloaded);
        assert!(!status.is_loaded());
        assert_eq!(status.error, None);
        assert_eq!(runtime.load_count(), 0);
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let runtime = Arc::new(MockRuntime::new());
        let session = session_with(&runtime);

        assert_eq!(session.load().await.unwrap(), LoadOutcome::Loaded);
        assert_eq!(session.load().await.unwrap(), LoadOutcome::AlreadyLoaded);
        session.ensure_loaded().await.unwrap();

        assert_eq!(runtime.load_count(), 1);
        let status = session.status();
        assert!(status.is_loaded());
        assert_eq!(
            status.placement,
            Some(Placement {
                device: Device::Cpu,
                precision: Precision::BFloat16,
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_load() {
        let runtime = Arc::new(MockRuntime::new().with_load_delay(Duration::from_millis(100)));
        let session = session_with(&runtime);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move { session.ensure_loaded().await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(runtime.load_count(), 1);
        assert!(session.is_loaded());
    }

    #[tokio::test]
    async fn status_reports_loading_while_in_progress() {
        let runtime = Arc::new(MockRuntime::new().with_load_delay(Duration::from_millis(200)));
        let session = session_with(&runtime);

        let loader = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.load().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.status().phase, SessionPhase::Loading);

        assert_eq!(loader.await.unwrap().unwrap(), LoadOutcome::Loaded);
        assert_eq!(session.status().phase, SessionPhase::Ready);
    }

    #[tokio::test]
    async fn failed_load_is_reported_then_retried() {
        let runtime = Arc::new(MockRuntime::new().failing_loads(1));
        let session = session_with(&runtime);

        let err = session.load().await.unwrap_err();
        assert!(matches!(err, EngineError::ModelLoad(_)));
        let status = session.status();
        assert_eq!(status.phase, SessionPhase::Failed);
        assert!(status.error.is_some());
        assert!(!session.is_loaded());

        assert_eq!(session.load().await.unwrap(), LoadOutcome::Loaded);
        assert_eq!(runtime.load_count(), 2);
        assert_eq!(session.status().error, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_waiters_observe_the_same_failure() {
        let runtime = Arc::new(
            MockRuntime::new()
                .failing_loads(1)
                .with_load_delay(Duration::from_millis(100)),
        );
        let session = session_with(&runtime);

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.ensure_loaded().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = session.ensure_loaded().await;

        assert!(first.await.unwrap().is_err());
        assert!(second.is_err());
        assert_eq!(runtime.load_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_device_fails_the_load() {
        let runtime = Arc::new(MockRuntime::new());
        let config = ModelConfig {
            device: DevicePreference::Cuda,
            ..ModelConfig::default()
        };
        let session = ModelSession::new(runtime.clone(), config);

        let err = session.load().await.unwrap_err();
        assert!(err.to_string().contains("cuda"));
        assert_eq!(session.status().phase, SessionPhase::Failed);
        assert_eq!(runtime.load_count(), 0);
    }

    #[tokio::test]
    async fn auto_skips_mps_for_large_models() {
        let runtime = Arc::new(MockRuntime::new().with_accelerators(Accelerators {
            cuda: false,
            mps: true,
        }));
        let session = session_with(&runtime);

        session.load().await.unwrap();
        assert_eq!(session.status().placement.map(|p| p.device), Some(Device::Cpu));
    }

    #[tokio::test]
    async fn empty_base_model_is_a_load_error() {
        let runtime = Arc::new(MockRuntime::new());
        let config = ModelConfig {
            base_model: String::new(),
            ..ModelConfig::default()
        };
        let session = ModelSession::new(runtime, config);

        assert!(matches!(
            session.load().await,
            Err(EngineError::ModelLoad(_))
        ));
    }

    #[tokio::test]
    async fn load_applies_adapter_merges_then_enters_inference_mode() {
        let runtime = Arc::new(MockRuntime::new());
        let config = ModelConfig {
            lora_adapter: PathBuf::from("adapters/tuned"),
            ..ModelConfig::default()
        };
        let session = ModelSession::new(runtime.clone(), config);

        session.load().await.unwrap();
        assert_eq!(
            runtime.load_steps(),
            vec![
                LoadStep::Base(Placement::on(Device::Cpu)),
                LoadStep::Adapter(PathBuf::from("adapters/tuned")),
                LoadStep::Merge,
                LoadStep::InferenceMode,
            ]
        );
    }

    #[tokio::test]
    async fn load_without_merge_keeps_adapter_separate() {
        let runtime = Arc::new(MockRuntime::new());
        let config = ModelConfig {
            merge_adapter: false,
            ..ModelConfig::default()
        };
        let session = ModelSession::new(runtime.clone(), config.clone());

        session.load().await.unwrap();
        assert_eq!(
            runtime.load_steps(),
            vec![
                LoadStep::Base(Placement::on(Device::Cpu)),
                LoadStep::Adapter(config.lora_adapter),
                LoadStep::InferenceMode,
            ]
        );
        let permit = session.acquire().await.unwrap();
        assert!(permit
            .model()
            .generate("hi", &lora_engine::GenerationParameters::default())
            .is_ok());
    }

    #[tokio::test]
    async fn permits_are_exclusive() {
        let runtime = Arc::new(MockRuntime::new());
        let session = session_with(&runtime);

        let first = session.acquire().await.unwrap();
        assert!(session.generation_busy());
        assert_eq!(first.placement().device, Device::Cpu);

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.acquire().await.map(|_| ()) })
        };
        assert!(timeout(Duration::from_millis(50), async {
            while !waiter.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_err());

        drop(first);
        waiter.await.unwrap().unwrap();
        assert!(!session.generation_busy());
    }

    #[tokio::test]
    async fn acquire_loads_on_demand() {
        let runtime = Arc::new(MockRuntime::new());
        let session = session_with(&runtime);

        let permit = session.acquire().await.unwrap();
        let out = permit
            .model()
            .apply_chat_template(&[lora_engine::ChatMessage::user("hi")])
            .unwrap();
        assert!(out.contains("hi"));
        assert_eq!(runtime.load_count(), 1);
    }
}
