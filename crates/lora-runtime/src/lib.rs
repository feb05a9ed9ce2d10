//! # lora-runtime
//!
//! Runtime-side building blocks for lora-serve: accelerator probing gated by
//! cargo features (`cuda`, `metal`), the deterministic [`MockRuntime`] used by
//! the server binary and tests, and telemetry hooks (time to first fragment,
//! fragments/s).

pub mod backend;
pub mod mock;
pub mod telemetry;

pub use backend::probe_accelerators;
pub use mock::{LoadStep, MockModel, MockRuntime, DEFAULT_STOP_SEQUENCES};
pub use telemetry::{
    GenerationMode, InferenceMetrics, InferenceTimer, LogTelemetry, NoopTelemetry, TelemetryHook,
    TracingTelemetry,
};
