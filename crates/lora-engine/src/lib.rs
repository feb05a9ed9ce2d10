//! # lora-engine
//!
//! The "narrow waist" of lora-serve. Defines the contract the serving core
//! requires from a model runtime ([`ModelRuntime`] and [`LoadedModel`]) plus
//! the value types that cross it. Runtimes can be swapped (transformers-style
//! safetensors, GGUF, the in-tree mock) without changing the server.
//!
//! ## Design Notes
//!
//! ### Load-time vs. inference-time access
//! Loading mutates the model (`&mut self`: adapter application, merging,
//! switching to inference mode). Once published to the session the model is
//! only reachable through `&self`. Implementations are *not* required to
//! support concurrent inference calls on one instance; the serving core
//! guarantees at most one call at a time.
//!
//! ### Streaming
//! [`LoadedModel::generate_incremental`] returns a lazy iterator instead of
//! taking a callback so the caller decides which thread drives it. The
//! iterator must check the supplied [`CancellationToken`] between fragments.

pub mod device;
pub mod params;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use device::{
    resolve_placement, Accelerators, Device, DeviceError, DevicePreference, Placement, Precision,
};
pub use params::{GenerationParameters, ParamError, ParamOverrides};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error type for all runtime operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("chat template failed: {0}")]
    Template(String),
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Lazy sequence of generated text fragments.
pub type FragmentIter<'a> = Box<dyn Iterator<Item = Result<String>> + Send + 'a>;

/// Weight quantization applied when the base model is instantiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Quantization {
    #[default]
    None,
    FourBit,
    EightBit,
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantization::None => write!(f, "none"),
            Quantization::FourBit => write!(f, "4bit"),
            Quantization::EightBit => write!(f, "8bit"),
        }
    }
}

impl FromStr for Quantization {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Quantization::None),
            "4bit" => Ok(Quantization::FourBit),
            "8bit" => Ok(Quantization::EightBit),
            other => Err(format!(
                "unknown quantization mode `{other}` (expected none, 4bit or 8bit)"
            )),
        }
    }
}

/// Chat message fed to the runtime's chat template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Everything a runtime needs to instantiate the base model.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSpec {
    /// Hugging Face style model identifier or local path.
    pub base_model: String,
    pub placement: Placement,
    pub quantization: Quantization,
}

/// Entry point of a model runtime.
pub trait ModelRuntime: Send + Sync {
    /// Short runtime name for logs.
    fn name(&self) -> &str;

    /// Accelerators this runtime can place a model on.
    fn accelerators(&self) -> Accelerators;

    /// Instantiate the base model (weights and tokenizer) on the given placement.
    fn load_base(&self, spec: &LoadSpec) -> Result<Box<dyn LoadedModel>>;
}

/// A model instance owned by the serving core.
pub trait LoadedModel: Send + Sync {
    /// Apply adapter weights on top of the base model.
    fn apply_adapter(&mut self, adapter_path: &Path) -> Result<()>;

    /// Fold the applied adapter into the base weights.
    fn merge_adapter(&mut self) -> Result<()>;

    /// Switch to inference (non-training) mode.
    fn set_inference_mode(&mut self);

    /// Render messages to the runtime's prompt format.
    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Generate a complete response.
    fn generate(&self, input: &str, params: &GenerationParameters) -> Result<String>;

    /// Generate a response fragment by fragment.
    ///
    /// The returned iterator is `Send` so it can be driven from a worker
    /// thread. It yields no fragments after logical end of generation and
    /// stops early once `cancel` is cancelled.
    fn generate_incremental<'a>(
        &'a self,
        input: &str,
        params: &GenerationParameters,
        cancel: CancellationToken,
    ) -> Result<FragmentIter<'a>>;
}
