//! Process configuration: command line flags with environment fallbacks.
//!
//! Read once at startup and immutable afterwards.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use lora_engine::{DevicePreference, GenerationParameters, ParamError, Quantization};

pub const DEFAULT_BASE_MODEL: &str = "tencent/Hunyuan-7B-Instruct";
pub const DEFAULT_LORA_ADAPTER: &str = "saves/Hunyuan-7B-Instruct/lora/save_Test";
pub const DEFAULT_PORT: u16 = 5005;
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 4096;

/// Serve a locally hosted adapter-tuned language model over HTTP.
#[derive(Debug, Clone, Parser)]
#[command(name = "lora-serve", version)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "LORA_SERVE_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "LORA_SERVE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Verbose logging.
    #[arg(long, env = "LORA_SERVE_DEBUG")]
    pub debug: bool,

    /// Base model identifier or local path.
    #[arg(long, env = "LORA_SERVE_BASE_MODEL", default_value = DEFAULT_BASE_MODEL)]
    pub base_model: String,

    /// Directory holding the adapter weights (and tokenizer).
    #[arg(long, env = "LORA_SERVE_LORA_ADAPTER", default_value = DEFAULT_LORA_ADAPTER)]
    pub lora_adapter: PathBuf,

    /// Device preference: auto, cuda, cpu or mps.
    #[arg(long, env = "LORA_SERVE_DEVICE", default_value = "auto")]
    pub device: DevicePreference,

    /// Weight quantization: none, 4bit or 8bit.
    #[arg(long, env = "LORA_SERVE_QUANTIZATION", default_value = "none")]
    pub quantization: Quantization,

    /// Keep the adapter separate instead of folding it into the base weights.
    #[arg(long, env = "LORA_SERVE_NO_MERGE_ADAPTER")]
    pub no_merge_adapter: bool,

    /// Treat the base model as 7B-class (keeps `auto` off MPS).
    #[arg(long, env = "LORA_SERVE_LARGE_MODEL", default_value_t = true, action = ArgAction::Set)]
    pub large_model: bool,

    /// Default cap on generated tokens.
    #[arg(long, env = "LORA_SERVE_MAX_NEW_TOKENS", default_value_t = 256)]
    pub max_new_tokens: i64,

    /// Default sampling temperature (0 = greedy).
    #[arg(long, env = "LORA_SERVE_TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f64,

    /// Default nucleus sampling threshold.
    #[arg(long, env = "LORA_SERVE_TOP_P", default_value_t = 0.9)]
    pub top_p: f64,

    /// Longest accepted prompt, in characters.
    #[arg(long, env = "LORA_SERVE_MAX_PROMPT_CHARS", default_value_t = DEFAULT_MAX_PROMPT_CHARS)]
    pub max_prompt_chars: usize,

    /// Load the model at startup instead of on the first request.
    #[arg(long, env = "LORA_SERVE_PRELOAD")]
    pub preload: bool,
}

impl Cli {
    /// Validate flags into a [`ServerConfig`].
    pub fn into_config(self) -> Result<ServerConfig, ParamError> {
        let defaults = GenerationParameters::new(
            self.max_new_tokens,
            self.temperature,
            self.top_p,
            Vec::new(),
        )?;

        Ok(ServerConfig {
            bind_addr: SocketAddr::new(self.host, self.port),
            debug: self.debug,
            preload: self.preload,
            max_prompt_chars: self.max_prompt_chars,
            defaults,
            model: ModelConfig {
                base_model: self.base_model,
                lora_adapter: self.lora_adapter,
                device: self.device,
                quantization: self.quantization,
                merge_adapter: !self.no_merge_adapter,
                large_model: self.large_model,
            },
        })
    }
}

/// What to load and where.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub base_model: String,
    pub lora_adapter: PathBuf,
    pub device: DevicePreference,
    pub quantization: Quantization,
    /// Fold the adapter into the base weights after applying it.
    pub merge_adapter: bool,
    /// 7B-class model; MPS is skipped under `auto`.
    pub large_model: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_model: DEFAULT_BASE_MODEL.to_string(),
            lora_adapter: PathBuf::from(DEFAULT_LORA_ADAPTER),
            device: DevicePreference::Auto,
            quantization: Quantization::None,
            merge_adapter: true,
            large_model: true,
        }
    }
}

/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub debug: bool,
    pub preload: bool,
    /// Longest accepted prompt, in characters.
    pub max_prompt_chars: usize,
    /// Generation parameters used for fields a request leaves out.
    pub defaults: GenerationParameters,
    pub model: ModelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            debug: false,
            preload: false,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            defaults: GenerationParameters::default(),
            model: ModelConfig::default(),
        }
    }
}
