//! Integration tests for the lora-engine runtime contract.
//!
//! Validates:
//! - `ModelRuntime` / `LoadedModel` can be implemented by small backends
//! - Trait objects work for dynamic dispatch (the "narrow waist" pattern)
//! - Incremental generation can be driven from another thread
//! - Cancellation is observed between fragments

use lora_engine::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

// ---------------------------------------------------------------------------
// Test backend
// ---------------------------------------------------------------------------

/// Splits the input into characters and echoes them back one by one.
struct CharEchoRuntime;

struct CharEchoModel {
    adapter: Option<PathBuf>,
    merged: bool,
    inference: bool,
}

impl ModelRuntime for CharEchoRuntime {
    fn name(&self) -> &str {
        "char-echo"
    }

    fn accelerators(&self) -> Accelerators {
        Accelerators::none()
    }

    fn load_base(&self, spec: &LoadSpec) -> Result<Box<dyn LoadedModel>> {
        if spec.base_model.is_empty() {
            return Err(EngineError::ModelLoad("empty base model".to_string()));
        }
        Ok(Box::new(CharEchoModel {
            adapter: None,
            merged: false,
            inference: false,
        }))
    }
}

impl LoadedModel for CharEchoModel {
    fn apply_adapter(&mut self, adapter_path: &Path) -> Result<()> {
        self.adapter = Some(adapter_path.to_path_buf());
        Ok(())
    }

    fn merge_adapter(&mut self) -> Result<()> {
        if self.adapter.is_none() {
            return Err(EngineError::ModelLoad("no adapter applied".to_string()));
        }
        self.merged = true;
        Ok(())
    }

    fn set_inference_mode(&mut self) {
        self.inference = true;
    }

    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String> {
        Ok(messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn generate(&self, input: &str, params: &GenerationParameters) -> Result<String> {
        self.generate_incremental(input, params, CancellationToken::new())?
            .collect()
    }

    fn generate_incremental<'a>(
        &'a self,
        input: &str,
        params: &GenerationParameters,
        cancel: CancellationToken,
    ) -> Result<FragmentIter<'a>> {
        if !self.inference {
            return Err(EngineError::Generation("not in inference mode".to_string()));
        }
        let chars: Vec<String> = input.chars().map(String::from).collect();
        let limit = params.max_new_tokens();
        Ok(Box::new(
            chars
                .into_iter()
                .take(limit)
                .take_while(move |_| !cancel.is_cancelled())
                .map(Ok),
        ))
    }
}

fn load(runtime: &dyn ModelRuntime) -> Box<dyn LoadedModel> {
    let spec = LoadSpec {
        base_model: "tiny".to_string(),
        placement: Placement::on(Device::Cpu),
        quantization: Quantization::None,
    };
    let mut model = runtime.load_base(&spec).unwrap();
    model.apply_adapter(Path::new("adapters/tiny")).unwrap();
    model.merge_adapter().unwrap();
    model.set_inference_mode();
    model
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn runtime_rejects_empty_base_model() {
    let spec = LoadSpec {
        base_model: String::new(),
        placement: Placement::on(Device::Cpu),
        quantization: Quantization::None,
    };
    let err = CharEchoRuntime.load_base(&spec).err().unwrap();
    assert!(matches!(err, EngineError::ModelLoad(_)));
}

#[test]
fn generation_requires_inference_mode() {
    let spec = LoadSpec {
        base_model: "tiny".to_string(),
        placement: Placement::on(Device::Cpu),
        quantization: Quantization::None,
    };
    let model = CharEchoRuntime.load_base(&spec).unwrap();
    let err = model
        .generate("abc", &GenerationParameters::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::Generation(_)));
}

#[test]
fn blocking_generation_respects_token_cap() {
    let model = load(&CharEchoRuntime);
    let params = GenerationParameters::new(3, 0.0, 1.0, vec![]).unwrap();
    assert_eq!(model.generate("hello", &params).unwrap(), "hel");
}

#[test]
fn runtime_usable_as_shared_trait_object() {
    let runtime: Arc<dyn ModelRuntime> = Arc::new(CharEchoRuntime);
    assert_eq!(runtime.name(), "char-echo");
    assert_eq!(runtime.accelerators(), Accelerators::none());
}

#[test]
fn incremental_generation_driven_from_worker_thread() {
    let model: Arc<dyn LoadedModel> = Arc::from(load(&CharEchoRuntime));
    let worker_model = Arc::clone(&model);

    let fragments = thread::spawn(move || {
        worker_model
            .generate_incremental(
                "abcd",
                &GenerationParameters::default(),
                CancellationToken::new(),
            )
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    })
    .join()
    .unwrap();

    assert_eq!(fragments, vec!["a", "b", "c", "d"]);
}

#[test]
fn cancellation_stops_incremental_generation() {
    let model = load(&CharEchoRuntime);
    let cancel = CancellationToken::new();
    let mut fragments = model
        .generate_incremental("abcdef", &GenerationParameters::default(), cancel.clone())
        .unwrap();

    assert_eq!(fragments.next().unwrap().unwrap(), "a");
    cancel.cancel();
    assert!(fragments.next().is_none());
}

#[test]
fn types_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<GenerationParameters>();
    assert_send_sync::<LoadSpec>();
    assert_send_sync::<EngineError>();
    assert_send_sync::<Box<dyn LoadedModel>>();
    assert_send_sync::<Arc<dyn ModelRuntime>>();
}
