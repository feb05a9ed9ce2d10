//! Deterministic mock model runtime.
//!
//! [`MockRuntime`] implements the full runtime contract without weights: it
//! "generates" a scripted reply split into word-sized fragments, honoring
//! `max_new_tokens`, stop sequences and cancellation. Builder methods inject
//! load failures, mid-stream failures and per-fragment latency for tests.
//! Sampling parameters (temperature, top-p) do not affect the output.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use lora_engine::{
    Accelerators, CancellationToken, ChatMessage, EngineError, FragmentIter, GenerationParameters,
    LoadSpec, LoadedModel, ModelRuntime, Placement, Result,
};

/// End-of-sequence markers used when a request supplies no stop sequences.
pub const DEFAULT_STOP_SEQUENCES: &[&str] = &["</s>", "<|endoftext|>"];

const DEFAULT_REPLY: &str =
    " Hello! I am a locally served model with a tuned adapter. How can I help you today?\n";

#[derive(Debug, Clone)]
struct Script {
    reply: String,
    fragment_delay: Duration,
    load_delay: Duration,
    fail_generation_after: Option<usize>,
    chat_template: bool,
    accelerators: Accelerators,
}

/// One load-time step, as recorded by [`MockRuntime::load_steps`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStep {
    Base(Placement),
    Adapter(PathBuf),
    Merge,
    InferenceMode,
}

/// Mock runtime with scripted behaviour.
#[derive(Debug)]
pub struct MockRuntime {
    script: Script,
    loads: AtomicUsize,
    load_failures: AtomicUsize,
    journal: Arc<Mutex<Vec<LoadStep>>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            script: Script {
                reply: DEFAULT_REPLY.to_string(),
                fragment_delay: Duration::ZERO,
                load_delay: Duration::ZERO,
                fail_generation_after: None,
                chat_template: true,
                accelerators: Accelerators::none(),
            },
            loads: AtomicUsize::new(0),
            load_failures: AtomicUsize::new(0),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Text the model produces for every prompt.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.script.reply = reply.into();
        self
    }

    /// Sleep this long before producing each fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.script.fragment_delay = delay;
        self
    }

    /// Sleep this long inside `load_base`.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.script.load_delay = delay;
        self
    }

    /// Accelerators reported to the placement logic.
    pub fn with_accelerators(mut self, accelerators: Accelerators) -> Self {
        self.script.accelerators = accelerators;
        self
    }

    /// Fail the next `count` calls to `load_base`.
    pub fn failing_loads(self, count: usize) -> Self {
        self.load_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail generation after `fragments` fragments have been produced.
    pub fn failing_after(mut self, fragments: usize) -> Self {
        self.script.fail_generation_after = Some(fragments);
        self
    }

    /// Make `apply_chat_template` fail, exercising the fallback prompt format.
    pub fn without_chat_template(mut self) -> Self {
        self.script.chat_template = false;
        self
    }

    /// Number of times `load_base` has been called.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Successful load steps of every model this runtime produced, in order.
    pub fn load_steps(&self) -> Vec<LoadStep> {
        self.journal.lock().clone()
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn accelerators(&self) -> Accelerators {
        self.script.accelerators
    }

    fn load_base(&self, spec: &LoadSpec) -> Result<Box<dyn LoadedModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        if !self.script.load_delay.is_zero() {
            thread::sleep(self.script.load_delay);
        }

        let refused = self
            .load_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(EngineError::ModelLoad(format!(
                "mock runtime refused to load `{}`",
                spec.base_model
            )));
        }

        if spec.base_model.trim().is_empty() {
            return Err(EngineError::ModelLoad("base model path is empty".to_string()));
        }

        tracing::debug!(
            base_model = %spec.base_model,
            placement = %spec.placement,
            quantization = %spec.quantization,
            "mock base model instantiated"
        );

        self.journal.lock().push(LoadStep::Base(spec.placement));
        Ok(Box::new(MockModel {
            adapter: None,
            inference_mode: false,
            script: self.script.clone(),
            journal: Arc::clone(&self.journal),
        }))
    }
}

/// Model instance produced by [`MockRuntime`].
#[derive(Debug)]
pub struct MockModel {
    adapter: Option<PathBuf>,
    inference_mode: bool,
    script: Script,
    journal: Arc<Mutex<Vec<LoadStep>>>,
}

impl LoadedModel for MockModel {
    fn apply_adapter(&mut self, adapter_path: &Path) -> Result<()> {
        if adapter_path.as_os_str().is_empty() {
            return Err(EngineError::ModelLoad("adapter path is empty".to_string()));
        }
        self.adapter = Some(adapter_path.to_path_buf());
        self.journal
            .lock()
            .push(LoadStep::Adapter(adapter_path.to_path_buf()));
        Ok(())
    }

    fn merge_adapter(&mut self) -> Result<()> {
        if self.adapter.is_none() {
            return Err(EngineError::ModelLoad("no adapter to merge".to_string()));
        }
        self.journal.lock().push(LoadStep::Merge);
        Ok(())
    }

    fn set_inference_mode(&mut self) {
        self.inference_mode = true;
        self.journal.lock().push(LoadStep::InferenceMode);
    }

    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String> {
        if !self.script.chat_template {
            return Err(EngineError::Template("tokenizer has no chat template".to_string()));
        }
        let mut rendered = String::new();
        for message in messages {
            rendered.push_str(&format!("<|{}|>\n{}\n", message.role, message.content));
        }
        rendered.push_str("<|assistant|>\n");
        Ok(rendered)
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
        if !self.inference_mode {
            return Err(EngineError::Generation("model is not in inference mode".to_string()));
        }
        if input.is_empty() {
            return Err(EngineError::Generation("empty input".to_string()));
        }

        let stop_sequences = if params.stop_sequences().is_empty() {
            DEFAULT_STOP_SEQUENCES.iter().map(|s| s.to_string()).collect()
        } else {
            params.stop_sequences().to_vec()
        };

        Ok(Box::new(MockFragments {
            pieces: split_fragments(&self.script.reply).into_iter(),
            produced: String::new(),
            sent: 0,
            emitted: 0,
            max_new_tokens: params.max_new_tokens(),
            stop_sequences,
            fail_after: self.script.fail_generation_after,
            delay: self.script.fragment_delay,
            cancel,
            finished: false,
        }))
    }
}

struct MockFragments {
    pieces: std::vec::IntoIter<String>,
    produced: String,
    /// Bytes of `produced` already yielded.
    sent: usize,
    /// Reply pieces consumed, counted against `max_new_tokens`.
    emitted: usize,
    max_new_tokens: usize,
    stop_sequences: Vec<String>,
    fail_after: Option<usize>,
    delay: Duration,
    cancel: CancellationToken,
    finished: bool,
}

impl MockFragments {
    fn stop_position(&self) -> Option<usize> {
        self.stop_sequences
            .iter()
            .filter_map(|stop| self.produced.find(stop.as_str()))
            .min()
    }

    /// Length of the longest tail of `produced` that could still grow into a
    /// stop sequence. That tail is not yielded until it is resolved.
    fn held_back(&self) -> usize {
        self.stop_sequences
            .iter()
            .filter_map(|stop| {
                (1..stop.len()).rev().find(|&n| {
                    stop.is_char_boundary(n) && self.produced.ends_with(&stop[..n])
                })
            })
            .max()
            .unwrap_or(0)
    }

    fn flush(&mut self) -> Option<Result<String>> {
        self.finished = true;
        let rest = &self.produced[self.sent..];
        (!rest.is_empty()).then(|| Ok(rest.to_string()))
    }
}

impl Iterator for MockFragments {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.cancel.is_cancelled() {
            return None;
        }
        if self.emitted >= self.max_new_tokens {
            return self.flush();
        }

        if self.fail_after == Some(self.emitted) {
            self.finished = true;
            return Some(Err(EngineError::Generation(format!(
                "mock runtime failed after {} fragments",
                self.emitted
            ))));
        }

        let Some(piece) = self.pieces.next() else {
            return self.flush();
        };

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        self.produced.push_str(&piece);
        self.emitted += 1;

        if let Some(stop_at) = self.stop_position() {
            // Text before the stop marker is visible; the marker and the rest are not.
            self.finished = true;
            let visible = &self.produced[self.sent..stop_at.max(self.sent)];
            return (!visible.is_empty()).then(|| Ok(visible.to_string()));
        }

        // May be empty while a partial stop marker is pending.
        let safe = (self.produced.len() - self.held_back()).max(self.sent);
        let fragment = self.produced[self.sent..safe].to_string();
        self.sent = safe;
        Some(Ok(fragment))
    }
}

/// Split text into word-sized fragments, each carrying its leading whitespace.
fn split_fragments(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_whitespace() && current.chars().any(|c| !c.is_whitespace()) {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
