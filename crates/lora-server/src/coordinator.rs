//! Generation coordinator: turns a validated prompt into text, either as one
//! string or as an ordered stream of [`TokenEvent`]s.
//!
//! Runtime calls are blocking, so they run on `spawn_blocking` threads while
//! holding a [`GenerationPermit`]. Streaming hands fragments to the async side
//! through a bounded channel.

use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream};
use lora_engine::{
    CancellationToken, ChatMessage, EngineError, GenerationParameters, LoadedModel,
};
use lora_runtime::{GenerationMode, InferenceTimer, TelemetryHook};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::{GenerationPermit, ModelSession};

/// Fragments buffered between the worker thread and the transport.
pub const FRAGMENT_CHANNEL_CAPACITY: usize = 32;

/// One event of a streamed generation.
///
/// A stream carries zero or more `Fragment`s followed by exactly one of
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Fragment(String),
    Done,
    Error(String),
}

impl TokenEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TokenEvent::Fragment(_))
    }
}

/// Render `prompt` as a single user turn, falling back to the plain format
/// when the runtime has no usable chat template.
pub fn format_prompt(model: &dyn LoadedModel, prompt: &str) -> String {
    match model.apply_chat_template(&[ChatMessage::user(prompt)]) {
        Ok(input) => input,
        Err(err) => {
            warn!(error = %err, "chat template failed, using fallback prompt format");
            fallback_prompt(prompt)
        }
    }
}

pub fn fallback_prompt(prompt: &str) -> String {
    format!("<|startoftext|>{prompt}<|extra_0|>")
}

pub struct GenerationCoordinator {
    session: Arc<ModelSession>,
    telemetry: Arc<dyn TelemetryHook>,
}

impl GenerationCoordinator {
    pub fn new(session: Arc<ModelSession>, telemetry: Arc<dyn TelemetryHook>) -> Self {
        Self { session, telemetry }
    }

    pub fn session(&self) -> &Arc<ModelSession> {
        &self.session
    }

    /// Generate a complete response, trimmed of surrounding whitespace.
    ///
    /// Loads the model on demand. No partial output is returned on failure.
    pub async fn generate(
        &self,
        prompt: &str,
        params: GenerationParameters,
    ) -> Result<String, EngineError> {
        let permit = self.session.acquire().await?;
        let prompt = prompt.to_owned();
        let telemetry = Arc::clone(&self.telemetry);

        let output = tokio::task::spawn_blocking(move || {
            let mut timer = InferenceTimer::new(
                permit.placement().device,
                GenerationMode::Blocking,
                prompt.chars().count(),
                telemetry,
            );
            let input = format_prompt(permit.model(), &prompt);
            let output = permit.model().generate(&input, &params);
            if output.is_ok() {
                timer.mark_fragment();
            }
            timer.finish();
            output
        })
        .await
        .map_err(|err| EngineError::Generation(format!("generation worker failed: {err}")))??;

        Ok(output.trim().to_string())
    }

    /// Start a streamed generation.
    ///
    /// Returns once the model is ready and the generation lock is held, so
    /// load failures surface here rather than inside the stream.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        params: GenerationParameters,
    ) -> Result<TokenStream, EngineError> {
        let permit = Arc::new(self.session.acquire().await?);
        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let worker = StreamWorker {
            permit: Arc::clone(&permit),
            prompt: prompt.to_owned(),
            params,
            cancel: cancel.clone(),
            tx,
            telemetry: Arc::clone(&self.telemetry),
        };
        tokio::task::spawn_blocking(move || worker.run());

        Ok(TokenStream {
            rx,
            cancel,
            permit: Some(permit),
            terminated: false,
        })
    }
}

enum StreamEnd {
    Finished,
    Cancelled,
}

struct StreamWorker {
    permit: Arc<GenerationPermit>,
    prompt: String,
    params: GenerationParameters,
    cancel: CancellationToken,
    tx: mpsc::Sender<TokenEvent>,
    telemetry: Arc<dyn TelemetryHook>,
}

impl StreamWorker {
    fn run(self) {
        let StreamWorker {
            permit,
            prompt,
            params,
            cancel,
            tx,
            telemetry,
        } = self;

        let mut timer = InferenceTimer::new(
            permit.placement().device,
            GenerationMode::Streaming,
            prompt.chars().count(),
            telemetry,
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let input = format_prompt(permit.model(), &prompt);
            forward_fragments(permit.model(), &input, &params, &cancel, &tx, &mut timer)
        }))
        .unwrap_or_else(|_| {
            Err(EngineError::Generation(
                "model runtime panicked during generation".to_string(),
            ))
        });
        timer.finish();

        let terminal = match outcome {
            Ok(StreamEnd::Finished) => Some(TokenEvent::Done),
            Ok(StreamEnd::Cancelled) => {
                debug!("stream cancelled by consumer");
                None
            }
            Err(err) => {
                warn!(error = %err, "streaming generation failed");
                Some(TokenEvent::Error(err.to_string()))
            }
        };
        if let Some(event) = terminal {
            // Consumer may already be gone.
            let _ = tx.blocking_send(event);
        }
        drop(permit);
    }
}

fn forward_fragments(
    model: &dyn LoadedModel,
    input: &str,
    params: &GenerationParameters,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<TokenEvent>,
    timer: &mut InferenceTimer,
) -> Result<StreamEnd, EngineError> {
    let fragments = model.generate_incremental(input, params, cancel.clone())?;
    for fragment in fragments {
        if cancel.is_cancelled() {
            return Ok(StreamEnd::Cancelled);
        }
        let text = fragment?;
        if text.is_empty() {
            continue;
        }
        timer.mark_fragment();
        if tx.blocking_send(TokenEvent::Fragment(text)).is_err() {
            cancel.cancel();
            return Ok(StreamEnd::Cancelled);
        }
    }

    if cancel.is_cancelled() {
        Ok(StreamEnd::Cancelled)
    } else {
        Ok(StreamEnd::Finished)
    }
}

/// Consumer side of a streamed generation.
///
/// Shares the generation permit with the worker: the lock is released once
/// the worker has stopped and this stream has yielded its terminal event or
/// been dropped. Dropping the stream cancels the worker.
pub struct TokenStream {
    rx: mpsc::Receiver<TokenEvent>,
    cancel: CancellationToken,
    permit: Option<Arc<GenerationPermit>>,
    terminated: bool,
}

impl TokenStream {
    /// Ask the worker to stop at the next fragment boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for TokenStream {
    type Item = TokenEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TokenEvent>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.terminated = true;
                    this.permit = None;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                this.permit = None;
                if this.cancel.is_cancelled() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(TokenEvent::Error(
                        "generation ended without completing".to_string(),
                    )))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for TokenStream {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
