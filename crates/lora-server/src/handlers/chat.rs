//! Chat handlers, blocking and streamed.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    Json,
};
use lora_engine::GenerationParameters;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    error::ServerError,
    models::{ChatRequest, ChatResponse},
    state::AppState,
    streaming,
};

/// A request that passed validation.
#[derive(Debug)]
pub struct ValidatedChat {
    pub prompt: String,
    pub params: GenerationParameters,
}

/// Check the body before any model work happens.
pub fn validate_chat(
    config: &ServerConfig,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<ValidatedChat, ServerError> {
    let Json(request) =
        body.map_err(|rejection| ServerError::InvalidRequest(rejection.body_text()))?;

    let prompt = request
        .prompt
        .as_deref()
        .ok_or_else(|| ServerError::InvalidRequest("missing `prompt` field".to_string()))?;
    if prompt.trim().is_empty() {
        return Err(ServerError::InvalidRequest(
            "`prompt` must not be empty".to_string(),
        ));
    }
    let chars = prompt.chars().count();
    if chars > config.max_prompt_chars {
        return Err(ServerError::InvalidRequest(format!(
            "`prompt` is {chars} characters, the limit is {}",
            config.max_prompt_chars
        )));
    }

    let params = GenerationParameters::resolve(&request.overrides(), &config.defaults)?;
    Ok(ValidatedChat {
        prompt: prompt.to_string(),
        params,
    })
}

/// `POST /api/chat`
pub async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ServerError> {
    let chat = validate_chat(&state.config, body)?;
    let request_id = Uuid::new_v4();

    let response = state
        .coordinator
        .generate(&chat.prompt, chat.params)
        .instrument(tracing::info_span!("chat", %request_id))
        .await?;

    Ok(Json(ChatResponse::success(response)))
}

/// `POST /api/chat_stream`
///
/// Validation and load failures are reported as a plain JSON error before
/// any event is written. Once streaming has begun, failures arrive in-band.
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let chat = match validate_chat(&state.config, body) {
        Ok(chat) => chat,
        Err(err) => return err.into_stream_response(),
    };
    let request_id = Uuid::new_v4();

    let started = state
        .coordinator
        .generate_stream(&chat.prompt, chat.params)
        .instrument(tracing::info_span!("chat_stream", %request_id))
        .await;

    match started {
        Ok(tokens) => streaming::sse_response(tokens, request_id),
        Err(err) => ServerError::from(err).into_stream_response(),
    }
}
