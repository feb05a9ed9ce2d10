//! Server-Sent Events (SSE) transport for streamed chat.
//!
//! Each [`TokenEvent`] becomes one `data: {json}\n\n` frame:
//! - `{"token": "..."}` per fragment
//! - `{"done": true}` on completion
//! - `{"error": "..."}` on failure
//!
//! Nothing is written after the terminal frame. When the client disconnects,
//! axum drops the body stream, which drops the [`TokenStream`] and cancels
//! the worker.

use std::convert::Infallible;

use axum::{
    http::{header, HeaderName},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use serde_json::json;
use uuid::Uuid;

use crate::coordinator::{TokenEvent, TokenStream};

/// JSON payload carried by the frame for `event`.
pub fn payload(event: &TokenEvent) -> serde_json::Value {
    match event {
        TokenEvent::Fragment(text) => json!({ "token": text }),
        TokenEvent::Done => json!({ "done": true }),
        TokenEvent::Error(message) => json!({ "error": message }),
    }
}

/// Serialize one event as an SSE frame.
pub fn frame(event: &TokenEvent) -> Event {
    Event::default().data(payload(event).to_string())
}

/// Wrap a token stream in an SSE response with proxy-friendly headers.
pub fn sse_response(tokens: TokenStream, request_id: Uuid) -> Response {
    let stream = async_stream::stream! {
        let mut tokens = tokens;
        let mut fragments = 0usize;
        while let Some(event) = tokens.next().await {
            match &event {
                TokenEvent::Fragment(_) => fragments += 1,
                TokenEvent::Done => tracing::debug!(%request_id, fragments, "stream finished"),
                TokenEvent::Error(message) => {
                    tracing::warn!(%request_id, fragments, error = %message, "stream failed")
                }
            }
            yield Ok::<_, Infallible>(frame(&event));
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}
