//! `OpenRouter` wire layer for the orchat streaming pipeline.
//!
//! # Architecture
//!
//! ```text
//! bytes -> sse::SseDecoder -> SseEvent::Json -> mapper::map_chunk -> DomainEvent
//! ```
//!
//! - [`sse`] - byte-level SSE decoder, fragmentation- and UTF-8-split-safe
//! - [`mapper`] - pure mapping of one chunk to ordered [`orchat_types::DomainEvent`]s
//! - [`request`] - validated construction of the outbound request body
//! - [`openrouter`] - HTTP transport: streaming POST and generation lookup
//! - [`retry`] - connection-level retry policy for the streaming POST
//!
//! Nothing in this crate holds session state. The decoder keeps only the
//! bytes of the line it is currently assembling, one decoder per stream.
//!
//! # Error Handling
//!
//! The decoder and mapper never return `Err`: malformed input becomes a
//! [`sse::SseEvent::ProtocolError`] and provider errors become
//! `StreamError { terminal: true }`, so partial output is preserved upstream.
//! Request validation returns [`request::ValidationError`] and transport
//! failures return [`TransportError`].

pub mod mapper;
pub mod openrouter;
pub mod request;
pub mod retry;
pub mod sse;

pub use mapper::{DEFAULT_CHOICE_INDEX, map_chunk};
pub use openrouter::{ByteStream, OpenRouterClient};
pub use request::{
    ChatRequest, ReasoningEffort, ReasoningParams, RequestParams, ValidationError, build_request,
    build_request_from_json,
};
pub use sse::{SseDecoder, SseEvent, decode_all};

pub use orchat_types;

use serde_json::Value;
use thiserror::Error;

/// Canonical `OpenRouter` API base URL.
pub const OPENROUTER_API_BASE_URL: &str = "https://openrouter.ai/api/v1";

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

const FALLBACK_PROVIDER_ERROR: &str = "Provider reported an error";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request failed after {attempts} attempts: {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("stream read failed: {0}")]
    Read(#[source] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Body(String),
}

/// JavaScript-style truthiness, which is how the wire format treats `error`.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Human-readable message for a provider `error` value.
#[must_use]
pub fn provider_error_message(error: &Value) -> String {
    let message = match error {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("message").and_then(Value::as_str),
        _ => None,
    };
    message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(FALLBACK_PROVIDER_ERROR)
        .to_string()
}

pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
