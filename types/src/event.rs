//! The closed set of domain events flowing from the chunk mapper to the reducer.
//!
//! Wire JSON is loosely typed; it is converted into [`DomainEvent`] exactly once,
//! at the mapper boundary, so every downstream consumer matches exhaustively
//! instead of probing shapes.
//!
//! The serialized form is tagged by `type` and versioned by
//! [`EVENT_SCHEMA_VERSION`]. Event kinds from a newer schema deserialize as
//! [`DomainEvent::Unknown`], which the reducer ignores.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{FinishReason, GenerationId, MessageId, RequestId, ToolCallDelta, MergeStrategy, Usage};

pub const EVENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Opens a run. The only event that creates messages.
    StartGeneration(StartGeneration),
    /// SSE `: comment` line (provider keepalive/processing notices).
    StreamComment { text: String },
    MetaDelta(MetaDelta),
    MessageDeltaText {
        message_id: MessageId,
        text: String,
    },
    MessageDeltaToolCall {
        message_id: MessageId,
        tool_calls: Vec<ToolCallDelta>,
        merge_strategy: MergeStrategy,
    },
    /// One opaque reasoning-detail element, forwarded verbatim.
    MessageDeltaReasoningDetail {
        message_id: MessageId,
        detail: Value,
    },
    UsageDelta { usage: Usage },
    StreamError {
        error: StreamErrorInfo,
        terminal: bool,
    },
    StreamDone,
    StreamAbort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl DomainEvent {
    /// Stable name of the event kind, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StartGeneration(_) => "start_generation",
            Self::StreamComment { .. } => "stream_comment",
            Self::MetaDelta(_) => "meta_delta",
            Self::MessageDeltaText { .. } => "message_delta_text",
            Self::MessageDeltaToolCall { .. } => "message_delta_tool_call",
            Self::MessageDeltaReasoningDetail { .. } => "message_delta_reasoning_detail",
            Self::UsageDelta { .. } => "usage_delta",
            Self::StreamError { .. } => "stream_error",
            Self::StreamDone => "stream_done",
            Self::StreamAbort { .. } => "stream_abort",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn terminal_error(error: StreamErrorInfo) -> Self {
        Self::StreamError {
            error,
            terminal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartGeneration {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<UserMessageInit>,
    pub assistant_message_id: MessageId,
    /// Value of `reasoning.exclude` on the outbound request, recorded verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_reasoning_exclude: Option<bool>,
}

/// The user turn that opened a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageInit {
    pub message_id: MessageId,
    /// Plain string or an array of multimodal content blocks.
    pub content: Value,
}

/// Per-chunk run metadata. Absent fields carry no information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<GenerationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_finish_reason: Option<String>,
}

impl MetaDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generation_id.is_none()
            && self.model.is_none()
            && self.provider.is_none()
            && self.finish_reason.is_none()
            && self.native_finish_reason.is_none()
    }
}

/// Where a stream error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    /// Provider sent an `error` object mid-stream.
    Provider,
    /// Malformed SSE framing or JSON payload.
    Protocol,
    /// Non-success HTTP status before streaming began.
    Http,
    /// Connection, read, or idle-timeout failure.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamErrorInfo {
    pub kind: StreamErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    /// The provider's error object, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl StreamErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Protocol => "protocol",
            Self::Http => "http",
            Self::Transport => "transport",
        }
    }
}

impl std::fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StreamErrorInfo {
    #[must_use]
    pub fn new(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            raw: None,
        }
    }
}
