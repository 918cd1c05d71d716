//! Core domain types for orchat.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the streaming pipeline: the
//! chunk mapper produces [`DomainEvent`]s, the reducer consumes them, and the
//! selectors project the resulting state into view models.

#![allow(clippy::missing_errors_doc)]

mod event;
mod ids;
mod tool;
mod usage;

pub use event::{
    DomainEvent, EVENT_SCHEMA_VERSION, MetaDelta, StartGeneration, StreamErrorInfo,
    StreamErrorKind, UserMessageInit,
};
pub use ids::{GenerationId, MessageId, RequestId, RunId};
pub use tool::{MergeStrategy, ToolCall, ToolCallDelta, ToolCallFunction};
pub use usage::{CompletionTokensDetails, PromptTokensDetails, Usage, UsageTotals};

use serde::{Deserialize, Serialize};

// ============================================================================
// Run Lifecycle
// ============================================================================

/// Position of a run on the status lattice.
///
/// ```text
/// idle -> requesting -> streaming -> (tool_waiting) -> {done, error, aborted}
/// ```
///
/// Transitions only move forward; once terminal, the status is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run exists yet.
    #[default]
    Idle,
    Requesting,
    Streaming,
    ToolWaiting,
    Done,
    Error,
    Aborted,
}

impl RunStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Aborted)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Requesting => 1,
            Self::Streaming => 2,
            Self::ToolWaiting => 3,
            Self::Done | Self::Error | Self::Aborted => 4,
        }
    }

    /// Move toward `next` if that is a forward step on the lattice.
    ///
    /// Terminal statuses absorb every transition, and a backwards request
    /// (e.g. `tool_waiting -> streaming`) leaves the status unchanged.
    #[must_use]
    pub const fn advance(self, next: Self) -> Self {
        if self.is_terminal() || next.rank() <= self.rank() {
            self
        } else {
            next
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Streaming => "streaming",
            Self::ToolWaiting => "tool_waiting",
            Self::Done => "done",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized `finish_reason` of a choice.
///
/// Anything outside the known set maps to [`FinishReason::Unknown`]; the raw
/// provider value is kept separately as the native finish reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Cancelled,
    Abort,
    Unknown,
}

impl FinishReason {
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            "error" => Self::Error,
            "cancelled" => Self::Cancelled,
            "abort" => Self::Abort,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Abort => "abort",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Messages & Reasoning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Why reasoning is (or is not) displayable for a message.
///
/// `Excluded` means the caller asked the provider to hide reasoning;
/// `NotReturned` means nothing arrived and nothing was requested. The two are
/// never conflated, and neither is ever reported as encrypted reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningVisibility {
    Shown,
    Excluded,
    NotReturned,
}

/// UI-local expanded/collapsed state of a message's reasoning panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPanelState {
    #[default]
    Collapsed,
    Expanded,
}

impl ReasoningPanelState {
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Collapsed => Self::Expanded,
            Self::Expanded => Self::Collapsed,
        }
    }
}

/// `type` tag `OpenRouter` uses for encrypted reasoning details.
pub const REASONING_ENCRYPTED_TYPE: &str = "reasoning.encrypted";
/// `type` tag for plaintext reasoning details (`text` field).
pub const REASONING_TEXT_TYPE: &str = "reasoning.text";
/// `type` tag for summarized reasoning details (`summary` field).
pub const REASONING_SUMMARY_TYPE: &str = "reasoning.summary";
