//! Read-only view models derived from [`RootState`].
//!
//! Rendering code consumes these and nothing else. Every selector is a pure
//! function of the state it is given; nothing is cached or tracked between
//! calls, so a view can never disagree with the state it was built from.

use orchat_types::{
    FinishReason, GenerationId, MessageId, ReasoningPanelState, ReasoningVisibility, Role, RunId,
    RunStatus, StreamErrorInfo, ToolCall, Usage, UsageTotals,
};
use serde::Serialize;
use serde_json::Value;

use crate::state::{MessageState, RootState, RunState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunVM {
    pub run_id: RunId,
    pub status: RunStatus,
    pub is_terminal: bool,
    /// A failed or aborted run can be started again as a new run.
    pub can_retry: bool,
    pub generation_id: Option<GenerationId>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub native_finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub error: Option<StreamErrorInfo>,
    pub abort_reason: Option<String>,
    pub comment_count: usize,
    pub last_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageVM {
    pub message_id: MessageId,
    pub run_id: RunId,
    pub role: Role,
    pub content_text: String,
    pub content_blocks: Vec<Value>,
    /// Ordered by tool-call index.
    pub tool_calls: Vec<ToolCall>,
    pub reasoning_text: String,
    pub reasoning_summary: Option<String>,
    pub reasoning_detail_count: usize,
    pub reasoning_visibility: ReasoningVisibility,
    pub reasoning_panel_state: ReasoningPanelState,
    pub has_encrypted_reasoning: bool,
    pub is_target: bool,
    pub is_complete: bool,
    /// Target message still receiving deltas.
    pub is_streaming: bool,
}

#[must_use]
pub fn select_run(state: &RootState, run_id: &RunId) -> Option<RunVM> {
    state.run(run_id).map(run_vm)
}

/// Every run, in creation order.
#[must_use]
pub fn select_runs(state: &RootState) -> Vec<RunVM> {
    state.runs().map(run_vm).collect()
}

#[must_use]
pub fn select_message(state: &RootState, message_id: &MessageId) -> Option<MessageVM> {
    state.message(message_id).map(message_vm)
}

/// Messages of one run, in creation order (user turn first).
#[must_use]
pub fn select_transcript(state: &RootState, run_id: &RunId) -> Vec<MessageVM> {
    state
        .run_message_ids(run_id)
        .iter()
        .filter_map(|id| state.message(id))
        .map(message_vm)
        .collect()
}

/// Whether reasoning for a message should be shown, and if not, why.
///
/// Anything actually received wins. Only when nothing arrived does the
/// request flag decide between "hidden on request" and "model sent none";
/// absence alone never counts as exclusion.
#[must_use]
pub fn compute_reasoning_visibility(
    has_encrypted_reasoning: bool,
    reasoning_details_raw: &[Value],
    requested_reasoning_exclude: Option<bool>,
) -> ReasoningVisibility {
    if has_encrypted_reasoning || !reasoning_details_raw.is_empty() {
        ReasoningVisibility::Shown
    } else if requested_reasoning_exclude == Some(true) {
        ReasoningVisibility::Excluded
    } else {
        ReasoningVisibility::NotReturned
    }
}

/// Usage reported for one run, if the provider sent any.
#[must_use]
pub fn select_usage_this_turn(state: &RootState, run_id: &RunId) -> Option<Usage> {
    state.run(run_id).and_then(|run| run.usage.clone())
}

/// Session totals, recomputed from the stored per-run usage on every call.
#[must_use]
pub fn select_usage_session_total_derived(state: &RootState) -> UsageTotals {
    state.runs().filter_map(|run| run.usage.as_ref()).collect()
}

fn run_vm(run: &RunState) -> RunVM {
    RunVM {
        run_id: run.run_id.clone(),
        status: run.status,
        is_terminal: run.status.is_terminal(),
        can_retry: matches!(run.status, RunStatus::Error | RunStatus::Aborted),
        generation_id: run.generation_id.clone(),
        model: run.model.clone(),
        provider: run.provider.clone(),
        finish_reason: run.finish_reason,
        native_finish_reason: run.native_finish_reason.clone(),
        usage: run.usage.clone(),
        error: run.error.clone(),
        abort_reason: run.abort_reason.clone(),
        comment_count: run.comments.len(),
        last_comment: run.comments.last().cloned(),
    }
}

fn message_vm(message: &MessageState) -> MessageVM {
    MessageVM {
        message_id: message.message_id.clone(),
        run_id: message.run_id.clone(),
        role: message.role,
        content_text: message.content_text.clone(),
        content_blocks: message.content_blocks.clone(),
        tool_calls: message.tool_calls.values().cloned().collect(),
        reasoning_text: message.reasoning_streaming_text.clone(),
        reasoning_summary: message.reasoning_summary_text.clone(),
        reasoning_detail_count: message.reasoning_details_raw.len(),
        reasoning_visibility: compute_reasoning_visibility(
            message.has_encrypted_reasoning,
            &message.reasoning_details_raw,
            message.requested_reasoning_exclude,
        ),
        reasoning_panel_state: message.reasoning_panel_state,
        has_encrypted_reasoning: message.has_encrypted_reasoning,
        is_target: message.streaming.is_target,
        is_complete: message.streaming.is_complete,
        is_streaming: message.streaming.is_target && !message.streaming.is_complete,
    }
}
