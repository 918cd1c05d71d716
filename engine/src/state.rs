//! Session state: runs, messages, and the indexes between them.
//!
//! [`RootState`] is persistent. Every child is behind an `Arc`, and an
//! update clones only the path it touches, so an untouched run or message is
//! the same allocation before and after a reduction. Readers (selectors, a
//! persistence snapshot) can hold an old state for as long as they like.

use std::collections::BTreeMap;
use std::sync::Arc;

use orchat_types::{
    FinishReason, GenerationId, MessageId, ReasoningPanelState, RequestId, Role, RunId,
    RunStatus, StreamErrorInfo, ToolCall, Usage,
};
use serde::Serialize;
use serde_json::Value;

/// One generation cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    pub run_id: RunId,
    pub status: RunStatus,
    pub request_id: RequestId,
    pub target_assistant_message_id: MessageId,
    pub generation_id: Option<GenerationId>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub native_finish_reason: Option<String>,
    /// Last usage reported for the run.
    pub usage: Option<Usage>,
    /// Terminal error, or the most recent non-terminal one.
    pub error: Option<StreamErrorInfo>,
    pub abort_reason: Option<String>,
    pub comments: Vec<String>,
}

impl RunState {
    pub(crate) fn new(
        run_id: RunId,
        request_id: RequestId,
        target_assistant_message_id: MessageId,
    ) -> Self {
        Self {
            run_id,
            status: RunStatus::Idle.advance(RunStatus::Requesting),
            request_id,
            target_assistant_message_id,
            generation_id: None,
            model: None,
            provider: None,
            finish_reason: None,
            native_finish_reason: None,
            usage: None,
            error: None,
            abort_reason: None,
            comments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamingFlags {
    /// The assistant message this run streams into.
    pub is_target: bool,
    pub is_complete: bool,
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageState {
    pub message_id: MessageId,
    pub run_id: RunId,
    pub role: Role,
    pub content_text: String,
    /// Multimodal content of a user turn, kept verbatim.
    pub content_blocks: Vec<Value>,
    pub tool_calls: BTreeMap<u32, ToolCall>,
    /// Reasoning details exactly as they arrived, in arrival order.
    pub reasoning_details_raw: Vec<Value>,
    pub reasoning_streaming_text: String,
    pub reasoning_summary_text: Option<String>,
    pub reasoning_panel_state: ReasoningPanelState,
    pub has_encrypted_reasoning: bool,
    pub requested_reasoning_exclude: Option<bool>,
    pub streaming: StreamingFlags,
}

impl MessageState {
    pub(crate) fn user(message_id: MessageId, run_id: RunId, content: &Value) -> Self {
        let mut message = Self::empty(message_id, run_id, Role::User);
        match content {
            Value::String(text) => message.content_text.clone_from(text),
            Value::Array(blocks) => message.content_blocks.clone_from(blocks),
            Value::Null => {}
            other => message.content_blocks.push(other.clone()),
        }
        message.streaming.is_complete = true;
        message
    }

    pub(crate) fn assistant_target(
        message_id: MessageId,
        run_id: RunId,
        requested_reasoning_exclude: Option<bool>,
    ) -> Self {
        let mut message = Self::empty(message_id, run_id, Role::Assistant);
        message.requested_reasoning_exclude = requested_reasoning_exclude;
        message.streaming.is_target = true;
        message
    }

    fn empty(message_id: MessageId, run_id: RunId, role: Role) -> Self {
        Self {
            message_id,
            run_id,
            role,
            content_text: String::new(),
            content_blocks: Vec::new(),
            tool_calls: BTreeMap::new(),
            reasoning_details_raw: Vec::new(),
            reasoning_streaming_text: String::new(),
            reasoning_summary_text: None,
            reasoning_panel_state: ReasoningPanelState::default(),
            has_encrypted_reasoning: false,
            requested_reasoning_exclude: None,
            streaming: StreamingFlags::default(),
        }
    }
}

/// The whole session.
///
/// Built once with [`RootState::new`] and only ever replaced by
/// [`crate::reducer::reduce`]. Map keys are ordered so a serialized snapshot
/// is byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RootState {
    runs: Arc<BTreeMap<RunId, Arc<RunState>>>,
    messages: Arc<BTreeMap<MessageId, Arc<MessageState>>>,
    run_messages: Arc<BTreeMap<RunId, Arc<Vec<MessageId>>>>,
    /// Runs in creation order.
    run_order: Arc<Vec<RunId>>,
}

impl RootState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn run(&self, run_id: &RunId) -> Option<&RunState> {
        self.runs.get(run_id).map(Arc::as_ref)
    }

    #[must_use]
    pub fn message(&self, message_id: &MessageId) -> Option<&MessageState> {
        self.messages.get(message_id).map(Arc::as_ref)
    }

    /// Message ids of a run, in the order they were created.
    #[must_use]
    pub fn run_message_ids(&self, run_id: &RunId) -> &[MessageId] {
        self.run_messages
            .get(run_id)
            .map_or(&[], |ids| ids.as_slice())
    }

    /// Run ids in creation order.
    #[must_use]
    pub fn run_ids(&self) -> &[RunId] {
        &self.run_order
    }

    pub fn runs(&self) -> impl Iterator<Item = &RunState> {
        self.run_order.iter().filter_map(|id| self.run(id))
    }

    #[must_use]
    pub fn run_count(&self) -> usize {
        self.run_order.len()
    }

    #[must_use]
    pub fn run_arc(&self, run_id: &RunId) -> Option<&Arc<RunState>> {
        self.runs.get(run_id)
    }

    #[must_use]
    pub fn message_arc(&self, message_id: &MessageId) -> Option<&Arc<MessageState>> {
        self.messages.get(message_id)
    }

    /// True when `other` is this state with no reduction applied, i.e. every
    /// top-level map is the same allocation.
    #[must_use]
    pub fn is_unchanged_from(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.runs, &other.runs)
            && Arc::ptr_eq(&self.messages, &other.messages)
            && Arc::ptr_eq(&self.run_messages, &other.run_messages)
            && Arc::ptr_eq(&self.run_order, &other.run_order)
    }

    pub(crate) fn contains_message(&self, message_id: &MessageId) -> bool {
        self.messages.contains_key(message_id)
    }

    pub(crate) fn insert_run(&mut self, run: RunState, messages: Vec<MessageState>) {
        let run_id = run.run_id.clone();
        let ids: Vec<MessageId> = messages.iter().map(|m| m.message_id.clone()).collect();

        let message_map = Arc::make_mut(&mut self.messages);
        for message in messages {
            message_map.insert(message.message_id.clone(), Arc::new(message));
        }
        Arc::make_mut(&mut self.run_messages).insert(run_id.clone(), Arc::new(ids));
        Arc::make_mut(&mut self.run_order).push(run_id.clone());
        Arc::make_mut(&mut self.runs).insert(run_id, Arc::new(run));
    }

    pub(crate) fn replace_run(&mut self, run: RunState) {
        Arc::make_mut(&mut self.runs).insert(run.run_id.clone(), Arc::new(run));
    }

    pub(crate) fn replace_message(&mut self, message: MessageState) {
        Arc::make_mut(&mut self.messages).insert(message.message_id.clone(), Arc::new(message));
    }
}
