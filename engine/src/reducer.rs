//! The single writer of [`RootState`].
//!
//! `reduce(state, run_id, event)` is pure: it never mutates `state`, and an
//! event that does not apply (unknown run, foreign message, run already
//! terminal, unknown event kind) returns `state.clone()` unchanged. Ignored
//! events are logged at `debug`; the reducer never fails and never panics.

use std::collections::BTreeMap;

use orchat_types::{
    DomainEvent, MergeStrategy, MessageId, MetaDelta, REASONING_ENCRYPTED_TYPE,
    REASONING_SUMMARY_TYPE, REASONING_TEXT_TYPE, RunId, RunStatus, StartGeneration,
    StreamErrorInfo, ToolCall, ToolCallDelta,
};
use serde_json::Value;
use thiserror::Error;

use crate::state::{MessageState, RootState, RunState};

/// Why an event left the state untouched.
#[derive(Debug, Error)]
enum Ignored {
    #[error("run already exists")]
    DuplicateRun,
    #[error("message id {0} is already in use")]
    MessageIdInUse(MessageId),
    #[error("unknown run")]
    UnknownRun,
    #[error("run is {0}")]
    RunTerminal(RunStatus),
    #[error("message {0} does not belong to this run")]
    ForeignMessage(MessageId),
    #[error("unknown event kind")]
    UnknownKind,
}

/// Apply one event to the session.
#[must_use]
pub fn reduce(state: &RootState, run_id: &RunId, event: &DomainEvent) -> RootState {
    match apply(state, run_id, event) {
        Ok(next) => next,
        Err(reason) => {
            tracing::debug!(
                run_id = %run_id,
                event = event.kind(),
                %reason,
                "Ignoring event"
            );
            state.clone()
        }
    }
}

/// Flip the reasoning panel of one message between collapsed and expanded.
///
/// Purely a view concern, so it is allowed on finished runs too.
#[must_use]
pub fn toggle_reasoning_panel(state: &RootState, message_id: &MessageId) -> RootState {
    let Some(message) = state.message(message_id) else {
        tracing::debug!(message_id = %message_id, "Ignoring panel toggle for unknown message");
        return state.clone();
    };
    let mut message = message.clone();
    message.reasoning_panel_state = message.reasoning_panel_state.toggled();

    let mut next = state.clone();
    next.replace_message(message);
    next
}

fn apply(state: &RootState, run_id: &RunId, event: &DomainEvent) -> Result<RootState, Ignored> {
    if let DomainEvent::StartGeneration(start) = event {
        return start_generation(state, run_id, start);
    }

    let run = state.run(run_id).ok_or(Ignored::UnknownRun)?;
    if run.status.is_terminal() {
        return Err(Ignored::RunTerminal(run.status));
    }

    match event {
        DomainEvent::StartGeneration(_) => Err(Ignored::DuplicateRun),
        DomainEvent::StreamComment { text } => {
            let mut run = run.clone();
            run.comments.push(text.clone());
            Ok(with_run(state, run))
        }
        DomainEvent::MetaDelta(meta) => Ok(apply_meta(state, run, meta)),
        DomainEvent::MessageDeltaText { message_id, text } => {
            let mut message = owned_message(state, run_id, message_id)?;
            message.content_text.push_str(text);
            Ok(with_message_streaming(state, run, message))
        }
        DomainEvent::MessageDeltaToolCall {
            message_id,
            tool_calls,
            merge_strategy,
        } => {
            let mut message = owned_message(state, run_id, message_id)?;
            merge_tool_calls(&mut message.tool_calls, tool_calls, *merge_strategy);
            Ok(with_message_streaming(state, run, message))
        }
        DomainEvent::MessageDeltaReasoningDetail { message_id, detail } => {
            let mut message = owned_message(state, run_id, message_id)?;
            append_reasoning_detail(&mut message, detail);
            Ok(with_message_streaming(state, run, message))
        }
        DomainEvent::UsageDelta { usage } => {
            let mut run = run.clone();
            run.usage = Some(usage.clone());
            Ok(with_run(state, run))
        }
        DomainEvent::StreamError { error, terminal } => {
            Ok(apply_error(state, run, error, *terminal))
        }
        DomainEvent::StreamDone => Ok(finish(state, run, RunStatus::Done, |_| {})),
        DomainEvent::StreamAbort { reason } => Ok(finish(state, run, RunStatus::Aborted, |run| {
            run.abort_reason.clone_from(reason);
        })),
        DomainEvent::Unknown => Err(Ignored::UnknownKind),
    }
}

fn start_generation(
    state: &RootState,
    run_id: &RunId,
    start: &StartGeneration,
) -> Result<RootState, Ignored> {
    if state.run(run_id).is_some() {
        return Err(Ignored::DuplicateRun);
    }

    let user_id = start.user_message.as_ref().map(|user| &user.message_id);
    for id in user_id.into_iter().chain([&start.assistant_message_id]) {
        if state.contains_message(id) {
            return Err(Ignored::MessageIdInUse(id.clone()));
        }
    }
    if user_id == Some(&start.assistant_message_id) {
        return Err(Ignored::MessageIdInUse(start.assistant_message_id.clone()));
    }

    let mut messages = Vec::with_capacity(2);
    if let Some(user) = &start.user_message {
        messages.push(MessageState::user(
            user.message_id.clone(),
            run_id.clone(),
            &user.content,
        ));
    }
    messages.push(MessageState::assistant_target(
        start.assistant_message_id.clone(),
        run_id.clone(),
        start.requested_reasoning_exclude,
    ));

    let run = RunState::new(
        run_id.clone(),
        start.request_id.clone(),
        start.assistant_message_id.clone(),
    );

    let mut next = state.clone();
    next.insert_run(run, messages);
    Ok(next)
}

fn apply_meta(state: &RootState, run: &RunState, meta: &MetaDelta) -> RootState {
    let mut next_run = run.clone();
    set_once(&mut next_run.generation_id, meta.generation_id.as_ref());
    set_once(&mut next_run.model, meta.model.as_ref());
    set_once(&mut next_run.provider, meta.provider.as_ref());
    set_once(&mut next_run.finish_reason, meta.finish_reason.as_ref());
    set_once(
        &mut next_run.native_finish_reason,
        meta.native_finish_reason.as_ref(),
    );

    next_run.status = next_run.status.advance(RunStatus::Streaming);
    if meta.finish_reason == Some(orchat_types::FinishReason::ToolCalls) {
        next_run.status = next_run.status.advance(RunStatus::ToolWaiting);
    }

    if next_run == *run {
        return state.clone();
    }
    with_run(state, next_run)
}

fn set_once<T: Clone>(slot: &mut Option<T>, value: Option<&T>) {
    if slot.is_none() {
        *slot = value.cloned();
    }
}

fn owned_message(
    state: &RootState,
    run_id: &RunId,
    message_id: &MessageId,
) -> Result<MessageState, Ignored> {
    state
        .message(message_id)
        .filter(|message| &message.run_id == run_id)
        .cloned()
        .ok_or_else(|| Ignored::ForeignMessage(message_id.clone()))
}

fn merge_tool_calls(
    calls: &mut BTreeMap<u32, ToolCall>,
    deltas: &[ToolCallDelta],
    strategy: MergeStrategy,
) {
    if strategy == MergeStrategy::Replace {
        calls.clear();
    }
    for delta in deltas {
        calls
            .entry(delta.index)
            .and_modify(|call| call.merge(delta))
            .or_insert_with(|| ToolCall::from_delta(delta));
    }
}

fn append_reasoning_detail(message: &mut MessageState, detail: &Value) {
    message.reasoning_details_raw.push(detail.clone());

    match detail.get("type").and_then(Value::as_str) {
        Some(REASONING_TEXT_TYPE) => {
            if let Some(text) = detail.get("text").and_then(Value::as_str) {
                message.reasoning_streaming_text.push_str(text);
            }
        }
        Some(REASONING_SUMMARY_TYPE) => {
            if let Some(summary) = detail.get("summary").and_then(Value::as_str) {
                message.reasoning_summary_text = Some(summary.to_string());
            }
        }
        Some(REASONING_ENCRYPTED_TYPE) => message.has_encrypted_reasoning = true,
        _ => {}
    }
}

fn apply_error(
    state: &RootState,
    run: &RunState,
    error: &StreamErrorInfo,
    terminal: bool,
) -> RootState {
    if terminal {
        return finish(state, run, RunStatus::Error, |run| {
            run.error = Some(error.clone());
        });
    }
    let mut run = run.clone();
    run.error = Some(error.clone());
    with_run(state, run)
}

/// Move the run to a terminal status and close its target message.
fn finish(
    state: &RootState,
    run: &RunState,
    status: RunStatus,
    update: impl FnOnce(&mut RunState),
) -> RootState {
    let mut next_run = run.clone();
    next_run.status = next_run.status.advance(status);
    update(&mut next_run);

    let mut next = with_run(state, next_run);
    if let Some(target) = state.message(&run.target_assistant_message_id)
        && !target.streaming.is_complete
    {
        let mut target = target.clone();
        target.streaming.is_complete = true;
        next.replace_message(target);
    }
    next
}

/// Store a message delta and move the run into `streaming` if it is not there yet.
fn with_message_streaming(state: &RootState, run: &RunState, message: MessageState) -> RootState {
    let mut next = state.clone();
    next.replace_message(message);

    let status = run.status.advance(RunStatus::Streaming);
    if status != run.status {
        let mut run = run.clone();
        run.status = status;
        next.replace_run(run);
    }
    next
}

fn with_run(state: &RootState, run: RunState) -> RootState {
    let mut next = state.clone();
    next.replace_run(run);
    next
}
