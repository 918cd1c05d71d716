//! Pure mapping from one decoded chat-completion chunk to [`DomainEvent`]s.
//!
//! Output order for a chunk:
//!
//! 1. `MetaDelta` (attempted on every chunk, including usage-only tail chunks)
//! 2. `StreamError { terminal: true }` if the chunk carries a truthy `error`,
//!    after which nothing else is emitted for that chunk
//! 3. `UsageDelta`
//! 4. text, tool calls, then one event per reasoning-detail element of the
//!    selected choice
//!
//! The mapper forwards what is literally in the payload. It never decides
//! that reasoning was encrypted or excluded because something is missing.

use orchat_types::{
    DomainEvent, FinishReason, GenerationId, MergeStrategy, MessageId, MetaDelta, StreamErrorInfo,
    StreamErrorKind, ToolCallDelta, Usage,
};
use serde_json::Value;

use crate::{is_truthy, provider_error_message};

pub const DEFAULT_CHOICE_INDEX: usize = 0;

/// Map one chunk for the message being streamed.
///
/// `choice_index` selects the choice whose `index` matches (array position
/// when a choice has no `index`); `None` means [`DEFAULT_CHOICE_INDEX`].
#[must_use]
pub fn map_chunk(
    chunk: &Value,
    message_id: &MessageId,
    choice_index: Option<usize>,
) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    let choice = select_choice(chunk, choice_index.unwrap_or(DEFAULT_CHOICE_INDEX));

    let meta = extract_meta(chunk, choice);
    if !meta.is_empty() {
        events.push(DomainEvent::MetaDelta(meta));
    }

    if let Some(error) = chunk.get("error").filter(|e| is_truthy(e)) {
        events.push(DomainEvent::terminal_error(StreamErrorInfo {
            kind: StreamErrorKind::Provider,
            message: provider_error_message(error),
            code: error.get("code").cloned(),
            raw: Some(error.clone()),
        }));
        return events;
    }

    if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
        match serde_json::from_value::<Usage>(usage.clone()) {
            Ok(usage) => events.push(DomainEvent::UsageDelta { usage }),
            Err(e) => tracing::warn!(%e, "Ignoring malformed usage payload"),
        }
    }

    let Some(choice) = choice else {
        return events;
    };
    let delta = choice.get("delta").filter(|d| d.is_object());
    let message = choice.get("message").filter(|m| m.is_object());

    if let Some(text) = field(delta, message, "content").and_then(non_empty_str) {
        events.push(DomainEvent::MessageDeltaText {
            message_id: message_id.clone(),
            text: text.to_string(),
        });
    }

    let tool_calls = present(delta, "tool_calls")
        .map(|calls| (calls, MergeStrategy::Append))
        .or_else(|| present(message, "tool_calls").map(|calls| (calls, MergeStrategy::Replace)));
    if let Some((calls, merge_strategy)) = tool_calls {
        let tool_calls = as_elements(calls)
            .iter()
            .enumerate()
            .map(|(position, call)| tool_call_delta(position, call))
            .collect();
        events.push(DomainEvent::MessageDeltaToolCall {
            message_id: message_id.clone(),
            tool_calls,
            merge_strategy,
        });
    }

    if let Some(details) = field(delta, message, "reasoning_details") {
        for detail in as_elements(details) {
            events.push(DomainEvent::MessageDeltaReasoningDetail {
                message_id: message_id.clone(),
                detail: detail.clone(),
            });
        }
    }

    events
}

fn select_choice(chunk: &Value, index: usize) -> Option<&Value> {
    chunk
        .get("choices")?
        .as_array()?
        .iter()
        .enumerate()
        .find(|(position, choice)| {
            choice
                .get("index")
                .and_then(Value::as_u64)
                .map_or(*position == index, |i| i == index as u64)
        })
        .map(|(_, choice)| choice)
}

fn extract_meta(chunk: &Value, choice: Option<&Value>) -> MetaDelta {
    let raw_finish = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(non_empty_str);
    let native_finish = choice
        .and_then(|c| c.get("native_finish_reason"))
        .and_then(non_empty_str)
        .or(raw_finish);

    MetaDelta {
        generation_id: chunk
            .get("id")
            .and_then(non_empty_str)
            .map(GenerationId::new),
        model: chunk.get("model").and_then(non_empty_str).map(str::to_string),
        provider: chunk
            .get("provider")
            .and_then(non_empty_str)
            .map(str::to_string),
        finish_reason: raw_finish.map(FinishReason::normalize),
        native_finish_reason: native_finish.map(str::to_string),
    }
}

fn tool_call_delta(position: usize, call: &Value) -> ToolCallDelta {
    let function = call.get("function");
    let arguments = function.and_then(|f| f.get("arguments")).and_then(|a| match a {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    });

    ToolCallDelta {
        index: call
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| u32::try_from(i).ok())
            .unwrap_or(position as u32),
        id: call.get("id").and_then(non_empty_str).map(str::to_string),
        kind: call.get("type").and_then(non_empty_str).map(str::to_string),
        name: function
            .and_then(|f| f.get("name"))
            .and_then(non_empty_str)
            .map(str::to_string),
        arguments,
    }
}

/// `delta.<key>` when present, otherwise `message.<key>`.
fn field<'a>(delta: Option<&'a Value>, message: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    present(delta, key).or_else(|| present(message, key))
}

fn present<'a>(object: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    object.and_then(|o| o.get(key)).filter(|v| !v.is_null())
}

/// Arrays are used as-is; any other value is treated as a one-element array.
fn as_elements(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        other => std::slice::from_ref(other),
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}
