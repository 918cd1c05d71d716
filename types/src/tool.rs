use serde::{Deserialize, Serialize};

/// How a batch of tool-call deltas combines with what a message already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Streaming fragments (`delta.tool_calls`): merge into the call at the same index.
    Append,
    /// Complete snapshot (`message.tool_calls`): discard what was there.
    Replace,
}

/// One tool-call fragment as it arrived on the wire.
///
/// Every field is optional because streaming providers send the id and name
/// once and then only argument fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: Option<String>,
    /// Accumulated JSON argument text. Not parsed; it may be incomplete mid-stream.
    pub arguments: String,
}

/// A tool call accumulated on a message, addressed by its `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub index: u32,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub function: ToolCallFunction,
}

impl ToolCall {
    #[must_use]
    pub fn from_delta(delta: &ToolCallDelta) -> Self {
        Self {
            index: delta.index,
            id: delta.id.clone(),
            kind: delta.kind.clone(),
            function: ToolCallFunction {
                name: delta.name.clone(),
                arguments: delta.arguments.clone().unwrap_or_default(),
            },
        }
    }

    /// Fold a streaming fragment into this call.
    ///
    /// Identity fields are set-once; argument text is appended.
    pub fn merge(&mut self, delta: &ToolCallDelta) {
        if self.id.is_none() {
            self.id.clone_from(&delta.id);
        }
        if self.kind.is_none() {
            self.kind.clone_from(&delta.kind);
        }
        if self.function.name.is_none() {
            self.function.name.clone_from(&delta.name);
        }
        if let Some(arguments) = &delta.arguments {
            self.function.arguments.push_str(arguments);
        }
    }
}
