//! Validated construction of the chat-completions request body.
//!
//! Two entry points share one set of rules:
//!
//! - [`build_request`] takes typed [`RequestParams`] from Rust callers
//! - [`build_request_from_json`] takes loosely-typed JSON (config files, fixtures,
//!   foreign callers) and shape-checks it first
//!
//! Both fail fast with [`ValidationError`] before any network call. The
//! resulting [`ChatRequest`] can only hold the allowlisted top-level keys
//! `model`, `messages`, `stream`, `usage`, `reasoning` and `tools`.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request input must be a JSON object")]
    InputNotObject,
    #[error("`model` is required")]
    ModelMissing,
    #[error("`model` must be a non-empty string")]
    ModelNotString,
    #[error("`messages` must be an array")]
    MessagesNotArray,
    #[error("`stream` must be a boolean")]
    StreamNotBoolean,
    #[error("`usage` must be an object")]
    UsageNotObject,
    #[error("`usage.include` must be a boolean")]
    UsageIncludeNotBoolean,
    #[error("`reasoning` must be an object")]
    ReasoningNotObject,
    #[error(
        "`reasoning` must specify exactly one of `enabled`, `effort`, `max_tokens` (found {found})"
    )]
    ReasoningDirectiveCount { found: usize },
    #[error("`reasoning.enabled` must be a boolean")]
    ReasoningEnabledNotBoolean,
    #[error("`reasoning.effort` must be one of xhigh, high, medium, low, minimal, none (got {0})")]
    ReasoningEffortInvalid(String),
    #[error("`reasoning.effort = \"none\"` cannot be combined with `reasoning.max_tokens`")]
    ReasoningEffortNoneWithMaxTokens,
    #[error("`reasoning.max_tokens` must be a positive integer (got {0})")]
    ReasoningMaxTokensInvalid(String),
    #[error("`reasoning.exclude` must be a boolean")]
    ReasoningExcludeNotBoolean,
    #[error("`tools` must be an array")]
    ToolsNotArray,
}

/// Reasoning effort accepted by `OpenRouter`. `None` disables reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Xhigh,
    High,
    Medium,
    Low,
    Minimal,
    None,
}

impl ReasoningEffort {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "xhigh" => Some(Self::Xhigh),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "minimal" => Some(Self::Minimal),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Xhigh => "xhigh",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Minimal => "minimal",
            Self::None => "none",
        }
    }
}

/// Caller-side reasoning options before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasoningParams {
    pub enabled: Option<bool>,
    pub effort: Option<ReasoningEffort>,
    pub max_tokens: Option<u64>,
    pub exclude: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
    pub model: String,
    /// Chat messages, forwarded verbatim (multimodal content blocks included).
    pub messages: Vec<Value>,
    pub stream: bool,
    /// `usage.include`; defaults to `true`.
    pub include_usage: Option<bool>,
    /// `None` means "no reasoning directive".
    pub reasoning: Option<ReasoningParams>,
    pub tools: Option<Vec<Value>>,
}

impl RequestParams {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Value>, stream: bool) -> Self {
        Self {
            model: model.into(),
            messages,
            stream,
            include_usage: None,
            reasoning: None,
            tools: None,
        }
    }

    #[must_use]
    pub fn with_reasoning(mut self, reasoning: ReasoningParams) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = Some(tools);
        self
    }

    #[must_use]
    pub fn with_include_usage(mut self, include: bool) -> Self {
        self.include_usage = Some(include);
        self
    }
}

/// Outbound request body. Only obtainable through validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    stream: bool,
    usage: UsageRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageRequest {
    pub include: bool,
}

/// Validated reasoning block: exactly one directive plus optional `exclude`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReasoningRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exclude: Option<bool>,
}

impl ReasoningRequest {
    #[must_use]
    pub const fn exclude(&self) -> Option<bool> {
        self.exclude
    }
}

impl ChatRequest {
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn messages(&self) -> &[Value] {
        &self.messages
    }

    #[must_use]
    pub const fn stream(&self) -> bool {
        self.stream
    }

    #[must_use]
    pub const fn usage(&self) -> UsageRequest {
        self.usage
    }

    #[must_use]
    pub const fn reasoning(&self) -> Option<&ReasoningRequest> {
        self.reasoning.as_ref()
    }

    #[must_use]
    pub fn tools(&self) -> Option<&[Value]> {
        self.tools.as_deref()
    }

    /// `reasoning.exclude` as sent, for recording on the run.
    #[must_use]
    pub fn requested_reasoning_exclude(&self) -> Option<bool> {
        self.reasoning.and_then(|r| r.exclude)
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn build_request(params: RequestParams) -> Result<ChatRequest, ValidationError> {
    if params.model.trim().is_empty() {
        return Err(ValidationError::ModelMissing);
    }

    let reasoning = params
        .reasoning
        .as_ref()
        .map(validate_reasoning)
        .transpose()?;

    Ok(ChatRequest {
        model: params.model,
        messages: params.messages,
        stream: params.stream,
        usage: UsageRequest {
            include: params.include_usage.unwrap_or(true),
        },
        reasoning,
        tools: params.tools,
    })
}

fn validate_reasoning(params: &ReasoningParams) -> Result<ReasoningRequest, ValidationError> {
    if params.effort == Some(ReasoningEffort::None) && params.max_tokens.is_some() {
        return Err(ValidationError::ReasoningEffortNoneWithMaxTokens);
    }

    let found = usize::from(params.enabled.is_some())
        + usize::from(params.effort.is_some())
        + usize::from(params.max_tokens.is_some());
    if found != 1 {
        return Err(ValidationError::ReasoningDirectiveCount { found });
    }

    if params.max_tokens == Some(0) {
        return Err(ValidationError::ReasoningMaxTokensInvalid("0".to_string()));
    }

    Ok(ReasoningRequest {
        enabled: params.enabled,
        effort: params.effort,
        max_tokens: params.max_tokens,
        exclude: params.exclude,
    })
}

/// Validate loosely-typed input and build the request.
///
/// Keys outside the allowlist are dropped; they never reach the wire.
pub fn build_request_from_json(input: &Value) -> Result<ChatRequest, ValidationError> {
    let input = input.as_object().ok_or(ValidationError::InputNotObject)?;

    let stream = input
        .get("stream")
        .and_then(Value::as_bool)
        .ok_or(ValidationError::StreamNotBoolean)?;

    let model = match input.get("model") {
        None | Some(Value::Null) => return Err(ValidationError::ModelMissing),
        Some(Value::String(model)) if !model.trim().is_empty() => model.clone(),
        Some(_) => return Err(ValidationError::ModelNotString),
    };

    let messages = input
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .ok_or(ValidationError::MessagesNotArray)?;

    let include_usage = match defined(input, "usage") {
        None => None,
        Some(Value::Object(usage)) => match defined(usage, "include") {
            None => None,
            Some(Value::Bool(include)) => Some(*include),
            Some(_) => return Err(ValidationError::UsageIncludeNotBoolean),
        },
        Some(_) => return Err(ValidationError::UsageNotObject),
    };

    let reasoning = match defined(input, "reasoning") {
        None => None,
        Some(Value::Object(reasoning)) => Some(reasoning_params_from_json(reasoning)?),
        Some(_) => return Err(ValidationError::ReasoningNotObject),
    };

    let tools = match defined(input, "tools") {
        None => None,
        Some(Value::Array(tools)) => Some(tools.clone()),
        Some(_) => return Err(ValidationError::ToolsNotArray),
    };

    build_request(RequestParams {
        model,
        messages,
        stream,
        include_usage,
        reasoning,
        tools,
    })
}

fn reasoning_params_from_json(
    reasoning: &Map<String, Value>,
) -> Result<ReasoningParams, ValidationError> {
    let enabled = match defined(reasoning, "enabled") {
        None => None,
        Some(Value::Bool(enabled)) => Some(*enabled),
        Some(_) => return Err(ValidationError::ReasoningEnabledNotBoolean),
    };

    let effort = match defined(reasoning, "effort") {
        None => None,
        Some(Value::String(raw)) => Some(
            ReasoningEffort::parse(raw)
                .ok_or_else(|| ValidationError::ReasoningEffortInvalid(raw.clone()))?,
        ),
        Some(other) => return Err(ValidationError::ReasoningEffortInvalid(other.to_string())),
    };

    let max_tokens = match defined(reasoning, "max_tokens") {
        None => None,
        Some(value) => Some(
            positive_integer(value)
                .ok_or_else(|| ValidationError::ReasoningMaxTokensInvalid(value.to_string()))?,
        ),
    };

    let exclude = match defined(reasoning, "exclude") {
        None => None,
        Some(Value::Bool(exclude)) => Some(*exclude),
        Some(_) => return Err(ValidationError::ReasoningExcludeNotBoolean),
    };

    Ok(ReasoningParams {
        enabled,
        effort,
        max_tokens,
        exclude,
    })
}

/// A JSON number with an integral value above zero, however it is spelled
/// (`1024`, `1024.0`, `1e3`).
#[allow(clippy::float_cmp)]
fn positive_integer(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return (n > 0).then_some(n);
    }
    let n = value.as_f64()?;
    (n.is_finite() && n > 0.0 && n.trunc() == n && n < u64::MAX as f64).then(|| n as u64)
}

/// Present and not `null`.
fn defined<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|v| !v.is_null())
}
