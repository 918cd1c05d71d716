//! Request validation as seen on the wire.

use std::collections::BTreeSet;

use orchat_engine::{AbortSignal, DriveOptions, RootState, StreamDriver, StreamOutcome};
use orchat_providers::retry::RetryConfig;
use orchat_providers::{OpenRouterClient, ValidationError, build_request_from_json};
use serde_json::{Value, json};
use wiremock::MockServer;

use crate::common::{fixture, mount_sse_body, run_id, start};

fn top_level_keys(body: &Value) -> BTreeSet<String> {
    body.as_object().unwrap().keys().cloned().collect()
}

#[test]
fn streaming_request_defaults_usage_and_omits_reasoning() {
    let request = build_request_from_json(&json!({
        "model": "openai/gpt-4o-mini",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true
    }))
    .unwrap();
    let body = request.to_value();

    assert_eq!(body["usage"], json!({"include": true}));
    assert!(body.get("reasoning").is_none());
}

#[test]
fn effort_none_with_token_budget_is_rejected() {
    let err = build_request_from_json(&json!({
        "model": "openai/o3-mini",
        "messages": [],
        "stream": true,
        "reasoning": {"effort": "none", "max_tokens": 10}
    }))
    .unwrap_err();
    assert_eq!(err, ValidationError::ReasoningEffortNoneWithMaxTokens);
}

#[test]
fn excluded_reasoning_request_has_exactly_the_allowed_keys() {
    let request = build_request_from_json(&json!({
        "model": "anthropic/claude-sonnet-4",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
        "reasoning": {"effort": "high", "exclude": true},
        "temperature": 0.2,
        "api_key": "sk-should-not-leak"
    }))
    .unwrap();

    let expected: BTreeSet<String> = ["messages", "model", "reasoning", "stream", "usage"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(top_level_keys(&request.to_value()), expected);
    assert_eq!(
        request.to_value()["reasoning"],
        json!({"effort": "high", "exclude": true})
    );
    assert_eq!(request.requested_reasoning_exclude(), Some(true));
}

#[tokio::test]
async fn dropped_keys_never_reach_the_wire() {
    let server = MockServer::start().await;
    mount_sse_body(&server, &fixture("basic.sse")).await;

    let request = build_request_from_json(&json!({
        "model": "openai/gpt-4o-mini",
        "messages": [{"role": "user", "content": "What is 2 + 2?"}],
        "stream": true,
        "provider": {"order": ["OpenAI"]},
        "secret": "value"
    }))
    .unwrap();
    let client = OpenRouterClient::with_base_url("sk-or-test", server.uri())
        .unwrap()
        .with_retry_config(RetryConfig::disabled());

    let mut driver = StreamDriver::new(RootState::new());
    let outcome = driver
        .run_live(
            &client,
            &run_id(),
            start(None),
            &request,
            &DriveOptions::default(),
            &AbortSignal::never(),
        )
        .await;
    assert_eq!(outcome, StreamOutcome::Completed);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    let expected: BTreeSet<String> = ["messages", "model", "stream", "usage"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(top_level_keys(&sent), expected);
}
