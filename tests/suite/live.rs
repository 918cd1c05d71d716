//! Live streaming against a mock `OpenRouter` server.

use std::time::Duration;

use orchat_engine::{
    AbortSignal, DriveOptions, ReplayOptions, RootState, StreamDriver, StreamOutcome, abort_pair,
    lookup_generation, select_message, select_run,
};
use orchat_providers::retry::RetryConfig;
use orchat_providers::{ChatRequest, OpenRouterClient, ReasoningParams, RequestParams, build_request};
use orchat_types::{DomainEvent, RunStatus, StreamErrorKind};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{fixture, mount_sse_body, run_id, start, target};

fn client(server: &MockServer) -> OpenRouterClient {
    OpenRouterClient::with_base_url("sk-or-test", server.uri())
        .unwrap()
        .with_retry_config(RetryConfig::disabled())
}

fn request(reasoning: Option<ReasoningParams>) -> ChatRequest {
    let mut params = RequestParams::new(
        "openai/gpt-4o-mini",
        vec![json!({"role": "user", "content": "What is 2 + 2?"})],
        true,
    );
    if let Some(reasoning) = reasoning {
        params = params.with_reasoning(reasoning);
    }
    build_request(params).unwrap()
}

#[tokio::test]
async fn live_stream_matches_replay_of_the_same_body() {
    let server = MockServer::start().await;
    let body = fixture("reasoning.sse");
    mount_sse_body(&server, &body).await;

    let mut live = StreamDriver::new(RootState::new());
    let live_outcome = live
        .run_live(
            &client(&server),
            &run_id(),
            start(None),
            &request(None),
            &DriveOptions::default(),
            &AbortSignal::never(),
        )
        .await;

    let mut replay = StreamDriver::new(RootState::new());
    let replay_outcome = replay
        .replay_fixture(
            &run_id(),
            start(None),
            &body,
            &ReplayOptions::default(),
            &AbortSignal::never(),
        )
        .await;

    assert_eq!(live_outcome, StreamOutcome::Completed);
    assert_eq!(live_outcome, replay_outcome);
    assert_eq!(live.state(), replay.state());
}

#[tokio::test]
async fn live_request_carries_auth_and_exclude() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-or-test"))
        .and(wiremock::matchers::body_partial_json(json!({
            "model": "openai/gpt-4o-mini",
            "stream": true,
            "reasoning": {"effort": "low", "exclude": true}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(fixture("basic.sse")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let reasoning = ReasoningParams {
        effort: Some(orchat_providers::ReasoningEffort::Low),
        exclude: Some(true),
        ..ReasoningParams::default()
    };
    let mut driver = StreamDriver::new(RootState::new());
    // The run follows the request, not the start event.
    let outcome = driver
        .run_live(
            &client(&server),
            &run_id(),
            start(None),
            &request(Some(reasoning)),
            &DriveOptions::default(),
            &AbortSignal::never(),
        )
        .await;

    assert_eq!(outcome, StreamOutcome::Completed);
    let message = select_message(driver.state(), &target()).unwrap();
    assert_eq!(
        message.reasoning_visibility,
        orchat_types::ReasoningVisibility::Excluded
    );
}

#[tokio::test]
async fn http_error_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {"code": 402, "message": "Insufficient credits"}
        })))
        .mount(&server)
        .await;

    let mut driver = StreamDriver::new(RootState::new());
    let outcome = driver
        .run_live(
            &client(&server),
            &run_id(),
            start(None),
            &request(None),
            &DriveOptions::default(),
            &AbortSignal::never(),
        )
        .await;

    assert_eq!(outcome, StreamOutcome::TransportError);
    let run = select_run(driver.state(), &run_id()).unwrap();
    assert_eq!(run.status, RunStatus::Error);
    let error = run.error.unwrap();
    assert_eq!(error.kind, StreamErrorKind::Http);
    assert_eq!(error.message, "HTTP 402: Insufficient credits");
    assert_eq!(error.code, Some(json!(402)));
    assert!(select_message(driver.state(), &target()).unwrap().is_complete);
}

#[tokio::test]
async fn abort_while_waiting_for_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(fixture("basic.sse"))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    let (handle, signal) = abort_pair();
    let mut aborts = 0;
    let mut driver = StreamDriver::with_observer(RootState::new(), |state: &RootState| {
        if select_run(state, &run_id()).is_some_and(|run| run.status == RunStatus::Aborted) {
            aborts += 1;
        }
    });

    let request = request(None);
    let options = DriveOptions::default();
    let id = run_id();
    let (outcome, ()) = tokio::join!(
        driver.run_live(&client, &id, start(None), &request, &options, &signal),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.abort();
        }
    );

    assert_eq!(outcome, StreamOutcome::Aborted);
    let run = select_run(driver.state(), &run_id()).unwrap();
    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(run.abort_reason.as_deref(), Some("aborted by caller"));

    // Further aborts change nothing.
    assert!(!driver.apply(&run_id(), &DomainEvent::StreamAbort { reason: None }));
    drop(driver);
    assert_eq!(aborts, 1);
}

#[tokio::test]
async fn generation_lookup_uses_the_streamed_id() {
    let server = MockServer::start().await;
    mount_sse_body(&server, &fixture("basic.sse")).await;
    Mock::given(method("GET"))
        .and(path("/generation"))
        .and(query_param("id", "gen-basic-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "gen-basic-1", "total_cost": 0.000_004_2, "tokens_prompt": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let mut driver = StreamDriver::new(RootState::new());
    driver
        .run_live(
            &client,
            &run_id(),
            start(None),
            &request(None),
            &DriveOptions::default(),
            &AbortSignal::never(),
        )
        .await;

    let data = lookup_generation(&client, driver.state(), &run_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data["id"], "gen-basic-1");
    assert_eq!(data["tokens_prompt"], 12);
}

#[tokio::test]
async fn generation_lookup_without_id_is_none() {
    let server = MockServer::start().await;
    let mut driver = StreamDriver::new(RootState::new());
    driver.start(&run_id(), start(None));

    let found = lookup_generation(&client(&server), driver.state(), &run_id())
        .await
        .unwrap();
    assert_eq!(found, None);
}
