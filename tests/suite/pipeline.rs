//! End-to-end behaviour of fixture bodies through decoder, mapper and reducer.

use std::cell::RefCell;

use orchat_engine::{
    AbortSignal, ReplayOptions, RootState, StreamDriver, StreamOutcome, reduce, select_message,
    select_run, select_transcript, select_usage_session_total_derived, select_usage_this_turn,
};
use orchat_types::{
    DomainEvent, FinishReason, MessageId, ReasoningVisibility, Role, RunId, RunStatus,
    StreamErrorKind,
};
use serde_json::json;

use crate::common::{drive_body, fixture, run_id, start, target};

#[tokio::test]
async fn replay_is_deterministic() {
    let body = fixture("reasoning.sse");
    let (first_outcome, first) = drive_body(&body, None).await;
    let (second_outcome, second) = drive_body(&body, None).await;

    assert_eq!(first_outcome, second_outcome);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn basic_stream_completes_with_tail_usage() {
    let (outcome, state) = drive_body(&fixture("basic.sse"), None).await;
    assert_eq!(outcome, StreamOutcome::Completed);

    let run = select_run(&state, &run_id()).unwrap();
    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(run.finish_reason, Some(FinishReason::Stop));
    assert_eq!(run.model.as_deref(), Some("openai/gpt-4o-mini"));
    assert_eq!(run.provider.as_deref(), Some("OpenAI"));
    assert_eq!(
        run.generation_id.as_ref().map(|id| id.as_str()),
        Some("gen-basic-1")
    );
    assert_eq!(run.comment_count, 1);
    assert!(!run.can_retry);

    // Usage arrives after the finish chunk, in a chunk with no choices.
    let usage = select_usage_this_turn(&state, &run_id()).unwrap();
    assert_eq!(usage.prompt_tokens, 12);
    assert_eq!(usage.completion_tokens, 2);
    assert_eq!(usage.total_tokens, 14);
    assert!((usage.cost.unwrap() - 0.000_004_2).abs() < 1e-12);

    let message = select_message(&state, &target()).unwrap();
    assert_eq!(message.content_text, "Hello World");
    assert!(message.is_complete);
    assert!(!message.is_streaming);
}

#[tokio::test]
async fn transcript_orders_user_before_assistant() {
    let (_, state) = drive_body(&fixture("basic.sse"), None).await;
    let transcript = select_transcript(&state, &run_id());

    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].content_text, "What is 2 + 2?");
    assert_eq!(transcript[1].role, Role::Assistant);
    assert!(transcript[1].is_target);
}

#[tokio::test]
async fn mid_stream_error_keeps_partial_output() {
    let (outcome, state) = drive_body(&fixture("mid_stream_error.sse"), None).await;
    assert_eq!(outcome, StreamOutcome::ProviderError);

    let run = select_run(&state, &run_id()).unwrap();
    assert_eq!(run.status, RunStatus::Error);
    assert!(run.can_retry);
    let error = run.error.unwrap();
    assert_eq!(error.kind, StreamErrorKind::Provider);
    assert_eq!(error.message, "Provider disconnected unexpectedly");
    assert_eq!(error.code, Some(json!(502)));

    let message = select_message(&state, &target()).unwrap();
    assert_eq!(message.content_text, "Hello World");
    assert!(message.is_complete);
}

#[tokio::test]
async fn meta_fields_are_set_once() {
    let (_, state) = drive_body(&fixture("basic.sse"), None).await;
    let meta = DomainEvent::MetaDelta(orchat_types::MetaDelta {
        model: Some("other/model".into()),
        provider: Some("Other".into()),
        ..Default::default()
    });
    let next = reduce(&state, &run_id(), &meta);

    let run = select_run(&next, &run_id()).unwrap();
    assert_eq!(run.model.as_deref(), Some("openai/gpt-4o-mini"));
    assert_eq!(run.provider.as_deref(), Some("OpenAI"));
}

#[tokio::test]
async fn reasoning_text_only_grows_by_appending() {
    let seen = RefCell::new(Vec::<String>::new());
    let mut driver = StreamDriver::with_observer(RootState::new(), |state: &RootState| {
        if let Some(message) = select_message(state, &target()) {
            seen.borrow_mut().push(message.reasoning_text);
        }
    });
    let outcome = driver
        .replay_fixture(
            &run_id(),
            start(None),
            &fixture("reasoning.sse"),
            &ReplayOptions {
                chunk_size: Some(17),
                ..ReplayOptions::default()
            },
            &AbortSignal::never(),
        )
        .await;
    assert_eq!(outcome, StreamOutcome::Completed);
    drop(driver);

    let seen = seen.into_inner();
    for pair in seen.windows(2) {
        assert!(pair[1].starts_with(&pair[0]), "{:?} -> {:?}", pair[0], pair[1]);
    }
    assert_eq!(seen.last().map(String::as_str), Some("Let me count: 2+2."));
}

#[tokio::test]
async fn reasoning_fixture_is_shown_with_summary_and_encrypted_detail() {
    let (_, state) = drive_body(&fixture("reasoning.sse"), None).await;
    let message = select_message(&state, &target()).unwrap();

    assert_eq!(message.reasoning_visibility, ReasoningVisibility::Shown);
    assert_eq!(message.reasoning_summary.as_deref(), Some("Simple arithmetic."));
    assert_eq!(message.reasoning_detail_count, 4);
    assert!(message.has_encrypted_reasoning);
    assert_eq!(message.content_text, "2 + 2 = 4");

    let run = select_run(&state, &run_id()).unwrap();
    assert_eq!(run.native_finish_reason.as_deref(), Some("end_turn"));
    let usage = run.usage.unwrap();
    assert_eq!(usage.reasoning_tokens(), 40);
    assert_eq!(usage.cached_tokens(), 8);
}

#[tokio::test]
async fn excluded_reasoning_is_not_reported_as_missing() {
    let (_, state) = drive_body(&fixture("basic.sse"), Some(true)).await;
    let message = select_message(&state, &target()).unwrap();
    assert_eq!(message.reasoning_visibility, ReasoningVisibility::Excluded);
    assert!(!message.has_encrypted_reasoning);
}

#[tokio::test]
async fn absent_reasoning_is_not_returned() {
    let (_, state) = drive_body(&fixture("basic.sse"), None).await;
    let message = select_message(&state, &target()).unwrap();
    assert_eq!(message.reasoning_visibility, ReasoningVisibility::NotReturned);
    assert_eq!(message.reasoning_detail_count, 0);
}

#[tokio::test]
async fn terminal_runs_ignore_further_events() {
    let (_, state) = drive_body(&fixture("basic.sse"), None).await;
    for event in [
        DomainEvent::MessageDeltaText {
            message_id: target(),
            text: "late".into(),
        },
        DomainEvent::StreamAbort { reason: None },
        DomainEvent::StreamDone,
    ] {
        let next = reduce(&state, &run_id(), &event);
        assert!(next.is_unchanged_from(&state), "{}", event.kind());
    }
}

#[tokio::test]
async fn tool_call_arguments_merge_across_chunks() {
    let (outcome, state) = drive_body(&fixture("tool_calls.sse"), None).await;
    assert_eq!(outcome, StreamOutcome::Completed);

    let run = select_run(&state, &run_id()).unwrap();
    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(run.finish_reason, Some(FinishReason::ToolCalls));

    let message = select_message(&state, &target()).unwrap();
    assert_eq!(message.content_text, "");
    assert_eq!(message.tool_calls.len(), 2);

    let weather = &message.tool_calls[0];
    assert_eq!(weather.id.as_deref(), Some("call_weather"));
    assert_eq!(weather.function.name.as_deref(), Some("get_weather"));
    assert_eq!(weather.function.arguments, r#"{"city":"Oslo"}"#);

    let time = &message.tool_calls[1];
    assert_eq!(time.function.name.as_deref(), Some("get_time"));
    assert_eq!(time.function.arguments, "{}");
}

#[tokio::test]
async fn session_totals_sum_every_run() {
    let mut driver = StreamDriver::new(RootState::new());
    for (index, name) in ["basic.sse", "reasoning.sse", "tool_calls.sse"].iter().enumerate() {
        let run = RunId::new(format!("run-{index}"));
        let mut start = start(None);
        start.assistant_message_id = MessageId::new(format!("assistant-{index}"));
        start.user_message = None;
        driver
            .replay_fixture(
                &run,
                start,
                &fixture(name),
                &ReplayOptions::default(),
                &AbortSignal::never(),
            )
            .await;
    }

    let totals = select_usage_session_total_derived(driver.state());
    assert_eq!(totals.runs, 3);
    assert_eq!(totals.prompt_tokens, 12 + 20 + 60);
    assert_eq!(totals.completion_tokens, 2 + 48 + 31);
    assert_eq!(totals.total_tokens, 14 + 68 + 91);
    assert_eq!(totals.reasoning_tokens, 40);
}

#[tokio::test]
async fn second_choice_can_be_followed() {
    let body = concat!(
        r#"data: {"id":"gen-n","choices":[{"index":0,"delta":{"content":"first"}},{"index":1,"delta":{"content":"second"}}]}"#,
        "\n\n",
        r#"data: {"id":"gen-n","choices":[{"index":1,"delta":{},"finish_reason":"length"}]}"#,
        "\n\n",
        "data: [DONE]\n\n",
    );
    let mut driver = StreamDriver::new(RootState::new());
    let outcome = driver
        .replay_fixture(
            &run_id(),
            start(None),
            body,
            &ReplayOptions {
                choice_index: Some(1),
                ..ReplayOptions::default()
            },
            &AbortSignal::never(),
        )
        .await;

    assert_eq!(outcome, StreamOutcome::Completed);
    let state = driver.into_state();
    assert_eq!(select_message(&state, &target()).unwrap().content_text, "second");
    assert_eq!(
        select_run(&state, &run_id()).unwrap().finish_reason,
        Some(FinishReason::Length)
    );
}
