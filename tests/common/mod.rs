//! Shared test utilities and fixtures
//!
//! Fixture loading, fixed run identities, and helpers that drive the
//! decoder/mapper/reducer pipeline from in-memory chunks.

#![allow(dead_code)]

use std::convert::Infallible;
use std::path::PathBuf;

use futures_util::stream;
use orchat_engine::{AbortSignal, DriveOptions, RootState, StreamDriver, StreamOutcome};
use orchat_types::{MessageId, RequestId, RunId, StartGeneration, UserMessageInit};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const FIXTURES: &[&str] = &[
    "basic.sse",
    "reasoning.sse",
    "mid_stream_error.sse",
    "tool_calls.sse",
    "utf8.sse",
];

pub fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../tests/fixtures")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
}

pub fn run_id() -> RunId {
    RunId::new("run-test")
}

pub fn target() -> MessageId {
    MessageId::new("msg-assistant")
}

pub fn start(requested_reasoning_exclude: Option<bool>) -> StartGeneration {
    StartGeneration {
        request_id: RequestId::new("req-test"),
        user_message: Some(UserMessageInit {
            message_id: MessageId::new("msg-user"),
            content: json!("What is 2 + 2?"),
        }),
        assistant_message_id: target(),
        requested_reasoning_exclude,
    }
}

/// Drive pre-split chunks through a fresh session.
pub async fn drive_chunks(
    chunks: Vec<Vec<u8>>,
    exclude: Option<bool>,
) -> (StreamOutcome, RootState) {
    let mut driver = StreamDriver::new(RootState::new());
    driver.start(&run_id(), start(exclude));
    let chunks = chunks.into_iter().map(Ok::<_, Infallible>);
    let outcome = driver
        .drive(
            &run_id(),
            stream::iter(chunks),
            &DriveOptions::default(),
            &AbortSignal::never(),
        )
        .await;
    (outcome, driver.into_state())
}

/// Drive a whole body delivered as a single chunk.
pub async fn drive_body(body: &str, exclude: Option<bool>) -> (StreamOutcome, RootState) {
    drive_chunks(vec![body.as_bytes().to_vec()], exclude).await
}

/// Split `bytes` at every position in `cuts` (sorted, in range).
pub fn split_at_all(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for &cut in cuts {
        chunks.push(bytes[start..cut].to_vec());
        start = cut;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

/// Mount a streaming chat completion that answers with `body`.
pub async fn mount_sse_body(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}
