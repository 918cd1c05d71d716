//! Stream drivers: bytes in, reduced state out.
//!
//! Both the live path ([`StreamDriver::run_live`]) and fixture replay
//! ([`StreamDriver::replay_fixture`]) end in the same loop,
//! [`StreamDriver::drive`], which feeds byte chunks through the SSE decoder
//! and the chunk mapper into the reducer. The live path differs only in where
//! the bytes come from, so replaying a captured body reproduces the exact
//! state a live run would have produced.
//!
//! Suspension points are the next-chunk await and the optional per-event
//! delay; the abort signal is raced against both. On abort exactly one
//! `StreamAbort` is applied and nothing more is read.

use std::convert::Infallible;
use std::fmt::Display;
use std::pin::pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt, stream};
use orchat_providers::sse::MAX_SSE_LINE_BYTES;
use orchat_providers::{
    ChatRequest, OpenRouterClient, SseDecoder, SseEvent, TransportError, map_chunk,
    provider_error_message,
};
use orchat_types::{
    DomainEvent, MessageId, RunId, StartGeneration, StreamErrorInfo, StreamErrorKind,
};
use serde_json::Value;

use crate::abort::AbortSignal;
use crate::reducer::reduce;
use crate::state::RootState;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const ABORT_REASON: &str = "aborted by caller";
const ENDED_EARLY_MESSAGE: &str = "stream ended before completion";

#[derive(Debug, Clone)]
pub struct DriveOptions {
    /// Pause before applying each decoded SSE event. Zero for live streams.
    pub event_delay: Duration,
    /// Longest wait for the next byte chunk. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    pub max_line_bytes: usize,
    /// Choice to follow in multi-choice responses; `None` is the first.
    pub choice_index: Option<usize>,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            event_delay: Duration::ZERO,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            max_line_bytes: MAX_SSE_LINE_BYTES,
            choice_index: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Split the fixture into chunks of this many bytes; `None` or zero
    /// delivers it in one piece.
    pub chunk_size: Option<usize>,
    pub event_delay: Duration,
    pub choice_index: Option<usize>,
}

/// How a drive ended. The run itself carries the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `[DONE]` received, or the stream closed after a finish reason.
    Completed,
    /// Provider `error` payload mid-stream.
    ProviderError,
    /// Malformed SSE framing or JSON.
    ProtocolError,
    /// HTTP status, connection, read, or idle-timeout failure.
    TransportError,
    Aborted,
    /// The byte stream closed with no `[DONE]` and no finish reason.
    EndedWithoutDone,
    /// The run was unknown or already terminal; nothing was read.
    NotStarted,
}

/// Owns the session state and every reduction applied to it.
///
/// `on_update` is called with the new state after each reduction that
/// changed something.
pub struct StreamDriver<F = fn(&RootState)> {
    state: RootState,
    on_update: F,
}

impl StreamDriver {
    #[must_use]
    pub fn new(state: RootState) -> Self {
        Self {
            state,
            on_update: |_| {},
        }
    }
}

impl<F> StreamDriver<F>
where
    F: FnMut(&RootState),
{
    pub fn with_observer(state: RootState, on_update: F) -> Self {
        Self { state, on_update }
    }

    #[must_use]
    pub fn state(&self) -> &RootState {
        &self.state
    }

    #[must_use]
    pub fn into_state(self) -> RootState {
        self.state
    }

    /// Reduce one event. Returns whether the state changed.
    pub fn apply(&mut self, run_id: &RunId, event: &DomainEvent) -> bool {
        let next = reduce(&self.state, run_id, event);
        if next.is_unchanged_from(&self.state) {
            return false;
        }
        self.state = next;
        (self.on_update)(&self.state);
        true
    }

    pub fn start(&mut self, run_id: &RunId, start: StartGeneration) -> bool {
        tracing::info!(
            run_id = %run_id,
            request_id = %start.request_id,
            "Starting run"
        );
        self.apply(run_id, &DomainEvent::StartGeneration(start))
    }

    /// Start a run, POST `request`, and drive the response body.
    ///
    /// The run records `reasoning.exclude` exactly as `request` carries it.
    /// A failure before the first byte becomes a terminal `StreamError`.
    pub async fn run_live(
        &mut self,
        client: &OpenRouterClient,
        run_id: &RunId,
        mut start: StartGeneration,
        request: &ChatRequest,
        options: &DriveOptions,
        abort: &AbortSignal,
    ) -> StreamOutcome {
        start.requested_reasoning_exclude = request.requested_reasoning_exclude();
        if !self.start(run_id, start) {
            return StreamOutcome::NotStarted;
        }

        let body = tokio::select! {
            biased;
            () = abort.aborted() => return self.abort(run_id),
            body = client.stream_chat(request) => body,
        };

        match body {
            Ok(bytes) => self.drive(run_id, bytes, options, abort).await,
            Err(err) => {
                tracing::warn!(run_id = %run_id, error = %err, "Chat request failed");
                self.apply(run_id, &DomainEvent::terminal_error(transport_error_info(&err)));
                StreamOutcome::TransportError
            }
        }
    }

    /// Start a run and drive it from a captured SSE body.
    pub async fn replay_fixture(
        &mut self,
        run_id: &RunId,
        start: StartGeneration,
        fixture: &str,
        options: &ReplayOptions,
        abort: &AbortSignal,
    ) -> StreamOutcome {
        if !self.start(run_id, start) {
            return StreamOutcome::NotStarted;
        }

        let bytes = fixture.as_bytes();
        let chunk_size = options
            .chunk_size
            .filter(|size| *size > 0)
            .unwrap_or(bytes.len().max(1));
        let chunks: Vec<Result<&[u8], Infallible>> = bytes.chunks(chunk_size).map(Ok).collect();

        let drive_options = DriveOptions {
            event_delay: options.event_delay,
            idle_timeout: None,
            choice_index: options.choice_index,
            ..DriveOptions::default()
        };
        self.drive(run_id, stream::iter(chunks), &drive_options, abort)
            .await
    }

    /// Feed a byte stream through decoder and mapper into the run.
    ///
    /// The run must already exist and be non-terminal.
    pub async fn drive<S, B, E>(
        &mut self,
        run_id: &RunId,
        bytes: S,
        options: &DriveOptions,
        abort: &AbortSignal,
    ) -> StreamOutcome
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let Some(message_id) = self.live_target(run_id) else {
            tracing::debug!(run_id = %run_id, "Not driving unknown or finished run");
            return StreamOutcome::NotStarted;
        };

        let mut bytes = pin!(bytes);
        let mut decoder = SseDecoder::with_max_line_bytes(options.max_line_bytes);
        let mut first_event = true;

        loop {
            let pulled = tokio::select! {
                biased;
                () = abort.aborted() => return self.abort(run_id),
                pulled = next_chunk(&mut bytes, options.idle_timeout) => pulled,
            };

            let (events, at_eof) = match pulled {
                Pulled::Chunk(chunk) => (decoder.push(chunk.as_ref()), false),
                Pulled::End => (decoder.finish(), true),
                Pulled::Failed(message) => {
                    tracing::warn!(run_id = %run_id, %message, "Stream read failed");
                    self.apply(
                        run_id,
                        &DomainEvent::terminal_error(StreamErrorInfo::new(
                            StreamErrorKind::Transport,
                            message,
                        )),
                    );
                    return StreamOutcome::TransportError;
                }
            };

            for event in events {
                if !options.event_delay.is_zero() && !first_event {
                    tokio::select! {
                        biased;
                        () = abort.aborted() => return self.abort(run_id),
                        () = tokio::time::sleep(options.event_delay) => {}
                    }
                }
                first_event = false;

                if abort.is_aborted() {
                    return self.abort(run_id);
                }
                if let Some(outcome) = self.handle_sse(run_id, &message_id, event, options) {
                    self.log_finish(run_id, outcome);
                    return outcome;
                }
            }

            if at_eof {
                let outcome = self.finish_without_done(run_id);
                self.log_finish(run_id, outcome);
                return outcome;
            }
        }
    }

    fn handle_sse(
        &mut self,
        run_id: &RunId,
        message_id: &MessageId,
        event: SseEvent,
        options: &DriveOptions,
    ) -> Option<StreamOutcome> {
        match event {
            SseEvent::Comment { text } => {
                self.apply(run_id, &DomainEvent::StreamComment { text });
                None
            }
            SseEvent::Done => {
                self.apply(run_id, &DomainEvent::StreamDone);
                Some(StreamOutcome::Completed)
            }
            SseEvent::Json { value, .. } => {
                for event in map_chunk(&value, message_id, options.choice_index) {
                    self.apply(run_id, &event);
                }
                None
            }
            SseEvent::ProtocolError { message, raw } => {
                tracing::warn!(run_id = %run_id, %message, "Malformed stream payload");
                let mut info = StreamErrorInfo::new(StreamErrorKind::Protocol, message);
                info.raw = Some(Value::String(raw));
                self.apply(run_id, &DomainEvent::terminal_error(info));
                Some(StreamOutcome::ProtocolError)
            }
            SseEvent::TerminalError { error, message, .. } => {
                tracing::warn!(run_id = %run_id, %message, "Provider reported a stream error");
                // The mapper has already failed the run from the same chunk.
                if self.live_target(run_id).is_some() {
                    let mut info = StreamErrorInfo::new(StreamErrorKind::Provider, message);
                    info.code = error.get("code").cloned();
                    info.raw = Some(error);
                    self.apply(run_id, &DomainEvent::terminal_error(info));
                }
                Some(StreamOutcome::ProviderError)
            }
        }
    }

    fn finish_without_done(&mut self, run_id: &RunId) -> StreamOutcome {
        let Some(run) = self.state.run(run_id) else {
            return StreamOutcome::NotStarted;
        };
        if run.finish_reason.is_some() {
            self.apply(run_id, &DomainEvent::StreamDone);
            return StreamOutcome::Completed;
        }
        tracing::warn!(run_id = %run_id, "Stream closed without [DONE] or finish reason");
        self.apply(
            run_id,
            &DomainEvent::terminal_error(StreamErrorInfo::new(
                StreamErrorKind::Transport,
                ENDED_EARLY_MESSAGE,
            )),
        );
        StreamOutcome::EndedWithoutDone
    }

    fn abort(&mut self, run_id: &RunId) -> StreamOutcome {
        tracing::info!(run_id = %run_id, "Run aborted");
        self.apply(
            run_id,
            &DomainEvent::StreamAbort {
                reason: Some(ABORT_REASON.to_string()),
            },
        );
        StreamOutcome::Aborted
    }

    /// Target message of a run that can still accept events.
    fn live_target(&self, run_id: &RunId) -> Option<MessageId> {
        self.state
            .run(run_id)
            .filter(|run| !run.status.is_terminal())
            .map(|run| run.target_assistant_message_id.clone())
    }

    fn log_finish(&self, run_id: &RunId, outcome: StreamOutcome) {
        let status = self.state.run(run_id).map(|run| run.status);
        tracing::info!(run_id = %run_id, ?outcome, ?status, "Stream finished");
    }
}

/// Fetch the generation record of a run, if the provider assigned it an id.
pub async fn lookup_generation(
    client: &OpenRouterClient,
    state: &RootState,
    run_id: &RunId,
) -> Result<Option<Value>, TransportError> {
    let Some(generation_id) = state.run(run_id).and_then(|run| run.generation_id.as_ref()) else {
        return Ok(None);
    };
    client.fetch_generation(generation_id).await.map(Some)
}

enum Pulled<B> {
    Chunk(B),
    End,
    Failed(String),
}

async fn next_chunk<S, B, E>(bytes: &mut S, idle_timeout: Option<Duration>) -> Pulled<B>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    E: Display,
{
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, bytes.next()).await {
            Ok(next) => next,
            Err(_) => {
                return Pulled::Failed(format!(
                    "no data received for {}s",
                    limit.as_secs_f64()
                ));
            }
        },
        None => bytes.next().await,
    };
    match next {
        Some(Ok(chunk)) => Pulled::Chunk(chunk),
        Some(Err(err)) => Pulled::Failed(err.to_string()),
        None => Pulled::End,
    }
}

/// Terminal error for a request that failed before streaming began.
fn transport_error_info(err: &TransportError) -> StreamErrorInfo {
    match err {
        TransportError::Http { status, body } => {
            let raw = serde_json::from_str::<Value>(body).ok();
            let message = raw
                .as_ref()
                .and_then(|value| value.get("error"))
                .map_or_else(
                    || format!("HTTP {status}"),
                    |error| format!("HTTP {status}: {}", provider_error_message(error)),
                );
            StreamErrorInfo {
                kind: StreamErrorKind::Http,
                message,
                code: Some(Value::from(*status)),
                raw: raw.or_else(|| (!body.is_empty()).then(|| Value::String(body.clone()))),
            }
        }
        other => StreamErrorInfo::new(StreamErrorKind::Transport, other.to_string()),
    }
}
