//! Incremental SSE decoder for `OpenRouter` chat-completion streams.
//!
//! Bytes go in, typed [`SseEvent`]s come out. The decoder is fed arbitrary
//! fragments: a line is only interpreted once its terminating `\n` has arrived,
//! so a split anywhere (including inside a multi-byte UTF-8 sequence) produces
//! the same events as the unsplit input.
//!
//! | Input | Output |
//! |-------|--------|
//! | `: text` | `Comment` (never JSON-parsed) |
//! | `data: ...` | buffered until a blank line |
//! | block `[DONE]` | `Done`, decoder halts |
//! | block with invalid JSON | `ProtocolError`, decoder halts |
//! | block with truthy `error` | `Json` then `TerminalError`, decoder halts |
//! | any other block | `Json` |
//! | line or block over the size limit | `ProtocolError`, decoder halts |

use serde_json::Value;

use crate::{is_truthy, provider_error_message};

/// Sentinel payload that ends a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Upper bound on a single unterminated line held in memory.
pub const MAX_SSE_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Comment { text: String },
    Done,
    Json { value: Value, raw: String },
    ProtocolError { message: String, raw: String },
    TerminalError {
        error: Value,
        raw: String,
        message: String,
    },
}

impl SseEvent {
    /// Whether the caller must stop reading after this event.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::ProtocolError { .. } | Self::TerminalError { .. }
        )
    }
}

#[derive(Debug)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line. Never contains `\n`
    /// between pushes.
    pending: Vec<u8>,
    /// `data:` payloads of the current block.
    data_lines: Vec<String>,
    /// Size of `data_lines` once joined with `\n`.
    data_bytes: usize,
    halted: bool,
    max_line_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_SSE_LINE_BYTES)
    }

    /// `max_line_bytes` bounds both a single line (without its terminator)
    /// and the joined `data:` payload of one block.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            data_lines: Vec::new(),
            data_bytes: 0,
            halted: false,
            max_line_bytes,
        }
    }

    /// True after `Done`, a hard error, or [`SseDecoder::finish`].
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Feed the next fragment of the byte stream.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        if self.halted {
            return out;
        }

        // Bytes already held have been searched for `\n` on an earlier push.
        let mut search_from = self.pending.len();
        self.pending.extend_from_slice(bytes);

        let mut consumed = 0;
        while let Some(offset) = self.pending[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            let line = decode_line(&self.pending[consumed..end], self.max_line_bytes);
            consumed = end + 1;
            search_from = consumed;
            self.handle_line(line, &mut out);
            if self.halted {
                break;
            }
        }
        self.pending.drain(..consumed);

        // A held tail longer than the limit plus a possible `\r` can only
        // complete as an oversized line.
        if !self.halted && self.pending.len() > self.max_line_bytes.saturating_add(1) {
            out.push(oversized("line", &self.pending, self.max_line_bytes));
            self.halted = true;
        }

        if self.halted {
            self.reset_buffers();
        }
        out
    }

    /// Signal end of input.
    ///
    /// An unterminated trailing line is processed and the open block flushed
    /// once, even without `[DONE]`. The decoder is halted afterwards.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut out = Vec::new();
        if self.halted {
            return out;
        }

        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.handle_line(decode_line(&tail, self.max_line_bytes), &mut out);
        }
        if !self.halted {
            self.flush_block(&mut out);
        }

        self.halted = true;
        self.reset_buffers();
        out
    }

    fn reset_buffers(&mut self) {
        self.pending.clear();
        self.data_lines.clear();
        self.data_bytes = 0;
    }

    fn handle_line(&mut self, line: Result<String, SseEvent>, out: &mut Vec<SseEvent>) {
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                out.push(error);
                self.halted = true;
                return;
            }
        };

        if line.is_empty() {
            self.flush_block(out);
            return;
        }

        if let Some(comment) = line.strip_prefix(':') {
            out.push(SseEvent::Comment {
                text: strip_single_space(comment).to_string(),
            });
            return;
        }

        if let Some(data) = line.strip_prefix("data:") {
            let data = strip_single_space(data);
            let joined = self.data_bytes + usize::from(!self.data_lines.is_empty()) + data.len();
            if joined > self.max_line_bytes {
                let mut block = self.data_lines.join("\n");
                if !self.data_lines.is_empty() {
                    block.push('\n');
                }
                block.push_str(data);
                out.push(oversized("event", block.as_bytes(), self.max_line_bytes));
                self.halted = true;
                return;
            }
            self.data_bytes = joined;
            self.data_lines.push(data.to_string());
        }
        // `event:`, `id:` and `retry:` carry nothing for chat completions.
    }

    fn flush_block(&mut self, out: &mut Vec<SseEvent>) {
        if self.data_lines.is_empty() {
            return;
        }

        let raw = self.data_lines.join("\n");
        self.data_lines.clear();
        self.data_bytes = 0;

        if raw == DONE_SENTINEL {
            out.push(SseEvent::Done);
            self.halted = true;
            return;
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                let error = value.get("error").filter(|e| is_truthy(e)).cloned();
                out.push(SseEvent::Json {
                    value,
                    raw: raw.clone(),
                });
                if let Some(error) = error {
                    let message = provider_error_message(&error);
                    tracing::debug!(%message, "Provider error in SSE stream");
                    out.push(SseEvent::TerminalError {
                        error,
                        raw,
                        message,
                    });
                    self.halted = true;
                }
            }
            Err(e) => {
                tracing::warn!(%e, payload_bytes = raw.len(), "Invalid SSE JSON payload");
                out.push(SseEvent::ProtocolError {
                    message: format!("Invalid stream payload: {e}"),
                    raw,
                });
                self.halted = true;
            }
        }
    }
}

/// Decode a complete stream held in memory, fragment by fragment.
pub fn decode_all<I, B>(chunks: I) -> Vec<SseEvent>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut decoder = SseDecoder::new();
    let mut events = Vec::new();
    for chunk in chunks {
        events.extend(decoder.push(chunk.as_ref()));
        if decoder.is_halted() {
            return events;
        }
    }
    events.extend(decoder.finish());
    events
}

fn decode_line(bytes: &[u8], max_line_bytes: usize) -> Result<String, SseEvent> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    if bytes.len() > max_line_bytes {
        return Err(oversized("line", bytes, max_line_bytes));
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// `raw` keeps only the first `limit` bytes, which are the same however the
/// input was fragmented.
fn oversized(what: &str, bytes: &[u8], limit: usize) -> SseEvent {
    tracing::warn!(limit, "SSE {what} exceeded maximum size");
    SseEvent::ProtocolError {
        message: format!("SSE {what} exceeded maximum size ({limit} bytes)"),
        raw: String::from_utf8_lossy(&bytes[..limit.min(bytes.len())]).into_owned(),
    }
}

fn strip_single_space(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}
