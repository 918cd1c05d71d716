//! Terminal output, built only from selector view models.

use std::io::{self, Write};

use orchat_engine::{
    RootState, select_message, select_run, select_transcript, select_usage_this_turn,
};
use orchat_types::{MessageId, ReasoningVisibility, Role, RunId};

/// Writes the target message incrementally as the state grows.
///
/// Content and reasoning are append-only, so each update prints only the
/// suffix past what was already written.
pub struct StreamRenderer<W, R> {
    message_id: MessageId,
    text_out: W,
    reasoning_out: Option<R>,
    printed_text: usize,
    printed_reasoning: usize,
    finished: bool,
}

impl<W: Write, R: Write> StreamRenderer<W, R> {
    pub fn new(message_id: MessageId, text_out: W, reasoning_out: Option<R>) -> Self {
        Self {
            message_id,
            text_out,
            reasoning_out,
            printed_text: 0,
            printed_reasoning: 0,
            finished: false,
        }
    }

    pub fn on_update(&mut self, state: &RootState) {
        if let Err(e) = self.render(state) {
            tracing::debug!(error = %e, "Failed to write stream output");
        }
    }

    fn render(&mut self, state: &RootState) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        let Some(message) = select_message(state, &self.message_id) else {
            return Ok(());
        };

        if let Some(out) = &mut self.reasoning_out
            && let Some(new) = message.reasoning_text.get(self.printed_reasoning..)
            && !new.is_empty()
        {
            out.write_all(new.as_bytes())?;
            out.flush()?;
            self.printed_reasoning = message.reasoning_text.len();
        }

        if let Some(new) = message.content_text.get(self.printed_text..)
            && !new.is_empty()
        {
            self.text_out.write_all(new.as_bytes())?;
            self.text_out.flush()?;
            self.printed_text = message.content_text.len();
        }

        if message.is_complete {
            self.finished = true;
            if self.printed_text > 0 && !message.content_text.ends_with('\n') {
                self.text_out.write_all(b"\n")?;
                self.text_out.flush()?;
            }
        }
        Ok(())
    }
}

/// One-block summary of a finished run.
pub fn write_summary(out: &mut impl Write, state: &RootState, run_id: &RunId) -> io::Result<()> {
    let Some(run) = select_run(state, run_id) else {
        return writeln!(out, "run {run_id}: not found");
    };

    match (run.finish_reason, &run.native_finish_reason) {
        (Some(reason), Some(native)) if native != reason.as_str() => {
            writeln!(out, "status: {} ({reason}, native {native})", run.status)?;
        }
        (Some(reason), _) => writeln!(out, "status: {} ({reason})", run.status)?,
        (None, _) => writeln!(out, "status: {}", run.status)?,
    }

    if let Some(model) = &run.model {
        match &run.provider {
            Some(provider) => writeln!(out, "model: {model} via {provider}")?,
            None => writeln!(out, "model: {model}")?,
        }
    }
    if let Some(generation_id) = &run.generation_id {
        writeln!(out, "generation: {generation_id}")?;
    }

    if let Some(usage) = select_usage_this_turn(state, run_id) {
        write!(
            out,
            "tokens: {} prompt + {} completion = {}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        )?;
        let (reasoning, cached) = (usage.reasoning_tokens(), usage.cached_tokens());
        if reasoning > 0 || cached > 0 {
            write!(out, " ({reasoning} reasoning, {cached} cached)")?;
        }
        if let Some(cost) = usage.cost {
            write!(out, ", cost {cost:.6}")?;
        }
        writeln!(out)?;
    }

    for message in select_transcript(state, run_id) {
        if message.role != Role::Assistant {
            continue;
        }
        for call in &message.tool_calls {
            writeln!(
                out,
                "tool call #{}: {}({})",
                call.index,
                call.function.name.as_deref().unwrap_or("?"),
                call.function.arguments
            )?;
        }
        if let Some(summary) = &message.reasoning_summary {
            writeln!(out, "reasoning summary: {summary}")?;
        }
        match message.reasoning_visibility {
            ReasoningVisibility::Shown if message.has_encrypted_reasoning => {
                writeln!(out, "reasoning: returned encrypted")?;
            }
            ReasoningVisibility::Shown => writeln!(
                out,
                "reasoning: {} detail(s) returned",
                message.reasoning_detail_count
            )?,
            ReasoningVisibility::Excluded => writeln!(out, "reasoning: hidden by request")?,
            ReasoningVisibility::NotReturned => {}
        }
    }

    if let Some(error) = &run.error {
        writeln!(out, "error [{}]: {}", error.kind, error.message)?;
    }
    if run.comment_count > 0 {
        writeln!(out, "comments: {}", run.comment_count)?;
    }
    if run.can_retry {
        writeln!(out, "run can be retried")?;
    }
    Ok(())
}
