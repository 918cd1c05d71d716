//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use orchat_providers::ReasoningEffort;

/// Stream chat completions from OpenRouter.
#[derive(Debug, Parser)]
#[command(name = "orchat", version)]
pub struct Cli {
    /// Path to config file (default: ~/.orchat/config.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one prompt and stream the answer.
    Chat(ChatArgs),
    /// Drive a captured SSE body through the same pipeline as a live stream.
    Replay(ReplayArgs),
    /// Print the stored record of a finished generation.
    Generation {
        /// Generation id (`gen-...`) reported in the stream.
        id: String,
    },
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    pub prompt: String,

    /// Override model name.
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Optional system prompt.
    #[arg(short = 's', long = "system")]
    pub system: Option<String>,

    /// Reasoning effort: xhigh, high, medium, low, minimal, none.
    #[arg(long = "effort", value_parser = parse_effort, conflicts_with_all = ["reasoning_max_tokens", "reasoning"])]
    pub effort: Option<ReasoningEffort>,

    /// Reasoning token budget.
    #[arg(long = "reasoning-max-tokens", conflicts_with = "reasoning")]
    pub reasoning_max_tokens: Option<u64>,

    /// Enable reasoning at the provider's default effort.
    #[arg(long = "reasoning")]
    pub reasoning: bool,

    /// Ask the provider to reason without returning the reasoning.
    /// Implies --reasoning when no other reasoning option is given.
    #[arg(long = "exclude-reasoning")]
    pub exclude_reasoning: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// SSE body captured from a chat completion response.
    pub fixture: PathBuf,

    /// Pause between events, in milliseconds (default: [stream] replay_delay_ms).
    #[arg(long = "delay-ms")]
    pub delay_ms: Option<u64>,

    /// Feed the body in chunks of this many bytes.
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,

    /// Choice to follow in multi-choice bodies.
    #[arg(long = "choice", default_value_t = 0)]
    pub choice: usize,

    /// Treat the replayed run as if its request had set reasoning.exclude.
    #[arg(long = "exclude-reasoning")]
    pub exclude_reasoning: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Stream reasoning text to stderr.
    #[arg(long = "show-reasoning")]
    pub show_reasoning: bool,

    /// Print the final session state as JSON instead of the summary.
    #[arg(long = "dump-state")]
    pub dump_state: bool,
}

fn parse_effort(raw: &str) -> Result<ReasoningEffort, String> {
    ReasoningEffort::parse(raw)
        .ok_or_else(|| format!("expected one of xhigh, high, medium, low, minimal, none; got {raw:?}"))
}
