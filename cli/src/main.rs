//! orchat binary: live chat, fixture replay, and generation lookup.

mod args;
mod render;

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use orchat_engine::{
    AbortHandle, DriveOptions, OrchatConfig, ReplayOptions, RootState, StreamDriver,
    StreamOutcome, abort_pair,
};
use orchat_providers::{OpenRouterClient, ReasoningParams, RequestParams, build_request};
use orchat_types::{MessageId, RequestId, RunId, StartGeneration, UserMessageInit};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::args::{ChatArgs, Cli, Command, OutputArgs, ReplayArgs};
use crate::render::{StreamRenderer, write_summary};

const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Exit status for a run cancelled with Ctrl-C.
const EXIT_ABORTED: u8 = 130;

fn init_tracing() {
    // Logs go to stderr so stdout carries only the streamed answer.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<OrchatConfig> {
    let loaded = match path {
        Some(path) => {
            let config = OrchatConfig::load_from(path)?;
            Some(config.with_context(|| format!("config file {} does not exist", path.display()))?)
        }
        None => OrchatConfig::load()?,
    };
    Ok(loaded.unwrap_or_default())
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

fn abort_on_ctrl_c(handle: AbortHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, aborting stream");
            handle.abort();
        }
    });
}

fn exit_code(outcome: StreamOutcome) -> ExitCode {
    match outcome {
        StreamOutcome::Completed => ExitCode::SUCCESS,
        StreamOutcome::Aborted => ExitCode::from(EXIT_ABORTED),
        _ => ExitCode::FAILURE,
    }
}

/// CLI flags win over the `[reasoning]` config section.
fn reasoning_params(args: &ChatArgs, config: &OrchatConfig) -> Result<Option<ReasoningParams>> {
    let from_flags = args.effort.is_some() || args.reasoning_max_tokens.is_some() || args.reasoning;
    if from_flags {
        return Ok(Some(ReasoningParams {
            enabled: args.reasoning.then_some(true),
            effort: args.effort,
            max_tokens: args.reasoning_max_tokens,
            exclude: args.exclude_reasoning.then_some(true),
        }));
    }

    let mut params = config.reasoning_params()?;
    if args.exclude_reasoning {
        let params = params.get_or_insert_with(|| ReasoningParams {
            enabled: Some(true),
            ..ReasoningParams::default()
        });
        params.exclude = Some(true);
    }
    Ok(params)
}

/// Streamed answer text goes to stdout unless stdout is reserved for the state dump.
fn answer_writer(output: &OutputArgs) -> Box<dyn Write> {
    if output.dump_state {
        Box::new(io::sink())
    } else {
        Box::new(io::stdout())
    }
}

fn finish_output(output: &OutputArgs, state: &RootState, run_id: &RunId) -> Result<()> {
    if output.dump_state {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        serde_json::to_writer_pretty(&mut stdout, state).context("serializing session state")?;
        writeln!(stdout)?;
        return Ok(());
    }
    let stderr = io::stderr();
    let mut stderr = stderr.lock();
    writeln!(stderr, "--")?;
    write_summary(&mut stderr, state, run_id)?;
    Ok(())
}

async fn run_chat(config: &OrchatConfig, args: ChatArgs) -> Result<StreamOutcome> {
    let api_key = config.api_key().context(
        "no API key: set [openrouter] api_key in the config file or OPENROUTER_API_KEY",
    )?;
    let model = args
        .model
        .clone()
        .or_else(|| config.model().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let mut messages = Vec::new();
    if let Some(system) = &args.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": args.prompt.clone()}));

    let mut params = RequestParams::new(model, messages, true);
    if let Some(reasoning) = reasoning_params(&args, config)? {
        params = params.with_reasoning(reasoning);
    }
    let request = build_request(params).context("invalid request")?;

    let client = OpenRouterClient::with_base_url(api_key, config.base_url())?;

    let run_id = RunId::new(new_id("run"));
    let assistant_id = MessageId::new(new_id("msg"));
    let start = StartGeneration {
        request_id: RequestId::new(new_id("req")),
        user_message: Some(UserMessageInit {
            message_id: MessageId::new(new_id("msg")),
            content: json!(args.prompt.clone()),
        }),
        assistant_message_id: assistant_id.clone(),
        requested_reasoning_exclude: None,
    };

    let (handle, signal) = abort_pair();
    abort_on_ctrl_c(handle);

    let mut renderer = StreamRenderer::new(
        assistant_id,
        answer_writer(&args.output),
        args.output.show_reasoning.then(io::stderr),
    );
    let mut driver =
        StreamDriver::with_observer(RootState::new(), |state: &RootState| renderer.on_update(state));

    let options = DriveOptions {
        idle_timeout: config.idle_timeout(),
        ..DriveOptions::default()
    };
    let outcome = driver
        .run_live(&client, &run_id, start, &request, &options, &signal)
        .await;

    finish_output(&args.output, driver.state(), &run_id)?;
    Ok(outcome)
}

async fn run_replay(config: &OrchatConfig, args: ReplayArgs) -> Result<StreamOutcome> {
    let fixture = std::fs::read_to_string(&args.fixture)
        .with_context(|| format!("reading fixture {}", args.fixture.display()))?;

    let run_id = RunId::new(new_id("replay"));
    let assistant_id = MessageId::new(new_id("msg"));
    let start = StartGeneration {
        request_id: RequestId::new(new_id("req")),
        user_message: None,
        assistant_message_id: assistant_id.clone(),
        requested_reasoning_exclude: args.exclude_reasoning.then_some(true),
    };

    let (handle, signal) = abort_pair();
    abort_on_ctrl_c(handle);

    let mut renderer = StreamRenderer::new(
        assistant_id,
        answer_writer(&args.output),
        args.output.show_reasoning.then(io::stderr),
    );
    let mut driver =
        StreamDriver::with_observer(RootState::new(), |state: &RootState| renderer.on_update(state));

    let options = ReplayOptions {
        chunk_size: args.chunk_size,
        event_delay: args
            .delay_ms
            .map_or_else(|| config.replay_delay(), std::time::Duration::from_millis),
        choice_index: Some(args.choice),
    };
    let outcome = driver
        .replay_fixture(&run_id, start, &fixture, &options, &signal)
        .await;

    finish_output(&args.output, driver.state(), &run_id)?;
    Ok(outcome)
}

async fn run_generation(config: &OrchatConfig, id: &str) -> Result<()> {
    let api_key = config.api_key().context(
        "no API key: set [openrouter] api_key in the config file or OPENROUTER_API_KEY",
    )?;
    let client = OpenRouterClient::with_base_url(api_key, config.base_url())?;
    let data = client
        .fetch_generation(&orchat_types::GenerationId::new(id))
        .await
        .with_context(|| format!("looking up generation {id}"))?;

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    serde_json::to_writer_pretty(&mut stdout, &data)?;
    writeln!(stdout)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref())?;

    let outcome = match cli.command {
        Command::Chat(args) => run_chat(&config, args).await?,
        Command::Replay(args) => run_replay(&config, args).await?,
        Command::Generation { id } => {
            run_generation(&config, &id).await?;
            return Ok(ExitCode::SUCCESS);
        }
    };
    Ok(exit_code(outcome))
}
