//! Agent Builder CLI - Headless Conversation Surface
//!
//! Binds a builder workflow, sends the first prompt over the event stream and
//! then reads follow-up turns from stdin, one per line. Turns received from
//! the builder are printed to stdout; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Start a conversation against the default server
//! agent-builder --builder-id 7 --gallery-id 3 "create an agent that triages tickets"
//!
//! # Custom server and config file
//! agent-builder --base-url https://builder.example.com/api --config ./builder.toml \
//!     --builder-id 7 --gallery-id 3
//!
//! # Verbose logging
//! RUST_LOG=debug agent-builder --builder-id 7 --gallery-id 3
//! ```
//!
//! # Signals
//!
//! - `SIGINT` while the opening request streams: cancel it and keep reading
//! - `SIGINT` otherwise: close the conversation and exit

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use builder_core::{
    default_config_path, load_config_from_path, BuilderConfig, BuilderError, BuilderMessage,
    ConfigOverrides, ConversationState, ErrorClass, HttpStreamDriver, NotifyLevel, Orchestrator,
    StreamTransport, TurnRole, WorkflowSelection, WsConnector,
};

/// Agent Builder - converse with a remote agent builder from the terminal
#[derive(Parser, Debug)]
#[command(name = "agent-builder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Builder workflow to converse with
    #[arg(short = 'b', long, value_name = "ID")]
    builder_id: i64,

    /// Gallery the builder belongs to
    #[arg(short = 'g', long, value_name = "ID")]
    gallery_id: i64,

    /// Knowledge base to attach to the workflow
    #[arg(short = 'k', long, value_name = "NAME")]
    knowledge_base: Option<String>,

    /// Server base URL (overrides config file and environment)
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Connect timeout for both transports, in milliseconds
    #[arg(long, value_name = "MS")]
    connect_timeout_ms: Option<u64>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "AGENT_BUILDER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Opening prompt; read from stdin when omitted
    prompt: Option<String>,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("builder_cli={level},builder_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load file and environment configuration, then apply command-line overrides
fn load_config(args: &Args) -> Result<BuilderConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = args.base_url {
        overrides = overrides.with_base_url(url.clone());
    }
    if let Some(ms) = args.connect_timeout_ms {
        overrides = overrides.with_connect_timeout_ms(ms);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line override")?;

    Ok(config)
}

fn role_label(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "you",
        TurnRole::Agent => "builder",
        TurnRole::System => "system",
    }
}

/// Render notifications until the orchestrator goes away
async fn print_messages(mut rx: mpsc::Receiver<BuilderMessage>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            BuilderMessage::TurnAppended { turn, .. } => {
                println!("[{}] {}", role_label(turn.role()), turn.content());
            }
            BuilderMessage::State { state } => {
                debug!(state = ?state, "Conversation state");
                if state == ConversationState::DuplexAcceptingInput {
                    eprint!("> ");
                }
            }
            BuilderMessage::Channel { state } => debug!(state = ?state, "Duplex channel"),
            BuilderMessage::Error {
                class,
                transport,
                message,
            } => match class {
                ErrorClass::Fatal => error!(transport = ?transport, "{message}"),
                ErrorClass::Retriable => {
                    warn!(transport = ?transport, "{message} (send the prompt again to retry)");
                }
                ErrorClass::LocalValidation => warn!("{message}"),
            },
            BuilderMessage::Notice { level, message } => match level {
                NotifyLevel::Warning => warn!("{message}"),
                NotifyLevel::Info => info!("{message}"),
            },
        }
    }
}

enum TurnOutcome {
    Settled(Result<ConversationState, BuilderError>),
    Interrupted,
}

/// Submit turns until stdin closes, the user interrupts, or the conversation fails
async fn converse<S>(
    orchestrator: &mut Orchestrator<S, WsConnector>,
    first_prompt: Option<String>,
) -> Result<()>
where
    S: StreamTransport + 'static,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = first_prompt;

    loop {
        let prompt = if let Some(prompt) = pending.take() {
            prompt
        } else {
            let line = tokio::select! {
                line = lines.next_line() => line.context("Failed to read stdin")?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    return Ok(());
                }
            };
            match line {
                Some(line) => line,
                None => {
                    info!("stdin closed");
                    return Ok(());
                }
            }
        };

        if prompt.trim().is_empty() {
            continue;
        }

        match orchestrator.submit_turn(&prompt).await {
            Ok(()) => {}
            Err(e) if e.class() == ErrorClass::Fatal => {
                return Err(e).context("Conversation cannot continue");
            }
            Err(e) => {
                warn!(error = %e, "Turn not sent");
                continue;
            }
        }

        let outcome = tokio::select! {
            result = orchestrator.wait_for_input() => TurnOutcome::Settled(result),
            _ = tokio::signal::ctrl_c() => TurnOutcome::Interrupted,
        };

        match outcome {
            TurnOutcome::Settled(Ok(state)) => debug!(state = ?state, "Ready for input"),
            TurnOutcome::Settled(Err(e)) if e.is_retriable() => {
                warn!(error = %e, "Turn failed; send it again to retry");
            }
            TurnOutcome::Settled(Err(e)) => {
                return Err(e).context("Conversation cannot continue");
            }
            TurnOutcome::Interrupted if orchestrator.state() == ConversationState::Streaming => {
                orchestrator.cancel().await;
                info!("Opening request cancelled");
            }
            TurnOutcome::Interrupted => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    let config = load_config(&args)?;
    info!(
        base_url = %config.server.base_url,
        source = %config.source(),
        "Agent builder starting"
    );

    let stream = HttpStreamDriver::new(&config.server.base_url, &config.stream)
        .context("Failed to create streaming client")?;

    let (tx, rx) = mpsc::channel(100);
    let printer = tokio::spawn(print_messages(rx));

    let mut orchestrator = Orchestrator::new(stream, WsConnector, config, tx);
    let mut selection = WorkflowSelection::new(args.builder_id, args.gallery_id);
    if let Some(kb) = args.knowledge_base {
        selection = selection.with_knowledge_base(kb);
    }
    orchestrator.select_workflow(selection);

    let result = converse(&mut orchestrator, args.prompt).await;

    orchestrator.shutdown().await;
    let stats = orchestrator.stats();
    info!(
        streams_opened = stats.streams_opened,
        reconnects = stats.reconnects,
        frames_dropped = stats.frames_dropped,
        "Agent builder stopped"
    );

    // Dropping the orchestrator closes the notification channel
    drop(orchestrator);
    if let Err(e) = printer.await {
        warn!(error = %e, "Printer task failed");
    }

    result
}
