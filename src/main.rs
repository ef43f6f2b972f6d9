#![forbid(unsafe_code)]

//! `agent-conduit` — send one message to an agent session from the shell.
//!
//! Registers a session, runs the agent once and prints every normalized
//! event as a JSON line on stdout. Logs go to stderr. Ctrl-C aborts the
//! running agent.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conduit::config::GlobalConfig;
use agent_conduit::models::event::NormalizedEvent;
use agent_conduit::{AppError, ProcessOrchestrator, Result, SendRequest};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conduit", about = "Drive an agent CLI session and stream normalized events", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory for the agent (defaults to the current directory).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Session identifier (a new UUID when omitted).
    #[arg(long)]
    session: Option<String>,

    /// Continue an existing agent session instead of starting one.
    #[arg(long)]
    resume: bool,

    /// Run the agent with unrestricted permissions.
    #[arg(long)]
    yolo: bool,

    /// Model override.
    #[arg(long)]
    model: Option<String>,

    /// System-prompt override.
    #[arg(long)]
    system_prompt: Option<String>,

    /// Image reference to attach; repeatable.
    #[arg(long = "image")]
    images: Vec<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Message to send.
    prompt: String,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<ExitCode> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    let workspace = match args.workspace {
        Some(ws) => ws,
        None => std::env::current_dir()
            .map_err(|err| AppError::Config(format!("cannot resolve current directory: {err}")))?,
    };
    let workspace = workspace
        .canonicalize()
        .map_err(|err| AppError::Config(format!("invalid workspace: {err}")))?;

    let session_id = args
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let orchestrator = ProcessOrchestrator::new(Arc::new(config));
    orchestrator
        .create_session_with(&session_id, workspace, !args.resume)
        .await?;
    info!(session_id, "session ready");

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(event_rx));

    let request = SendRequest {
        text: args.prompt,
        images: args.images,
        yolo_mode: args.yolo,
        system_prompt: args.system_prompt,
        model: args.model,
    };

    let send = orchestrator.send_message(&session_id, request, event_tx);
    tokio::pin!(send);

    let exit_code = tokio::select! {
        result = &mut send => result?,
        () = shutdown_signal() => {
            info!(session_id, "interrupt received, aborting agent");
            orchestrator.abort(&session_id).await;
            send.await?
        }
    };

    if let Err(err) = printer.await {
        warn!(%err, "event printer task failed");
    }

    info!(session_id, exit_code, "agent run finished");
    Ok(exit_code
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from))
}

/// Print each event as one JSON line until the sender side closes.
async fn print_events(mut event_rx: mpsc::UnboundedReceiver<NormalizedEvent>) {
    let stdout = std::io::stdout();
    while let Some(event) = event_rx.recv().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                error!(%err, "failed to serialize event");
                continue;
            }
        };
        let mut out = stdout.lock();
        if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            error!(%err, "failed to write event to stdout");
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
