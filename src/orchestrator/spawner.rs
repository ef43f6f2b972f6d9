//! Agent process spawning and output pumping.
//!
//! [`spawn_agent`] launches one agent process; [`drive`] pumps its stdout
//! through a [`StreamParser`], forwards stderr as error events and waits for
//! the exit status while honouring the handle's kill switch.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::models::event::NormalizedEvent;
use crate::orchestrator::invocation::build_command;
use crate::orchestrator::termination::ProcessHandle;
use crate::stream::{EventSink, StreamParser};
use crate::{AppError, Result};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long stderr may stay open after the agent has been reaped. A
/// grandchild that inherited the pipe would otherwise hold the send open.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A launched agent process with its output pipes detached.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child process handle (`kill_on_drop(true)`).
    pub child: Child,
    /// Agent stdout: the structured event stream.
    pub stdout: ChildStdout,
    /// Agent stderr: free-text diagnostics.
    pub stderr: ChildStderr,
}

impl AgentProcess {
    /// OS process id, if still known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Everything observed from one finished process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code; `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// Raw stdout, lossily decoded.
    pub stdout: String,
    /// Raw stderr, lossily decoded.
    pub stderr: String,
}

impl RunOutput {
    /// Whether `needle` appears anywhere in stdout or stderr.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }
}

/// Launch the agent binary with `args` in `working_dir`.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the binary cannot be launched or its output
/// pipes cannot be captured.
pub fn spawn_agent(config: &GlobalConfig, working_dir: &Path, args: &[String]) -> Result<AgentProcess> {
    let mut child = build_command(config, working_dir, args).spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn {}: {err}", config.agent_binary))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

    info!(
        pid = child.id().unwrap_or(0),
        agent = config.agent_binary,
        working_dir = %working_dir.display(),
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdout,
        stderr,
    })
}

/// Run `process` to completion.
///
/// Stdout chunks are fed to `parser` as they arrive and the parser is
/// flushed at EOF. Every stderr chunk is sent to `sink` as an
/// [`NormalizedEvent::Error`]. Cancelling `handle.kill_switch` kills the
/// process; `handle.exited` is cancelled once it has been reaped.
pub async fn drive(
    process: AgentProcess,
    mut parser: StreamParser,
    sink: EventSink,
    handle: &ProcessHandle,
) -> RunOutput {
    let AgentProcess {
        mut child,
        mut stdout,
        stderr,
    } = process;

    let stderr_stop = CancellationToken::new();
    let mut stderr_task = tokio::spawn(forward_stderr(stderr, sink, stderr_stop.clone()));

    let mut raw_stdout = Vec::new();
    let mut buf = vec![0_u8; READ_CHUNK_BYTES];
    let mut kill_requested = false;

    loop {
        tokio::select! {
            () = handle.kill_switch.cancelled(), if !kill_requested => {
                kill_requested = true;
                kill_child(&mut child);
            }
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    raw_stdout.extend_from_slice(&buf[..n]);
                    parser.feed(&buf[..n]);
                }
                Err(err) => {
                    warn!(%err, "agent stdout read failed, stopping");
                    break;
                }
            },
        }
    }
    parser.flush();
    if parser.skipped_lines() > 0 {
        debug!(skipped = parser.skipped_lines(), "agent output contained undecodable lines");
    }

    let status = loop {
        tokio::select! {
            () = handle.kill_switch.cancelled(), if !kill_requested => {
                kill_requested = true;
                kill_child(&mut child);
            }
            status = child.wait() => break status,
        }
    };
    handle.exited.cancel();

    let exit_code = match status {
        Ok(status) => {
            let code = status.code();
            info!(exit_code = code, "agent process exited");
            code
        }
        Err(err) => {
            warn!(%err, "error waiting for agent process");
            None
        }
    };

    let joined = match tokio::time::timeout(STDERR_DRAIN_GRACE, &mut stderr_task).await {
        Ok(joined) => joined,
        Err(_) => {
            debug!("agent stderr still open after exit, stopping forwarder");
            stderr_stop.cancel();
            stderr_task.await
        }
    };
    let stderr = match joined {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            warn!(%err, "stderr forwarder panicked");
            String::new()
        }
    };

    RunOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&raw_stdout).into_owned(),
        stderr,
    }
}

fn kill_child(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "agent kill request failed");
    }
}

/// Forward stderr chunks verbatim as error events until EOF or `stop`;
/// returns the raw bytes.
async fn forward_stderr<R>(mut stderr: R, sink: EventSink, stop: CancellationToken) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut buf = vec![0_u8; READ_CHUNK_BYTES];

    loop {
        let read = tokio::select! {
            () = stop.cancelled() => break,
            read = stderr.read(&mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if sink.send(NormalizedEvent::error(text)).is_err() {
                    debug!("event sink closed, still draining agent stderr");
                }
            }
            Err(err) => {
                warn!(%err, "agent stderr read failed");
                break;
            }
        }
    }

    collected
}
