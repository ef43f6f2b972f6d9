//! Agent process termination with signal escalation.
//!
//! [`terminate`] sends the graceful signal (`SIGTERM` on unix) and arms a
//! detached escalation task that force-kills the process if it is still
//! alive when the grace period ends. The escalation task is never joined:
//! it does not hold up runtime shutdown and ends early as soon as the
//! process is observed to exit.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use crate::AppError;
use crate::Result;

/// Control handle for one live agent process.
///
/// Cloned between the registry (for [`terminate`]) and the task driving the
/// process, which cancels [`exited`](Self::exited) once the process has been
/// reaped and honours [`kill_switch`](Self::kill_switch) by killing it.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    /// OS process id, when the platform reported one.
    pub pid: Option<u32>,
    /// Cancelled by the driver once the process has exited.
    pub exited: CancellationToken,
    /// Cancelled to ask the driver to kill the process.
    pub kill_switch: CancellationToken,
}

impl ProcessHandle {
    /// Handle for a freshly spawned process.
    #[must_use]
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            exited: CancellationToken::new(),
            kill_switch: CancellationToken::new(),
        }
    }

    /// Whether the driver has observed the process exit.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }
}

/// Signal the process gracefully and arm the forceful-kill escalation.
///
/// Returns the escalation task's handle; callers normally drop it.
pub fn terminate(session_id: &str, handle: &ProcessHandle, grace: Duration) -> JoinHandle<()> {
    if handle.has_exited() {
        debug!(session_id, "terminate: process already exited");
    } else if let Err(err) = graceful_stop(handle) {
        warn!(session_id, pid = handle.pid, %err, "terminate: graceful signal failed");
    } else {
        info!(session_id, pid = handle.pid, "terminate: graceful signal sent");
    }

    spawn_escalation(session_id.to_owned(), handle.clone(), grace)
}

fn spawn_escalation(session_id: String, handle: ProcessHandle, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = handle.exited.cancelled() => {
                debug!(session_id, "escalation: process exited within grace period");
            }
            () = tokio::time::sleep(grace) => {
                warn!(
                    session_id,
                    pid = handle.pid,
                    grace_secs = grace.as_secs(),
                    "escalation: process still alive after grace period, forcing kill"
                );
                force_kill(&handle);
            }
        }
    })
}

#[cfg(unix)]
fn graceful_stop(handle: &ProcessHandle) -> Result<()> {
    use nix::sys::signal::Signal;

    match handle.pid {
        Some(pid) => send_signal(pid, Signal::SIGTERM),
        None => {
            handle.kill_switch.cancel();
            Ok(())
        }
    }
}

#[cfg(not(unix))]
fn graceful_stop(handle: &ProcessHandle) -> Result<()> {
    handle.kill_switch.cancel();
    Ok(())
}

fn force_kill(handle: &ProcessHandle) {
    #[cfg(unix)]
    if let Some(pid) = handle.pid {
        if let Err(err) = send_signal(pid, nix::sys::signal::Signal::SIGKILL) {
            warn!(pid, %err, "escalation: SIGKILL failed");
        }
    }

    handle.kill_switch.cancel();
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| AppError::Signal(format!("pid {pid} out of range")))?;
    match nix::sys::signal::kill(Pid::from_raw(raw), signal) {
        // Already gone.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(AppError::Signal(format!("{signal} to pid {pid}: {err}"))),
    }
}
