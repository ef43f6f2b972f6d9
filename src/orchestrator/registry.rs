//! Shared session registry.
//!
//! Maps session ids to [`SessionEntry`] records behind one async mutex.
//! Every state transition happens inside a single lock acquisition, which is
//! what makes claiming a session for a send an atomic check-and-claim.
//!
//! A send owns its entry through a claim id. Later bookkeeping from that
//! send only touches the entry while it still carries the same claim, so a
//! send outliving a delete and re-create cannot overwrite the new entry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::session::SessionState;
use crate::orchestrator::termination::ProcessHandle;

/// Identifies one send's ownership of a session entry.
pub type ClaimId = u64;

/// Registry record for one session.
#[derive(Debug)]
pub struct SessionEntry {
    /// Directory the agent runs in.
    pub working_dir: PathBuf,
    /// `true` until a send completes successfully; selects start-new vs resume.
    pub is_first_message: bool,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Live process, present only while [`SessionState::Running`].
    pub process: Option<ProcessHandle>,
    /// Send currently owning the entry.
    pub claim: Option<ClaimId>,
    /// Set by an abort; no further agent may start for the current claim.
    pub abort_requested: bool,
}

impl SessionEntry {
    /// Idle entry for a newly registered session.
    #[must_use]
    pub fn new(working_dir: PathBuf, is_first_message: bool) -> Self {
        Self {
            working_dir,
            is_first_message,
            state: SessionState::Idle,
            process: None,
            claim: None,
            abort_requested: false,
        }
    }

    /// Whether the entry is owned by `claim`.
    #[must_use]
    pub fn is_claimed_by(&self, claim: ClaimId) -> bool {
        self.claim == Some(claim)
    }

    /// Return to `Idle` and drop ownership.
    pub fn release(&mut self) {
        if let Some(handle) = self.process.take() {
            handle.kill_switch.cancel();
        }
        self.state = SessionState::Idle;
        self.claim = None;
        self.abort_requested = false;
    }
}

/// Shared map type alias for the session registry.
pub type SessionRegistry = Arc<Mutex<HashMap<String, SessionEntry>>>;

/// Release `session_id` if it is still owned by `claim`.
fn release_claim(
    sessions: &mut HashMap<String, SessionEntry>,
    session_id: &str,
    claim: ClaimId,
) -> bool {
    match sessions.get_mut(session_id) {
        Some(entry) if entry.is_claimed_by(claim) => {
            entry.release();
            true
        }
        _ => false,
    }
}

/// Holds a send's claim on a session and gives it back when dropped.
///
/// [`release`](Self::release) is the normal path. If the send future is
/// dropped instead (a timeout or a losing `select!` branch) the claim is
/// released from `Drop`, in the background when the registry is contended.
#[derive(Debug)]
pub struct ClaimGuard {
    sessions: SessionRegistry,
    session_id: String,
    claim: ClaimId,
    armed: bool,
}

impl ClaimGuard {
    /// Guard `claim` on `session_id`.
    #[must_use]
    pub fn new(sessions: SessionRegistry, session_id: &str, claim: ClaimId) -> Self {
        Self {
            sessions,
            session_id: session_id.to_owned(),
            claim,
            armed: true,
        }
    }

    /// Return the session to `Idle` if this claim still owns it.
    pub async fn release(mut self) {
        self.armed = false;
        let released = release_claim(&mut *self.sessions.lock().await, &self.session_id, self.claim);
        if !released {
            debug!(session_id = %self.session_id, claim = self.claim, "claim already superseded");
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(session_id = %self.session_id, claim = self.claim, "send dropped before completion, releasing session");

        if let Ok(mut sessions) = self.sessions.try_lock() {
            release_claim(&mut sessions, &self.session_id, self.claim);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %self.session_id, "no runtime to release dropped claim");
            return;
        };
        let sessions = Arc::clone(&self.sessions);
        let session_id = std::mem::take(&mut self.session_id);
        let claim = self.claim;
        drop(runtime.spawn(async move {
            release_claim(&mut *sessions.lock().await, &session_id, claim);
        }));
    }
}
