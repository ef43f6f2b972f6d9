//! Per-session agent process orchestration.
//!
//! [`ProcessOrchestrator`] owns the session registry and runs at most one
//! agent process per session:
//!
//! 1. [`send_message`](ProcessOrchestrator::send_message) atomically claims
//!    an idle session (`Idle → Spawning`), or fails with `AppError::Busy`.
//! 2. The agent is spawned in the session's working directory and attached
//!    (`Spawning → Running`); its stdout streams through a fresh
//!    [`StreamParser`] into the caller's sink.
//! 3. When the process exits the send resolves with its exit code and the
//!    session returns to `Idle`.
//!
//! [`abort`](ProcessOrchestrator::abort) detaches the process immediately
//! (`Running → Aborting`) and hands it to
//! [`termination::terminate`](crate::orchestrator::termination::terminate).
//!
//! A resume attempt that fails because the agent no longer knows the session
//! is retried once as a fresh session with the same id.
//!
//! Each send holds its claim in a [`ClaimGuard`]; registry updates made on
//! its behalf apply only while the entry still carries that claim, and the
//! claim is released even if the send future is dropped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::event::NormalizedEvent;
use crate::models::session::{ContinuationMode, SessionState};
use crate::orchestrator::invocation::{build_args, SendRequest};
use crate::orchestrator::registry::{ClaimGuard, ClaimId, SessionEntry, SessionRegistry};
use crate::orchestrator::spawner::{self, RunOutput};
use crate::orchestrator::termination::{self, ProcessHandle};
use crate::stream::{EventSink, StreamParser};
use crate::{AppError, Result};

/// Result of one spawn-and-run attempt.
#[derive(Debug)]
struct Attempt {
    mode: ContinuationMode,
    /// `None` when the process never started.
    output: Option<RunOutput>,
}

/// What a successful claim hands to the send.
#[derive(Debug)]
struct Claim {
    id: ClaimId,
    working_dir: PathBuf,
    is_first_message: bool,
}

/// Session registry plus single-flight agent process lifecycle.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct ProcessOrchestrator {
    config: Arc<GlobalConfig>,
    sessions: SessionRegistry,
    next_claim: Arc<AtomicU64>,
}

impl ProcessOrchestrator {
    /// Create an orchestrator with an empty registry.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            config,
            sessions: SessionRegistry::default(),
            next_claim: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a session whose first send starts a new agent session.
    ///
    /// See [`create_session_with`](Self::create_session_with).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `working_dir` is not absolute.
    pub async fn create_session(
        &self,
        session_id: &str,
        working_dir: impl Into<PathBuf>,
    ) -> Result<bool> {
        self.create_session_with(session_id, working_dir, true).await
    }

    /// Register a session if it is not registered yet.
    ///
    /// Idempotent: an existing entry keeps its flag, state and process.
    /// Returns `true` when a new entry was created.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `working_dir` is not absolute.
    pub async fn create_session_with(
        &self,
        session_id: &str,
        working_dir: impl Into<PathBuf>,
        is_first_message: bool,
    ) -> Result<bool> {
        let working_dir = working_dir.into();
        if !working_dir.is_absolute() {
            return Err(AppError::Config(format!(
                "working directory must be absolute: {}",
                working_dir.display()
            )));
        }

        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session_id) {
            debug!(session_id, "session already registered");
            return Ok(false);
        }

        sessions.insert(
            session_id.to_owned(),
            SessionEntry::new(working_dir, is_first_message),
        );
        info!(session_id, is_first_message, "session registered");
        Ok(true)
    }

    /// Whether the session currently has a live agent process.
    pub async fn is_session_busy(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .is_some_and(|entry| entry.state.is_busy())
    }

    /// Ids of all sessions with a live agent process, sorted.
    pub async fn get_busy_sessions(&self) -> Vec<String> {
        let mut busy: Vec<String> = self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| entry.state.is_busy())
            .map(|(id, _)| id.clone())
            .collect();
        busy.sort();
        busy
    }

    /// Current lifecycle state, or `None` for an unknown session.
    pub async fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.lock().await.get(session_id).map(|entry| entry.state)
    }

    /// Whether the next send starts a new agent session, or `None` for an
    /// unknown session.
    pub async fn is_first_message(&self, session_id: &str) -> Option<bool> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|entry| entry.is_first_message)
    }

    /// Send one message to the session's agent and stream its events.
    ///
    /// Events are delivered to `on_event` while the process runs; the
    /// returned future resolves once it has exited. Resolves with the exit
    /// code, or `None` if the process could not be started (reported as a
    /// single error event) or was ended by a signal.
    ///
    /// Dropping the future before it resolves kills the agent and returns
    /// the session to `Idle`.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session is not registered.
    /// - `AppError::Busy` if another send is in flight for the session.
    ///
    /// No process is spawned in either case.
    pub async fn send_message(
        &self,
        session_id: &str,
        request: SendRequest,
        on_event: EventSink,
    ) -> Result<Option<i32>> {
        let claim = self.claim(session_id).await?;
        let guard = ClaimGuard::new(Arc::clone(&self.sessions), session_id, claim.id);

        let span = info_span!("send_message", session_id, claim = claim.id);
        let exit_code = self
            .run_with_retry(session_id, &claim, &request, &on_event)
            .instrument(span)
            .await;

        guard.release().await;
        Ok(exit_code)
    }

    /// Stop the session's live process, if any.
    ///
    /// The session stops counting as busy immediately; the process gets the
    /// graceful signal now and the forceful one after the configured grace
    /// period unless it exits first. A send that is between processes (still
    /// spawning, or about to retry) is told not to start another one.
    ///
    /// Returns `true` if the abort took effect; aborting an idle or
    /// already-aborted session is a no-op.
    pub async fn abort(&self, session_id: &str) -> bool {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            let Some(entry) = sessions.get_mut(session_id) else {
                return false;
            };
            match entry.state {
                SessionState::Running => {
                    entry.state = SessionState::Aborting;
                    entry.abort_requested = true;
                    entry.process.take()
                }
                SessionState::Spawning if !entry.abort_requested => {
                    entry.abort_requested = true;
                    info!(session_id, "abort requested while no agent is attached");
                    return true;
                }
                _ => return false,
            }
        };

        let Some(handle) = handle else {
            return false;
        };

        info!(session_id, pid = handle.pid, "aborting agent process");
        drop(termination::terminate(
            session_id,
            &handle,
            self.config.kill_grace(),
        ));
        true
    }

    /// Abort any live process and remove the session.
    ///
    /// Returns `true` if the session existed.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        self.abort(session_id).await;
        let removed = self.sessions.lock().await.remove(session_id).is_some();
        if removed {
            info!(session_id, "session deleted");
        }
        removed
    }

    // ── Send internals ────────────────────────────────────────────────────

    /// Atomically move an idle session to `Spawning` under a new claim.
    async fn claim(&self, session_id: &str) -> Result<Claim> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        if entry.claim.is_some() || entry.state.is_claimed() || entry.process.is_some() {
            return Err(AppError::Busy(format!(
                "session {session_id} already has a message in flight"
            )));
        }

        let id = self.next_claim.fetch_add(1, Ordering::Relaxed);
        entry.claim = Some(id);
        entry.state = SessionState::Spawning;
        entry.abort_requested = false;
        Ok(Claim {
            id,
            working_dir: entry.working_dir.clone(),
            is_first_message: entry.is_first_message,
        })
    }

    async fn run_with_retry(
        &self,
        session_id: &str,
        claim: &Claim,
        request: &SendRequest,
        on_event: &EventSink,
    ) -> Option<i32> {
        let first_mode = ContinuationMode::for_first_message(claim.is_first_message);
        let attempt = self
            .run_attempt(session_id, claim, request, first_mode, on_event)
            .await;

        let attempt = if self.should_retry(&attempt) && self.begin_retry(session_id, claim.id).await {
            warn!(session_id, "agent does not know the session, retrying as a new session");
            self.run_attempt(
                session_id,
                claim,
                request,
                ContinuationMode::StartNew,
                on_event,
            )
            .await
        } else {
            attempt
        };

        let exit_code = attempt.output.and_then(|output| output.exit_code);
        if exit_code == Some(0) {
            self.set_first_message(session_id, claim.id, false).await;
        }
        exit_code
    }

    fn should_retry(&self, attempt: &Attempt) -> bool {
        let Some(output) = &attempt.output else {
            return false;
        };
        attempt.mode == ContinuationMode::Resume
            && output.exit_code != Some(0)
            && output.contains(&self.config.resume_missing_sentinel)
    }

    async fn run_attempt(
        &self,
        session_id: &str,
        claim: &Claim,
        request: &SendRequest,
        mode: ContinuationMode,
        on_event: &EventSink,
    ) -> Attempt {
        let args = build_args(&self.config, session_id, request, mode);
        debug!(session_id, ?mode, "launching agent");

        let process = match spawner::spawn_agent(&self.config, &claim.working_dir, &args) {
            Ok(process) => process,
            Err(err) => {
                warn!(session_id, %err, "agent failed to start");
                if on_event.send(NormalizedEvent::error(err.to_string())).is_err() {
                    debug!(session_id, "event sink closed before spawn error delivery");
                }
                return Attempt { mode, output: None };
            }
        };

        let handle = ProcessHandle::new(process.pid());
        self.attach(session_id, claim.id, &handle).await;

        let parser = StreamParser::new(on_event.clone());
        let output = spawner::drive(process, parser, on_event.clone(), &handle).await;

        self.detach(session_id, claim.id).await;
        Attempt {
            mode,
            output: Some(output),
        }
    }

    /// Record the live process, or stop it straight away if the claim was
    /// aborted or lost while it was starting.
    async fn attach(&self, session_id: &str, claim: ClaimId, handle: &ProcessHandle) {
        let attached = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(session_id) {
                Some(entry) if entry.is_claimed_by(claim) => {
                    if entry.abort_requested {
                        entry.state = SessionState::Aborting;
                        false
                    } else {
                        entry.state = SessionState::Running;
                        entry.process = Some(handle.clone());
                        true
                    }
                }
                _ => false,
            }
        };

        if !attached {
            warn!(session_id, "session aborted or removed while spawning, stopping agent");
            drop(termination::terminate(session_id, handle, self.config.kill_grace()));
        }
    }

    /// Detach the exited process.
    async fn detach(&self, session_id: &str, claim: ClaimId) {
        if let Some(entry) = self.sessions.lock().await.get_mut(session_id) {
            if entry.is_claimed_by(claim) {
                entry.state = SessionState::Spawning;
                entry.process = None;
            }
        }
    }

    /// Mark the session as new again unless the claim was aborted or lost.
    async fn begin_retry(&self, session_id: &str, claim: ClaimId) -> bool {
        match self.sessions.lock().await.get_mut(session_id) {
            Some(entry) if entry.is_claimed_by(claim) && !entry.abort_requested => {
                entry.is_first_message = true;
                true
            }
            _ => {
                debug!(session_id, "resume retry skipped, send was aborted");
                false
            }
        }
    }

    async fn set_first_message(&self, session_id: &str, claim: ClaimId, value: bool) {
        if let Some(entry) = self.sessions.lock().await.get_mut(session_id) {
            if entry.is_claimed_by(claim) {
                entry.is_first_message = value;
            }
        }
    }
}
