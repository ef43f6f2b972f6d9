//! Session state model.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered session.
///
/// Only [`Idle`](Self::Idle) accepts a new send. The send operation owns the
/// session from [`Spawning`](Self::Spawning) until its process has exited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No send in flight.
    Idle,
    /// A send claimed the session and is building or launching the process.
    Spawning,
    /// A live agent process is attached.
    Running,
    /// The process was signalled; waiting for the send to observe its exit.
    Aborting,
}

impl SessionState {
    /// Whether a live process handle is attached.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether a send operation currently owns the session.
    #[must_use]
    pub fn is_claimed(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// How the agent should treat the session identifier on this invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationMode {
    /// Start a fresh agent session with the given identifier.
    StartNew,
    /// Continue an existing agent session.
    Resume,
}

impl ContinuationMode {
    /// Mode implied by a session's first-message flag.
    #[must_use]
    pub fn for_first_message(is_first_message: bool) -> Self {
        if is_first_message {
            Self::StartNew
        } else {
            Self::Resume
        }
    }
}
