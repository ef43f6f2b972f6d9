//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration for failures that are reported to the caller.
///
/// Subprocess and decode failures are not represented here: they are turned
/// into [`NormalizedEvent::Error`](crate::models::event::NormalizedEvent::Error)
/// events or exit-code return values instead.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The agent binary could not be launched.
    Spawn(String),
    /// A line of agent output could not be decoded.
    Protocol(String),
    /// The session already has an in-flight send or a live process.
    Busy(String),
    /// Requested session does not exist.
    NotFound(String),
    /// Delivering a termination signal failed.
    Signal(String),
    /// File-system failure outside the agent process.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
