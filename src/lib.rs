#![forbid(unsafe_code)]

//! `agent-conduit` drives one interactive agent CLI process per
//! conversation session and normalizes its streaming JSON output into a
//! stable event sequence.
//!
//! - [`orchestrator::ProcessOrchestrator`] owns the session registry and the
//!   single-flight process lifecycle.
//! - [`stream::StreamParser`] decodes the agent's line-delimited output into
//!   [`models::event::NormalizedEvent`]s.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod stream;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use models::event::NormalizedEvent;
pub use orchestrator::{ProcessOrchestrator, SendRequest};
