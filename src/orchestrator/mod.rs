//! Session orchestration modules.
//!
//! Covers agent command construction, process spawning and output pumping,
//! the shared session registry, the single-flight send lifecycle and
//! termination with signal escalation.

pub mod invocation;
pub mod registry;
pub mod session_manager;
pub mod spawner;
pub mod termination;

pub use invocation::SendRequest;
pub use session_manager::ProcessOrchestrator;
