//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_agent_binary() -> String {
    "claude".into()
}

fn default_config_dir_env() -> String {
    "CLAUDE_CONFIG_DIR".into()
}

fn default_nested_agent_env() -> String {
    "CLAUDECODE".into()
}

fn default_resume_missing_sentinel() -> String {
    "No conversation found with session ID".into()
}

fn default_kill_grace_seconds() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// Global configuration parsed from `config.toml`.
///
/// Every key has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GlobalConfig {
    /// Agent binary to launch (looked up on `PATH` when not absolute).
    #[serde(default = "default_agent_binary")]
    pub agent_binary: String,
    /// Extra arguments placed before the generated ones.
    #[serde(default)]
    pub agent_args: Vec<String>,
    /// Account-scoped configuration directory handed to the agent.
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
    /// Environment variable that carries [`config_dir`](Self::config_dir).
    #[serde(default = "default_config_dir_env")]
    pub config_dir_env: String,
    /// "Already inside an agent" marker removed from the child environment.
    #[serde(default = "default_nested_agent_env")]
    pub nested_agent_env: String,
    /// Output text that identifies a resume of an unknown session.
    #[serde(default = "default_resume_missing_sentinel")]
    pub resume_missing_sentinel: String,
    /// Seconds between the graceful and the forceful termination signal.
    #[serde(default = "default_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
    /// Request partial-message stream events so text arrives incrementally.
    #[serde(default = "default_true")]
    pub include_partial_messages: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            agent_binary: default_agent_binary(),
            agent_args: Vec::new(),
            config_dir: None,
            config_dir_env: default_config_dir_env(),
            nested_agent_env: default_nested_agent_env(),
            resume_missing_sentinel: default_resume_missing_sentinel(),
            kill_grace_seconds: default_kill_grace_seconds(),
            include_partial_messages: true,
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read, or
    /// `AppError::Config` if it contains invalid TOML or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Io(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Grace period before a terminated agent is force-killed.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.agent_binary.trim().is_empty() {
            return Err(AppError::Config("agent_binary must not be empty".into()));
        }

        if self.resume_missing_sentinel.is_empty() {
            return Err(AppError::Config(
                "resume_missing_sentinel must not be empty".into(),
            ));
        }

        if self.kill_grace_seconds == 0 {
            return Err(AppError::Config(
                "kill_grace_seconds must be greater than zero".into(),
            ));
        }

        if self.config_dir.is_some() && self.config_dir_env.trim().is_empty() {
            return Err(AppError::Config(
                "config_dir_env must be set when config_dir is configured".into(),
            ));
        }

        Ok(())
    }
}
