//! Agent command-line construction.
//!
//! Turns a [`SendRequest`] plus the session's continuation mode into the
//! argument vector and environment of one agent invocation.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::GlobalConfig;
use crate::models::session::ContinuationMode;

/// Everything a caller supplies for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendRequest {
    /// Prompt text.
    pub text: String,
    /// Attached image references, one prompt line each.
    pub images: Vec<String>,
    /// Run with unrestricted permissions.
    pub yolo_mode: bool,
    /// System-prompt override.
    pub system_prompt: Option<String>,
    /// Model override.
    pub model: Option<String>,
}

impl SendRequest {
    /// Request carrying only prompt text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Prompt text with one `[Image: <ref>]` line per attachment in front.
#[must_use]
pub fn compose_prompt(text: &str, images: &[String]) -> String {
    if images.is_empty() {
        return text.to_owned();
    }

    let mut prompt = String::new();
    for image in images {
        prompt.push_str("[Image: ");
        prompt.push_str(image);
        prompt.push_str("]\n");
    }
    prompt.push_str(text);
    prompt
}

/// Build the agent's argument vector.
///
/// Configured `agent_args` come first, followed by the prompt, the
/// streaming output selector, the session flag for `mode` and the optional
/// overrides.
#[must_use]
pub fn build_args(
    config: &GlobalConfig,
    session_id: &str,
    request: &SendRequest,
    mode: ContinuationMode,
) -> Vec<String> {
    let mut args = config.agent_args.clone();

    args.push("-p".into());
    args.push(compose_prompt(&request.text, &request.images));
    args.extend(["--output-format".into(), "stream-json".into(), "--verbose".into()]);
    if config.include_partial_messages {
        args.push("--include-partial-messages".into());
    }

    match mode {
        ContinuationMode::StartNew => args.push("--session-id".into()),
        ContinuationMode::Resume => args.push("--resume".into()),
    }
    args.push(session_id.to_owned());

    if request.yolo_mode {
        args.push("--dangerously-skip-permissions".into());
    }
    if let Some(system_prompt) = &request.system_prompt {
        args.push("--system-prompt".into());
        args.push(system_prompt.clone());
    }
    if let Some(model) = &request.model {
        args.push("--model".into());
        args.push(model.clone());
    }

    args
}

/// Build the agent command for `args`, running in `working_dir`.
///
/// The parent environment is inherited except for the nested-agent marker;
/// the account configuration directory is injected when configured. Stdout
/// and stderr are piped, stdin is closed.
#[must_use]
pub fn build_command(config: &GlobalConfig, working_dir: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(&config.agent_binary);
    cmd.args(args);

    if !config.nested_agent_env.is_empty() {
        cmd.env_remove(&config.nested_agent_env);
    }
    if let Some(dir) = &config.config_dir {
        cmd.env(&config.config_dir_env, dir);
    }

    cmd.current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd
}
