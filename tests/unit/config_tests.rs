use std::path::PathBuf;
use std::time::Duration;

use agent_conduit::{config::GlobalConfig, AppError};

fn sample_toml(config_dir: &str) -> String {
    format!(
        r#"
agent_binary = "/usr/local/bin/claude"
agent_args = ["--add-dir", "/shared"]
config_dir = '{config_dir}'
config_dir_env = "CLAUDE_CONFIG_DIR"
nested_agent_env = "CLAUDECODE"
resume_missing_sentinel = "No conversation found"
kill_grace_seconds = 10
include_partial_messages = false
"#
    )
}

#[test]
fn parses_valid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().to_str().expect("utf8 path");

    let config = GlobalConfig::from_toml_str(&sample_toml(dir)).expect("config parses");

    assert_eq!(config.agent_binary, "/usr/local/bin/claude");
    assert_eq!(config.agent_args, vec!["--add-dir", "/shared"]);
    assert_eq!(config.config_dir, Some(PathBuf::from(dir)));
    assert_eq!(config.resume_missing_sentinel, "No conversation found");
    assert_eq!(config.kill_grace(), Duration::from_secs(10));
    assert!(!config.include_partial_messages);
}

#[test]
fn empty_document_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config parses");

    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.agent_binary, "claude");
    assert!(config.agent_args.is_empty());
    assert_eq!(config.config_dir, None);
    assert_eq!(config.config_dir_env, "CLAUDE_CONFIG_DIR");
    assert_eq!(config.nested_agent_env, "CLAUDECODE");
    assert_eq!(
        config.resume_missing_sentinel,
        "No conversation found with session ID"
    );
    assert_eq!(config.kill_grace(), Duration::from_secs(5));
    assert!(config.include_partial_messages);
}

#[test]
fn rejects_zero_grace_period() {
    let result = GlobalConfig::from_toml_str("kill_grace_seconds = 0");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("kill_grace_seconds")));
}

#[test]
fn rejects_blank_agent_binary() {
    let result = GlobalConfig::from_toml_str("agent_binary = \"  \"");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("agent_binary")));
}

#[test]
fn rejects_empty_sentinel() {
    let result = GlobalConfig::from_toml_str("resume_missing_sentinel = \"\"");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("resume_missing_sentinel")));
}

#[test]
fn rejects_config_dir_without_env_name() {
    let result = GlobalConfig::from_toml_str("config_dir = '/tmp/acct'\nconfig_dir_env = ''");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("config_dir_env")));
}

#[test]
fn rejects_unknown_keys() {
    let result = GlobalConfig::from_toml_str("agent_bin = \"claude\"");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.starts_with("invalid config")));
}

#[test]
fn rejects_invalid_toml() {
    let result = GlobalConfig::from_toml_str("agent_binary = ");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "agent_binary = \"agent\"\nkill_grace_seconds = 2\n").expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("config loads");

    assert_eq!(config.agent_binary, "agent");
    assert_eq!(config.kill_grace_seconds, 2);
}

#[test]
fn load_from_missing_path_is_io_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = GlobalConfig::load_from_path(temp.path().join("missing.toml"));
    assert!(matches!(result, Err(AppError::Io(msg)) if msg.contains("missing.toml")));
}

#[test]
fn load_from_path_reports_invalid_contents_as_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "kill_grace_seconds = 0\n").expect("write config");

    let result = GlobalConfig::load_from_path(&path);
    assert!(matches!(result, Err(AppError::Config(_))));
}
