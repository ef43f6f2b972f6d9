//! Unit tests for `AppError` display format.

use agent_conduit::AppError;

#[test]
fn busy_error_display_has_prefix() {
    let err = AppError::Busy("session s1 already has a message in flight".into());
    assert_eq!(
        err.to_string(),
        "busy: session s1 already has a message in flight"
    );
}

#[test]
fn not_found_error_display_has_prefix() {
    let err = AppError::NotFound("session s1 not found".into());
    assert!(err.to_string().starts_with("not found:"));
}

#[test]
fn each_variant_has_distinct_prefix() {
    let prefixes: Vec<String> = [
        AppError::Config("x".into()),
        AppError::Spawn("x".into()),
        AppError::Protocol("x".into()),
        AppError::Busy("x".into()),
        AppError::NotFound("x".into()),
        AppError::Signal("x".into()),
        AppError::Io("x".into()),
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    let mut unique = prefixes.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), prefixes.len(), "prefixes: {prefixes:?}");
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("key = ").expect_err("invalid toml");
    let err: AppError = toml_err.into();
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Signal("SIGTERM to pid 1: EPERM".into()));
}
