use std::{collections::HashMap, time::Duration};

use lotus::{
    config::{DisplayPolicy, ShellConfig, DEFAULT_WORKER_STACK_SIZE},
    LotusError,
};

fn with_vars(vars: &[(&str, &str)]) -> Result<ShellConfig, LotusError> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    ShellConfig::default().with_overrides_from(|key| vars.get(key).cloned())
}

#[test]
fn defaults_wait_forever_and_prefer_output() {
    let config = ShellConfig::default();
    assert_eq!(config.timeout_ms, None);
    assert_eq!(config.default_timeout(), None);
    assert_eq!(config.display, DisplayPolicy::PreferOutput);
    assert_eq!(config.worker_stack_size, DEFAULT_WORKER_STACK_SIZE);
}

#[test]
fn toml_fields_override_defaults() {
    let config = ShellConfig::from_toml_str("timeout_ms = 1500\ndisplay = \"always_echo\"\n")
        .expect("valid config");
    assert_eq!(config.default_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(config.display, DisplayPolicy::AlwaysEcho);
    assert_eq!(config.max_call_depth, ShellConfig::default().max_call_depth);
}

#[test]
fn unknown_toml_fields_are_config_errors() {
    let err = ShellConfig::from_toml_str("timeout = 5\n").expect_err("unknown field rejected");
    assert!(matches!(err, LotusError::Config(_)));
}

#[test]
fn missing_config_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = ShellConfig::load(dir.path().join("absent.toml")).expect_err("missing file");
    assert!(matches!(err, LotusError::Config(_)));
}

#[test]
fn environment_overrides_apply() {
    let config = with_vars(&[
        ("LOTUS_TIMEOUT_MS", "250"),
        ("LOTUS_DISPLAY", "always-echo"),
        ("LOTUS_MAX_CALL_DEPTH", " 64 "),
    ])
    .expect("valid overrides");
    assert_eq!(config.default_timeout(), Some(Duration::from_millis(250)));
    assert_eq!(config.display, DisplayPolicy::AlwaysEcho);
    assert_eq!(config.max_call_depth, 64);
}

#[test]
fn absent_variables_leave_the_config_alone() {
    assert_eq!(with_vars(&[]).expect("no overrides"), ShellConfig::default());
}

#[test]
fn malformed_timeout_is_a_config_error() {
    let err = with_vars(&[("LOTUS_TIMEOUT_MS", "soon")]).expect_err("rejected");
    assert!(matches!(err, LotusError::Config(ref message) if message.contains("LOTUS_TIMEOUT_MS")));
    let err = with_vars(&[("LOTUS_TIMEOUT_MS", "-5")]).expect_err("rejected");
    assert!(matches!(err, LotusError::Config(_)));
}

#[test]
fn display_policy_parses_both_spellings() {
    assert_eq!("always_echo".parse::<DisplayPolicy>().ok(), Some(DisplayPolicy::AlwaysEcho));
    assert_eq!("Always-Echo".parse::<DisplayPolicy>().ok(), Some(DisplayPolicy::AlwaysEcho));
    assert_eq!("prefer-output".parse::<DisplayPolicy>().ok(), Some(DisplayPolicy::PreferOutput));
    let err = "loud".parse::<DisplayPolicy>().expect_err("unknown policy");
    assert!(matches!(err, LotusError::Config(_)));
}
