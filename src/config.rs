use std::{path::Path, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::{
    diagnostics::{LotusError, Result},
    runtime::DEFAULT_MAX_CALL_DEPTH,
};

pub const DEFAULT_WORKER_STACK_SIZE: usize = 32 * 1024 * 1024;

/// How a trailing expression's value is reported when the same call also
/// printed something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPolicy {
    /// Suppress the value when stdout is non-empty.
    #[default]
    PreferOutput,
    AlwaysEcho,
}

impl FromStr for DisplayPolicy {
    type Err = LotusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "prefer_output" => Ok(DisplayPolicy::PreferOutput),
            "always_echo" => Ok(DisplayPolicy::AlwaysEcho),
            other => Err(LotusError::Config(format!(
                "unknown display policy `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    /// Applied when a call passes no timeout of its own; `None` waits forever.
    pub timeout_ms: Option<u64>,
    pub display: DisplayPolicy,
    pub max_call_depth: usize,
    pub worker_stack_size: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            display: DisplayPolicy::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            worker_stack_size: DEFAULT_WORKER_STACK_SIZE,
        }
    }
}

impl ShellConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            LotusError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies `LOTUS_TIMEOUT_MS`, `LOTUS_DISPLAY` and `LOTUS_MAX_CALL_DEPTH`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("LOTUS_TIMEOUT_MS") {
            self.timeout_ms = Some(parse_number("LOTUS_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("LOTUS_DISPLAY") {
            self.display = raw.parse()?;
        }
        if let Some(raw) = lookup("LOTUS_MAX_CALL_DEPTH") {
            self.max_call_depth = parse_number("LOTUS_MAX_CALL_DEPTH", &raw)?;
        }
        Ok(self)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| LotusError::Config(format!("{key} must be a non-negative integer, got `{raw}`")))
}
