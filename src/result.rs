use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::diagnostics::{Frame, Result};

const PREVIEW_CHARS: usize = 200;

/// What one `execute` call produced, together with the captured streams.
#[derive(Debug, Clone, Serialize)]
pub struct ShellResult {
    pub code: String,
    pub stdout: String,
    pub stderr: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Expression {
        value_type: String,
        value_repr: String,
    },
    Statement,
    Error(ErrorInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub error_kind: String,
    pub error_message: String,
    /// Submitted-code frames, outermost first.
    pub frames: Vec<Frame>,
}

impl ShellResult {
    pub fn new(code: impl Into<String>, stdout: String, stderr: String, outcome: Outcome) -> Self {
        let result = Self {
            code: code.into(),
            stdout,
            stderr,
            timestamp: Utc::now(),
            outcome,
        };
        debug!(
            kind = result.kind(),
            stdout = %preview(&result.stdout),
            stderr = %preview(&result.stderr),
            "built result"
        );
        result
    }

    pub fn expression(
        code: impl Into<String>,
        stdout: String,
        stderr: String,
        value_type: impl Into<String>,
        value_repr: impl Into<String>,
    ) -> Self {
        Self::new(
            code,
            stdout,
            stderr,
            Outcome::Expression {
                value_type: value_type.into(),
                value_repr: value_repr.into(),
            },
        )
    }

    pub fn statement(code: impl Into<String>, stdout: String, stderr: String) -> Self {
        Self::new(code, stdout, stderr, Outcome::Statement)
    }

    pub fn failure(code: impl Into<String>, stdout: String, stderr: String, info: ErrorInfo) -> Self {
        Self::new(code, stdout, stderr, Outcome::Error(info))
    }

    pub fn kind(&self) -> &'static str {
        match self.outcome {
            Outcome::Expression { .. } => "expression",
            Outcome::Statement => "statement",
            Outcome::Error(_) => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn value_repr(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Expression { value_repr, .. } => Some(value_repr),
            _ => None,
        }
    }

    pub fn value_type(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Expression { value_type, .. } => Some(value_type),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match &self.outcome {
            Outcome::Error(info) => Some(info),
            _ => None,
        }
    }

    /// Text for a human caller: captured stdout, then the value, `OK`, or
    /// the fault and its traceback.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.outcome {
            Outcome::Expression { value_repr, .. } => {
                out.push_str(&self.stdout);
                if !value_repr.is_empty() {
                    out.push_str(value_repr);
                }
            }
            Outcome::Statement => {
                if self.stdout.is_empty() {
                    out.push_str("OK");
                } else {
                    out.push_str(&self.stdout);
                }
            }
            Outcome::Error(info) => {
                out.push_str(&self.stdout);
                let _ = write!(out, "{}: {}", info.error_kind, info.error_message);
                if !info.frames.is_empty() {
                    out.push_str("\n\nTraceback:");
                    for frame in &info.frames {
                        let _ = write!(
                            out,
                            "\n  File \"{}\", line {}, in {}",
                            frame.file, frame.line, frame.function
                        );
                        if !frame.source.is_empty() {
                            let _ = write!(out, "\n    {}", frame.source);
                        }
                    }
                }
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Shortens `text` to a log-friendly prefix.
pub fn preview(text: &str) -> String {
    truncate(text, PREVIEW_CHARS)
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
