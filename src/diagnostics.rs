use std::{fmt, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Represents a byte span within a submitted source text, plus the
/// 1-based line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize, line: usize) -> Self {
        Self { start, end, line }
    }

    /// Span covering `self` through `other`, keeping the starting line.
    pub const fn to(self, other: SourceSpan) -> Self {
        Self {
            start: self.start,
            end: other.end,
            line: self.line,
        }
    }
}

/// The kind of fault raised by script code. The names reported to callers
/// follow the familiar Python exception names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Syntax,
    Name,
    Type,
    Value,
    ZeroDivision,
    Index,
    Key,
    Attribute,
    Import,
    ModuleNotFound,
    Recursion,
    Overflow,
    Assertion,
    Os,
    Timeout,
}

impl FaultKind {
    pub fn name(self) -> &'static str {
        match self {
            FaultKind::Syntax => "SyntaxError",
            FaultKind::Name => "NameError",
            FaultKind::Type => "TypeError",
            FaultKind::Value => "ValueError",
            FaultKind::ZeroDivision => "ZeroDivisionError",
            FaultKind::Index => "IndexError",
            FaultKind::Key => "KeyError",
            FaultKind::Attribute => "AttributeError",
            FaultKind::Import => "ImportError",
            FaultKind::ModuleNotFound => "ModuleNotFoundError",
            FaultKind::Recursion => "RecursionError",
            FaultKind::Overflow => "OverflowError",
            FaultKind::Assertion => "AssertionError",
            FaultKind::Os => "OSError",
            FaultKind::Timeout => "TimeoutError",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub file: String,
    pub line: usize,
    pub function: String,
    pub source: String,
}

/// Prefix shared by the file names of every submitted source text.
pub const SUBMITTED_FILE_PREFIX: &str = "<";

impl Frame {
    pub fn new(
        file: impl Into<String>,
        line: usize,
        function: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
            source: source.into(),
        }
    }

    /// A frame describing a location inside the engine itself.
    pub fn harness(file: &'static str, line: u32, function: &'static str) -> Self {
        Self::new(file, line as usize, function, "")
    }

    pub fn is_submitted(&self) -> bool {
        self.file.starts_with(SUBMITTED_FILE_PREFIX)
    }
}

/// A named source text that submitted code was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    pub name: String,
    pub text: String,
}

impl SourceText {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// The trimmed text of 1-based `line`, or an empty string.
    pub fn line_text(&self, line: usize) -> &str {
        line.checked_sub(1)
            .and_then(|idx| self.text.lines().nth(idx))
            .map(str::trim)
            .unwrap_or("")
    }

    pub fn frame(&self, line: usize, function: impl Into<String>) -> Frame {
        Frame::new(self.name.clone(), line, function, self.line_text(line))
    }
}

/// Builds a harness [`Frame`] for the current engine source location.
#[macro_export]
macro_rules! harness_frame {
    ($function:expr) => {
        $crate::diagnostics::Frame::harness(file!(), line!(), $function)
    };
}

/// A fault raised while lexing, parsing or running script code.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: FaultKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub notes: Vec<String>,
    /// Traceback, outermost frame first.
    pub frames: Vec<Frame>,
}

impl Diagnostic {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            notes: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Records a frame while the fault unwinds; callers add frames from the
    /// innermost outwards so each new frame goes in front.
    pub fn push_frame(mut self, frame: Frame) -> Self {
        self.frames.insert(0, frame);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(span) = self.span {
            write!(f, " (line {})", span.line)?;
        }
        if !self.notes.is_empty() {
            writeln!(f)?;
            for note in &self.notes {
                writeln!(f, "  note: {note}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the Lotus engine.
#[derive(Debug, Error)]
pub enum LotusError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session worker is no longer running")]
    WorkerUnavailable,
    #[error("absolute export paths are not allowed: {}", .0.display())]
    AbsoluteExportPath(PathBuf),
}

impl LotusError {
    pub fn push_frame(self, frame: Frame) -> Self {
        match self {
            LotusError::Diagnostic(diag) => LotusError::Diagnostic(diag.push_frame(frame)),
            other => other,
        }
    }
}

impl From<toml::de::Error> for LotusError {
    fn from(err: toml::de::Error) -> Self {
        LotusError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LotusError>;

/// Shorthand for raising a script fault at `span`.
pub fn fault(kind: FaultKind, message: impl Into<String>, span: SourceSpan) -> LotusError {
    LotusError::from(Diagnostic::new(kind, message).with_span(span))
}
