//! Stateful code-execution shell engine for the Lotus scripting language.
//! A [`Session`] keeps a namespace alive across calls, captures script
//! output, bounds each call with a deadline and reports every outcome as a
//! [`ShellResult`].

pub mod ast;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod export;
pub mod history;
pub mod lexer;
pub mod namespace;
pub mod normalizer;
pub mod parser;
pub mod repl;
pub mod result;
pub mod runtime;
pub mod session;
pub mod stdlib;
pub mod value;

pub use classifier::{classify, ClassifiedCode, CodeKind};
pub use config::{DisplayPolicy, ShellConfig};
pub use diagnostics::{Diagnostic, FaultKind, Frame, LotusError, SourceSpan};
pub use repl::Repl;
pub use result::{ErrorInfo, Outcome, ShellResult};
pub use runtime::Interpreter;
pub use session::{Session, SessionPool};
