use rustyline::{error::ReadlineError, DefaultEditor};
use tokio::runtime::Runtime;

use crate::{
    diagnostics::{LotusError, Result},
    lexer::{Lexer, TokenKind},
    session::Session,
};

const PROMPT: &str = ">>> ";
const CONTINUATION_PROMPT: &str = "... ";
const DEFAULT_EXPORT_FILE: &str = "session";

pub struct Repl {
    session: Session,
    runtime: Runtime,
}

impl Repl {
    pub fn new(session: Session) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        Ok(Self { session, runtime })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        let mut block: Vec<String> = Vec::new();
        loop {
            let prompt = if block.is_empty() {
                PROMPT
            } else {
                CONTINUATION_PROMPT
            };
            match editor.readline(prompt) {
                Ok(line) => {
                    if block.is_empty() {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        editor.add_history_entry(trimmed).ok();
                        if trimmed.starts_with(':') {
                            if !self.command(trimmed)? {
                                break;
                            }
                            continue;
                        }
                        if opens_block(trimmed) {
                            block.push(line);
                            continue;
                        }
                        self.submit(trimmed);
                    } else if line.trim().is_empty() {
                        let source = block.join("\n");
                        block.clear();
                        self.submit(&source);
                    } else {
                        editor.add_history_entry(line.as_str()).ok();
                        block.push(line);
                    }
                }
                Err(ReadlineError::Interrupted) => block.clear(),
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }

    fn submit(&self, source: &str) {
        match self
            .runtime
            .block_on(self.session.execute(source, None, None))
        {
            Ok(result) => {
                let rendered = result.render();
                if result.is_error() {
                    eprintln!("{}", rendered.trim_end());
                } else if !rendered.is_empty() {
                    println!("{}", rendered.trim_end_matches('\n'));
                }
            }
            Err(err) => eprintln!("error: {err}"),
        }
    }

    /// Handles a `:command` line; returns `false` when the REPL should stop.
    fn command(&self, line: &str) -> Result<bool> {
        let mut parts = line.split_whitespace();
        match parts.next().unwrap_or_default() {
            ":quit" | ":exit" => return Ok(false),
            ":reset" => {
                self.runtime.block_on(self.session.reset())?;
                println!("Session reset.");
            }
            ":history" => {
                for (idx, result) in self.session.history().iter().enumerate() {
                    println!("[{}] {} {}", idx + 1, result.kind(), result.code);
                }
            }
            ":export" => {
                let filename = parts.next().unwrap_or(DEFAULT_EXPORT_FILE);
                match self.session.export_history_to(".", filename, false) {
                    Ok(message) => println!("{message}"),
                    Err(err) => eprintln!("error: {err}"),
                }
            }
            other => eprintln!("unknown command `{other}`"),
        }
        Ok(true)
    }
}

/// A line whose last token is `:` starts an indented block that runs once a
/// blank line is entered. Lines that do not lex never open one.
fn opens_block(line: &str) -> bool {
    let Ok(tokens) = Lexer::new(line).tokenize() else {
        return false;
    };
    tokens
        .iter()
        .rev()
        .find(|token| {
            !matches!(
                token.kind,
                TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof
            )
        })
        .is_some_and(|token| token.kind == TokenKind::Colon)
}

fn readline_error(err: ReadlineError) -> LotusError {
    LotusError::from(std::io::Error::new(std::io::ErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use super::opens_block;

    #[test]
    fn trailing_colon_opens_a_block() {
        assert!(opens_block("if x:"));
        assert!(opens_block("def f(a, b):  # helper"));
        assert!(opens_block("for c in 'a#b':"));
        assert!(opens_block("if line.startswith('#'):"));
    }

    #[test]
    fn colons_inside_strings_or_brackets_do_not() {
        assert!(!opens_block("print('a:')"));
        assert!(!opens_block("label = '# not a comment:'"));
        assert!(!opens_block("items[1:]"));
        assert!(!opens_block("x = 1  # note:"));
        assert!(!opens_block("'unterminated:"));
    }
}
