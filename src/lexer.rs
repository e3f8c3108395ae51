use crate::diagnostics::{Diagnostic, FaultKind, SourceSpan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyword {
    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Pass,
    Import,
    From,
    As,
    True,
    False,
    None,
    And,
    Or,
    Not,
    Assert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    FString,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Newline,
    Indent,
    Dedent,
    Unknown,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    peeked: Option<(usize, char)>,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            peeked: None,
            line: 1,
            depth: 0,
            indents: vec![0],
            at_line_start: true,
        }
    }

    /// Numbers lines from `line` instead of 1, for source embedded in a
    /// larger text.
    pub fn starting_at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some((idx, ch)) = self.peeked.take() {
            Some((idx, ch))
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
            }
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn peek_second(&mut self) -> Option<(usize, char)> {
        self.peek();
        self.chars.clone().next()
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((_, ch)) = self.peek() {
            if ch == expected {
                self.bump();
                return true;
            }
        }
        false
    }

    fn span_from(&self, start: usize, line: usize) -> SourceSpan {
        SourceSpan::new(start, self.current, line)
    }

    /// Consumes the leading blanks of a physical line and returns its width.
    fn measure_indent(&mut self) -> usize {
        let mut width = 0;
        while let Some((_, ch)) = self.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.bump();
        }
        width
    }

    fn indent_to(
        &mut self,
        width: usize,
        start: usize,
        tokens: &mut Vec<Token>,
    ) -> Result<(), Diagnostic> {
        let span = SourceSpan::new(start, start, self.line);
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            tokens.push(Token {
                kind: TokenKind::Indent,
                lexeme: String::new(),
                span,
            });
            return Ok(());
        }
        while width < self.indents.last().copied().unwrap_or(0) {
            self.indents.pop();
            tokens.push(Token {
                kind: TokenKind::Dedent,
                lexeme: String::new(),
                span,
            });
        }
        if width != self.indents.last().copied().unwrap_or(0) {
            return Err(Diagnostic::new(
                FaultKind::Syntax,
                "unindent does not match any outer indentation level",
            )
            .with_span(span));
        }
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some((_, ch)) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_inline_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some((_, ' ' | '\t' | '\r' | '\x0c')) => {
                    self.bump();
                }
                Some((_, '\n')) if self.depth > 0 => {
                    self.bump();
                }
                Some((_, '#')) => self.skip_comment(),
                Some((_, '\\')) if matches!(self.peek_second(), Some((_, '\n'))) => {
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        let line = self.line;
        while let Some((_, ch)) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let lexeme = self.source[start..self.current].to_string();
        let kind = keyword_for(&lexeme).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            lexeme,
            span: self.span_from(start, line),
        }
    }

    fn number_literal(&mut self, start: usize) -> Token {
        let line = self.line;
        let mut seen_dot = false;
        let mut seen_exponent = false;
        while let Some((_, ch)) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' if !seen_dot && !seen_exponent => {
                    if let Some((_, next)) = self.peek_second() {
                        if next.is_alphabetic() || next == '_' {
                            break;
                        }
                    }
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' if !seen_exponent => {
                    match self.peek_second() {
                        Some((_, '0'..='9' | '+' | '-')) => {}
                        _ => break,
                    }
                    seen_exponent = true;
                    self.bump();
                    if let Some((_, '+' | '-')) = self.peek() {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        Token {
            kind: TokenKind::Number,
            lexeme: self.source[start..self.current].to_string(),
            span: self.span_from(start, line),
        }
    }

    /// Lexes a quoted literal whose opening quote has already been consumed.
    fn string_literal(
        &mut self,
        start: usize,
        quote: char,
        kind: TokenKind,
    ) -> Result<Token, Diagnostic> {
        let line = self.line;
        let pair: String = [quote, quote].iter().collect();
        let triple = self.source[self.current..].starts_with(&pair);
        if triple {
            self.bump();
            self.bump();
        }
        let mut value = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                c if c == quote => {
                    if !triple {
                        return Ok(Token {
                            kind,
                            lexeme: value,
                            span: self.span_from(start, line),
                        });
                    }
                    if self.source[self.current..].starts_with(&pair) {
                        self.bump();
                        self.bump();
                        return Ok(Token {
                            kind,
                            lexeme: value,
                            span: self.span_from(start, line),
                        });
                    }
                    value.push(c);
                }
                '\n' if !triple => break,
                '\\' => match self.bump() {
                    Some((_, esc)) => match esc {
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        't' => value.push('\t'),
                        '0' => value.push('\0'),
                        '\\' => value.push('\\'),
                        '\'' => value.push('\''),
                        '"' => value.push('"'),
                        '\n' => {}
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    },
                    None => break,
                },
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(FaultKind::Syntax, "unterminated string literal")
                .with_span(self.span_from(start, line)),
        )
    }

    fn simple_token(&mut self, start: usize, kind: TokenKind) -> Token {
        let line = self.line;
        Token {
            kind,
            lexeme: self.source[start..self.current].to_string(),
            span: self.span_from(start, line),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            if self.at_line_start && self.depth == 0 {
                let width = self.measure_indent();
                match self.peek() {
                    None => break,
                    Some((_, '\n' | '\r')) => {
                        self.bump();
                        continue;
                    }
                    Some((_, '#')) => {
                        self.skip_comment();
                        continue;
                    }
                    Some((start, _)) => {
                        self.indent_to(width, start, &mut tokens)?;
                        self.at_line_start = false;
                    }
                }
            }

            self.skip_inline_whitespace();
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => break,
            };

            let token = match ch {
                '\n' => {
                    self.at_line_start = true;
                    if !ends_logical_line(&tokens) {
                        tokens.push(Token {
                            kind: TokenKind::Newline,
                            lexeme: String::new(),
                            span: SourceSpan::new(start, start + 1, self.line - 1),
                        });
                    }
                    continue;
                }
                'f' | 'F' => match self.peek() {
                    Some((_, quote @ ('"' | '\''))) => {
                        self.bump();
                        self.string_literal(start, quote, TokenKind::FString)?
                    }
                    _ => self.identifier_or_keyword(start),
                },
                c if c.is_alphabetic() || c == '_' => self.identifier_or_keyword(start),
                '0'..='9' => self.number_literal(start),
                '"' | '\'' => self.string_literal(start, ch, TokenKind::String)?,
                '(' => {
                    self.depth += 1;
                    self.simple_token(start, TokenKind::LParen)
                }
                ')' => {
                    self.depth = self.depth.saturating_sub(1);
                    self.simple_token(start, TokenKind::RParen)
                }
                '{' => {
                    self.depth += 1;
                    self.simple_token(start, TokenKind::LBrace)
                }
                '}' => {
                    self.depth = self.depth.saturating_sub(1);
                    self.simple_token(start, TokenKind::RBrace)
                }
                '[' => {
                    self.depth += 1;
                    self.simple_token(start, TokenKind::LBracket)
                }
                ']' => {
                    self.depth = self.depth.saturating_sub(1);
                    self.simple_token(start, TokenKind::RBracket)
                }
                ',' => self.simple_token(start, TokenKind::Comma),
                '.' => self.simple_token(start, TokenKind::Dot),
                ';' => self.simple_token(start, TokenKind::Semicolon),
                ':' => self.simple_token(start, TokenKind::Colon),
                '+' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::PlusAssign)
                    } else {
                        self.simple_token(start, TokenKind::Plus)
                    }
                }
                '-' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::MinusAssign)
                    } else {
                        self.simple_token(start, TokenKind::Minus)
                    }
                }
                '*' => {
                    if self.match_next('*') {
                        self.simple_token(start, TokenKind::DoubleStar)
                    } else if self.match_next('=') {
                        self.simple_token(start, TokenKind::StarAssign)
                    } else {
                        self.simple_token(start, TokenKind::Star)
                    }
                }
                '/' => {
                    if self.match_next('/') {
                        self.simple_token(start, TokenKind::DoubleSlash)
                    } else if self.match_next('=') {
                        self.simple_token(start, TokenKind::SlashAssign)
                    } else {
                        self.simple_token(start, TokenKind::Slash)
                    }
                }
                '%' => self.simple_token(start, TokenKind::Percent),
                '=' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::EqualEqual)
                    } else {
                        self.simple_token(start, TokenKind::Assign)
                    }
                }
                '!' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::BangEqual)
                    } else {
                        self.simple_token(start, TokenKind::Unknown)
                    }
                }
                '<' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::LessEqual)
                    } else {
                        self.simple_token(start, TokenKind::Less)
                    }
                }
                '>' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::GreaterEqual)
                    } else {
                        self.simple_token(start, TokenKind::Greater)
                    }
                }
                _ => self.simple_token(start, TokenKind::Unknown),
            };
            tokens.push(token);
        }

        let eof = SourceSpan::new(self.current, self.current, self.line);
        if !ends_logical_line(&tokens) {
            tokens.push(Token {
                kind: TokenKind::Newline,
                lexeme: String::new(),
                span: eof,
            });
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            tokens.push(Token {
                kind: TokenKind::Dedent,
                lexeme: String::new(),
                span: eof,
            });
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            span: eof,
        });
        Ok(tokens)
    }
}

fn ends_logical_line(tokens: &[Token]) -> bool {
    matches!(
        tokens.last().map(|t| &t.kind),
        None | Some(TokenKind::Newline)
    )
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "def" => Kw::Def,
        "return" => Kw::Return,
        "if" => Kw::If,
        "elif" => Kw::Elif,
        "else" => Kw::Else,
        "while" => Kw::While,
        "for" => Kw::For,
        "in" => Kw::In,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "pass" => Kw::Pass,
        "import" => Kw::Import,
        "from" => Kw::From,
        "as" => Kw::As,
        "True" => Kw::True,
        "False" => Kw::False,
        "None" => Kw::None,
        "and" => Kw::And,
        "or" => Kw::Or,
        "not" => Kw::Not,
        "assert" => Kw::Assert,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}
