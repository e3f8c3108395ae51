use crate::{
    ast::{
        BinaryOp, Expr, ExprKind, FStringPart, FormatSpec, ImportAlias, ImportName, Literal,
        Module, Stmt, StmtKind, UnaryOp,
    },
    diagnostics::{Diagnostic, FaultKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

pub fn parse_module(source: &str) -> Result<Module, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_module()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    function_depth: usize,
    loop_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            function_depth: 0,
            loop_depth: 0,
        }
    }

    fn parse_module(&mut self) -> Result<Module, Diagnostic> {
        let mut items = Vec::new();
        loop {
            while self.matches(TokenKind::Newline) {}
            if self.check(TokenKind::Eof) {
                break;
            }
            if let Some(token) = self.peek() {
                if matches!(token.kind, TokenKind::Indent | TokenKind::Dedent) {
                    return Err(self.error(token, "unexpected indent"));
                }
            }
            items.extend(self.parse_statement()?);
        }
        Ok(Module { items })
    }

    /// Parses one logical line, which yields several statements when simple
    /// statements are joined with `;`.
    fn parse_statement(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Keyword(Keyword::Def) => return Ok(vec![self.parse_function()?]),
                TokenKind::Keyword(Keyword::If) => return Ok(vec![self.parse_if(Keyword::If)?]),
                TokenKind::Keyword(Keyword::While) => return Ok(vec![self.parse_while()?]),
                TokenKind::Keyword(Keyword::For) => return Ok(vec![self.parse_for()?]),
                _ => {}
            }
        }
        self.parse_simple_line()
    }

    fn parse_simple_line(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        let mut stmts = vec![self.parse_simple_statement()?];
        while self.matches(TokenKind::Semicolon) {
            if self.check(TokenKind::Newline) || self.check(TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_simple_statement()?);
        }
        if !self.matches(TokenKind::Newline) && !self.check(TokenKind::Eof) {
            return Err(self.error_here("invalid syntax"));
        }
        Ok(stmts)
    }

    /// Parses the suite following a compound statement header's `:`.
    fn parse_suite(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        self.consume(TokenKind::Colon, "expected `:`")?;
        if !self.matches(TokenKind::Newline) {
            let body = self.parse_simple_line()?;
            let span = suite_span(&body, self.previous().span);
            return Ok((body, span));
        }
        while self.matches(TokenKind::Newline) {}
        self.consume(TokenKind::Indent, "expected an indented block")?;
        let mut body = Vec::new();
        while !self.check(TokenKind::Dedent) && !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        self.consume(TokenKind::Dedent, "expected dedent after block")?;
        let span = suite_span(&body, self.previous().span);
        Ok((body, span))
    }

    fn parse_function(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Def)?.span;
        let name_token = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let mut params: Vec<String> = Vec::new();
        while !self.check(TokenKind::RParen) {
            let param = self.consume_identifier("expected parameter name")?;
            if params.contains(&param.lexeme) {
                return Err(self.error(
                    &param,
                    &format!("duplicate argument '{}' in function definition", param.lexeme),
                ));
            }
            params.push(param.lexeme);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;

        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let suite = self.parse_suite();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        let (body, span) = suite?;

        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::FunctionDef {
                name: name_token.lexeme,
                params,
                body,
            },
        })
    }

    fn parse_if(&mut self, keyword: Keyword) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(keyword)?.span;
        let condition = self.parse_expression()?;
        let (then_branch, mut end) = self.parse_suite()?;
        let else_branch = if self.check(TokenKind::Keyword(Keyword::Elif)) {
            let nested = self.parse_if(Keyword::Elif)?;
            end = nested.span;
            Some(vec![nested])
        } else if self.matches_keyword(Keyword::Else) {
            let (branch, span) = self.parse_suite()?;
            end = span;
            Some(branch)
        } else {
            None
        };
        Ok(Stmt {
            span: start.to(end),
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?.span;
        let condition = self.parse_expression()?;
        let (body, span) = self.parse_loop_suite()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::For)?.span;
        let target = self.parse_target_list()?;
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression_list()?;
        let (body, span) = self.parse_loop_suite()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::For {
                target,
                iterable,
                body,
            },
        })
    }

    fn parse_loop_suite(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        self.loop_depth += 1;
        let suite = self.parse_suite();
        self.loop_depth -= 1;
        suite
    }

    fn parse_target_list(&mut self) -> Result<Expr, Diagnostic> {
        let first = self.parse_postfix()?;
        if !self.check(TokenKind::Comma) {
            check_target(&first)?;
            return Ok(first);
        }
        let mut targets = vec![first];
        while self.matches(TokenKind::Comma) {
            if self.check(TokenKind::Keyword(Keyword::In)) {
                break;
            }
            targets.push(self.parse_postfix()?);
        }
        let span = span_of(&targets);
        let target = Expr {
            span,
            kind: ExprKind::TupleLiteral(targets),
        };
        check_target(&target)?;
        Ok(target)
    }

    fn parse_simple_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error_eof("unexpected end of input"))?;
        match token.kind {
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                Ok(Stmt {
                    span: token.span,
                    kind: StmtKind::Pass,
                })
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(self.error(&token, "'break' outside loop"));
                }
                Ok(Stmt {
                    span: token.span,
                    kind: StmtKind::Break,
                })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(self.error(&token, "'continue' not properly in loop"));
                }
                Ok(Stmt {
                    span: token.span,
                    kind: StmtKind::Continue,
                })
            }
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Import) => self.parse_import(),
            TokenKind::Keyword(Keyword::From) => self.parse_import_from(),
            TokenKind::Keyword(Keyword::Assert) => self.parse_assert(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Return)?;
        if self.function_depth == 0 {
            return Err(self.error(&token, "'return' outside function"));
        }
        let expr = if self.at_statement_end() {
            None
        } else {
            Some(self.parse_expression_list()?)
        };
        let span = expr
            .as_ref()
            .map(|e| token.span.to(e.span))
            .unwrap_or(token.span);
        Ok(Stmt {
            span,
            kind: StmtKind::Return(expr),
        })
    }

    fn parse_dotted_name(&mut self) -> Result<(Vec<String>, SourceSpan), Diagnostic> {
        let first = self.consume_identifier("expected module name")?;
        let mut span = first.span;
        let mut path = vec![first.lexeme];
        while self.matches(TokenKind::Dot) {
            let segment = self.consume_identifier("expected module segment after `.`")?;
            span = span.to(segment.span);
            path.push(segment.lexeme);
        }
        Ok((path, span))
    }

    fn parse_alias(&mut self) -> Result<Option<Token>, Diagnostic> {
        if self.matches_keyword(Keyword::As) {
            Ok(Some(self.consume_identifier("expected alias after `as`")?))
        } else {
            Ok(None)
        }
    }

    fn parse_import(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Import)?.span;
        let mut names = Vec::new();
        let end = loop {
            let (path, mut end) = self.parse_dotted_name()?;
            let alias = self.parse_alias()?.map(|token| {
                end = token.span;
                token.lexeme
            });
            names.push(ImportName { path, alias });
            if !self.matches(TokenKind::Comma) {
                break end;
            }
        };
        Ok(Stmt {
            span: start.to(end),
            kind: StmtKind::Import(names),
        })
    }

    fn parse_import_from(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::From)?.span;
        let (module, _) = self.parse_dotted_name()?;
        self.consume_keyword(Keyword::Import)?;
        let parenthesized = self.matches(TokenKind::LParen);
        let mut names = Vec::new();
        loop {
            let name = self.consume_identifier("expected name to import")?;
            let alias = self.parse_alias()?.map(|token| token.lexeme);
            names.push(ImportAlias {
                name: name.lexeme,
                alias,
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
            if parenthesized && self.check(TokenKind::RParen) {
                break;
            }
        }
        if parenthesized {
            self.consume(TokenKind::RParen, "expected `)` after imported names")?;
        }
        Ok(Stmt {
            span: start.to(self.previous().span),
            kind: StmtKind::ImportFrom { module, names },
        })
    }

    fn parse_assert(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Assert)?.span;
        let condition = self.parse_expression()?;
        let message = if self.matches(TokenKind::Comma) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let end = message.as_ref().unwrap_or(&condition).span;
        Ok(Stmt {
            span: start.to(end),
            kind: StmtKind::Assert { condition, message },
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.parse_expression_list()?;
        if self.matches(TokenKind::Assign) {
            check_target(&expr)?;
            let value = self.parse_expression_list()?;
            if self.check(TokenKind::Assign) {
                return Err(self.error_here("chained assignment is not supported"));
            }
            return Ok(Stmt {
                span: expr.span.to(value.span),
                kind: StmtKind::Assign {
                    target: expr,
                    value,
                },
            });
        }
        let augmented = if self.matches(TokenKind::PlusAssign) {
            Some(BinaryOp::Add)
        } else if self.matches(TokenKind::MinusAssign) {
            Some(BinaryOp::Sub)
        } else if self.matches(TokenKind::StarAssign) {
            Some(BinaryOp::Mul)
        } else if self.matches(TokenKind::SlashAssign) {
            Some(BinaryOp::Div)
        } else {
            None
        };
        if let Some(op) = augmented {
            if !matches!(expr.kind, ExprKind::Variable(_) | ExprKind::Index { .. }) {
                return Err(Diagnostic::new(
                    FaultKind::Syntax,
                    "illegal expression for augmented assignment",
                )
                .with_span(expr.span));
            }
            let value = self.parse_expression_list()?;
            return Ok(Stmt {
                span: expr.span.to(value.span),
                kind: StmtKind::AugAssign {
                    op,
                    target: expr,
                    value,
                },
            });
        }
        Ok(Stmt {
            span: expr.span,
            kind: StmtKind::Expr(expr),
        })
    }

    /// A comma-separated expression list; more than one element (or a
    /// trailing comma) yields a tuple.
    fn parse_expression_list(&mut self) -> Result<Expr, Diagnostic> {
        let first = self.parse_expression()?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.matches(TokenKind::Comma) {
            if !self.starts_expression() {
                break;
            }
            elements.push(self.parse_expression()?);
        }
        let span = span_of(&elements);
        Ok(Expr {
            span,
            kind: ExprKind::TupleLiteral(elements),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_not()?;
        while self.matches_keyword(Keyword::And) {
            let right = self.parse_not()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, Diagnostic> {
        if self.matches_keyword(Keyword::Not) {
            let operator = self.previous().span;
            let right = self.parse_not()?;
            return Ok(Expr {
                span: operator.to(right.span),
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(right),
                },
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_arith()?;
        loop {
            let op = if self.matches(TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.matches(TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else if self.matches(TokenKind::LessEqual) {
                BinaryOp::LessEqual
            } else if self.matches(TokenKind::GreaterEqual) {
                BinaryOp::GreaterEqual
            } else if self.matches(TokenKind::Less) {
                BinaryOp::Less
            } else if self.matches(TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.matches_keyword(Keyword::In) {
                BinaryOp::In
            } else if self.check(TokenKind::Keyword(Keyword::Not))
                && self.check_next(TokenKind::Keyword(Keyword::In))
            {
                self.advance();
                self.advance();
                BinaryOp::NotIn
            } else {
                break;
            };
            let right = self.parse_arith()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_arith(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_term()?;
        loop {
            let op = if self.matches(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.matches(TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_term()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = if self.matches(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(TokenKind::DoubleSlash) {
                BinaryOp::FloorDiv
            } else if self.matches(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let op = if self.matches(TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.matches(TokenKind::Plus) {
            UnaryOp::Plus
        } else {
            return self.parse_power();
        };
        let operator = self.previous().span;
        let right = self.parse_unary()?;
        Ok(Expr {
            span: operator.to(right.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(right),
            },
        })
    }

    fn parse_power(&mut self) -> Result<Expr, Diagnostic> {
        let base = self.parse_postfix()?;
        if self.matches(TokenKind::DoubleStar) {
            let exponent = self.parse_unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let mut args = Vec::new();
                while !self.check(TokenKind::RParen) {
                    args.push(self.parse_expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                let paren = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                expr = Expr {
                    span: expr.span.to(paren.span),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                let index = self.parse_expression_list()?;
                let bracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
                expr = Expr {
                    span: expr.span.to(bracket.span),
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let ident = self.consume_identifier("expected attribute name after `.`")?;
                expr = Expr {
                    span: expr.span.to(ident.span),
                    kind: ExprKind::Attribute {
                        target: Box::new(expr),
                        name: ident.lexeme,
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error_eof("unexpected end of expression")),
        };
        let literal = |kind: Literal| -> Result<Expr, Diagnostic> {
            Ok(Expr {
                span: token.span,
                kind: ExprKind::Literal(kind),
            })
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                literal(Literal::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                literal(Literal::Bool(false))
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                literal(Literal::None)
            }
            TokenKind::Number => {
                self.advance();
                literal(self.number_literal(&token)?)
            }
            TokenKind::String | TokenKind::FString => self.parse_strings(),
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Variable(token.lexeme.clone()),
                })
            }
            TokenKind::LParen => {
                self.advance();
                if self.matches(TokenKind::RParen) {
                    return Ok(Expr {
                        span: token.span.to(self.previous().span),
                        kind: ExprKind::TupleLiteral(Vec::new()),
                    });
                }
                let inner = self.parse_expression_list()?;
                let rparen = self.consume(TokenKind::RParen, "expected `)` after expression")?;
                let span = token.span.to(rparen.span);
                let kind = if matches!(inner.kind, ExprKind::TupleLiteral(_)) {
                    inner.kind
                } else {
                    ExprKind::Group(Box::new(inner))
                };
                Ok(Expr { span, kind })
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(TokenKind::RBracket) {
                    elements.push(self.parse_expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                let rbracket =
                    self.consume(TokenKind::RBracket, "expected `]` after list literal")?;
                Ok(Expr {
                    span: token.span.to(rbracket.span),
                    kind: ExprKind::ListLiteral(elements),
                })
            }
            TokenKind::LBrace => self.parse_dict(),
            TokenKind::Unknown => Err(self.error(
                &token,
                &format!("invalid character '{}'", token.lexeme),
            )),
            TokenKind::Indent => Err(self.error(&token, "unexpected indent")),
            _ => Err(self.error(&token, "invalid syntax")),
        }
    }

    fn number_literal(&self, token: &Token) -> Result<Literal, Diagnostic> {
        let digits = token.lexeme.replace('_', "");
        if digits.contains(['.', 'e', 'E']) {
            digits
                .parse()
                .map(Literal::Float)
                .map_err(|_| self.error(token, "invalid decimal literal"))
        } else {
            digits
                .parse()
                .map(Literal::Int)
                .map_err(|_| self.error(token, "integer literal is too large"))
        }
    }

    /// Adjacent string literals concatenate; any f-string in the run turns
    /// the whole run into an f-string.
    fn parse_strings(&mut self) -> Result<Expr, Diagnostic> {
        let first = self.advance();
        let mut span = first.span;
        let mut parts = Vec::new();
        let mut formatted = false;
        let mut token = first;
        loop {
            if token.kind == TokenKind::FString {
                formatted = true;
                parts.extend(parse_fstring(&token)?);
            } else {
                parts.push(FStringPart::Literal(token.lexeme.clone()));
            }
            if !(self.check(TokenKind::String) || self.check(TokenKind::FString)) {
                break;
            }
            token = self.advance();
            span = span.to(token.span);
        }
        if !formatted {
            let text = parts
                .into_iter()
                .map(|part| match part {
                    FStringPart::Literal(text) => text,
                    FStringPart::Expr { .. } => String::new(),
                })
                .collect();
            return Ok(Expr {
                span,
                kind: ExprKind::Literal(Literal::String(text)),
            });
        }
        Ok(Expr {
            span,
            kind: ExprKind::FString(parts),
        })
    }

    fn parse_dict(&mut self) -> Result<Expr, Diagnostic> {
        let lbrace = self.advance();
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let key = self.parse_expression()?;
            self.consume(TokenKind::Colon, "expected `:` in dict literal")?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after dict literal")?;
        Ok(Expr {
            span: lbrace.span.to(rbrace.span),
            kind: ExprKind::DictLiteral(entries),
        })
    }

    fn at_statement_end(&self) -> bool {
        self.check(TokenKind::Newline) || self.check(TokenKind::Semicolon) || self.check(TokenKind::Eof)
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek().map(|t| &t.kind),
            Some(
                TokenKind::Identifier
                    | TokenKind::Number
                    | TokenKind::String
                    | TokenKind::FString
                    | TokenKind::LParen
                    | TokenKind::LBracket
                    | TokenKind::LBrace
                    | TokenKind::Minus
                    | TokenKind::Plus
                    | TokenKind::Keyword(Keyword::True)
                    | TokenKind::Keyword(Keyword::False)
                    | TokenKind::Keyword(Keyword::None)
                    | TokenKind::Keyword(Keyword::Not)
            )
        )
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(message))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        let message = format!("expected keyword `{}`", format!("{keyword:?}").to_lowercase());
        self.consume(TokenKind::Keyword(keyword), &message)
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().map(|token| token.kind == kind).unwrap_or(false)
    }

    fn check_next(&self, kind: TokenKind) -> bool {
        self.tokens
            .get(self.current + 1)
            .map(|token| token.kind == kind)
            .unwrap_or(false)
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eof) | None)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        Diagnostic::new(FaultKind::Syntax, message.to_string()).with_span(token.span)
    }

    fn error_here(&self, message: &str) -> Diagnostic {
        self.peek()
            .map(|tok| self.error(tok, message))
            .unwrap_or_else(|| self.error_eof(message))
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        Diagnostic::new(FaultKind::Syntax, message.to_string())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

fn span_of(exprs: &[Expr]) -> SourceSpan {
    match (exprs.first(), exprs.last()) {
        (Some(first), Some(last)) => first.span.to(last.span),
        _ => SourceSpan::default(),
    }
}

fn suite_span(body: &[Stmt], fallback: SourceSpan) -> SourceSpan {
    body.last().map(|stmt| stmt.span).unwrap_or(fallback)
}

fn check_target(expr: &Expr) -> Result<(), Diagnostic> {
    match &expr.kind {
        ExprKind::Variable(_) | ExprKind::Index { .. } => Ok(()),
        ExprKind::TupleLiteral(items) | ExprKind::ListLiteral(items) => {
            items.iter().try_for_each(check_target)
        }
        ExprKind::Group(inner) => check_target(inner),
        ExprKind::Literal(_) => Err(Diagnostic::new(FaultKind::Syntax, "cannot assign to literal")
            .with_span(expr.span)),
        ExprKind::Call { .. } => {
            Err(Diagnostic::new(FaultKind::Syntax, "cannot assign to function call")
                .with_span(expr.span))
        }
        _ => Err(Diagnostic::new(FaultKind::Syntax, "cannot assign to expression")
            .with_span(expr.span)),
    }
}

fn fstring_error(token: &Token, message: &str) -> Diagnostic {
    Diagnostic::new(FaultKind::Syntax, format!("f-string: {message}")).with_span(token.span)
}

/// Splits the body of an f-string token into literal text and embedded
/// replacement fields.
fn parse_fstring(token: &Token) -> Result<Vec<FStringPart>, Diagnostic> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = token.lexeme.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(fstring_error(token, "single '}' is not allowed")),
            '{' => {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                let field = take_field(&mut chars)
                    .ok_or_else(|| fstring_error(token, "expecting '}'"))?;
                parts.push(parse_field(token, &field)?);
            }
            _ => literal.push(ch),
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

/// Collects the text of one replacement field up to its closing brace.
fn take_field(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let mut field = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for ch in chars.by_ref() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth == 0 => return Some(field),
                '}' => depth -= 1,
                _ => {}
            },
        }
        field.push(ch);
    }
    None
}

fn parse_field(token: &Token, field: &str) -> Result<FStringPart, Diagnostic> {
    let (mut expression, mut spec) = (field, None);
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (idx, ch) in field.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ':' if depth == 0 => {
                    expression = &field[..idx];
                    spec = Some(&field[idx + 1..]);
                    break;
                }
                _ => {}
            },
        }
    }

    let mut conversion = None;
    if let Some((head, tail)) = expression.rsplit_once('!') {
        let tail = tail.trim();
        if matches!(tail, "r" | "s") && !head.trim_end().ends_with('=') {
            conversion = tail.chars().next();
            expression = head;
        }
    }

    if expression.trim().is_empty() {
        return Err(fstring_error(token, "empty expression not allowed"));
    }

    let tokens = Lexer::new(expression.trim())
        .starting_at_line(token.span.line)
        .tokenize()
        .map_err(|diag| fstring_error(token, &diag.message))?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression_list()?;
    while parser.matches(TokenKind::Newline) {}
    if !parser.check(TokenKind::Eof) {
        return Err(fstring_error(token, "invalid syntax in replacement field"));
    }

    let spec = match spec {
        Some(text) => Some(
            FormatSpec::parse(text)
                .ok_or_else(|| fstring_error(token, &format!("invalid format spec '{text}'")))?,
        ),
        None => None,
    };
    Ok(FStringPart::Expr {
        expr: Box::new(expr),
        conversion,
        spec,
    })
}
