use crate::{
    ast::{Expr, Stmt, StmtKind},
    diagnostics::Diagnostic,
    parser,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// The body ends in a bare expression whose value is reported.
    Expression,
    Statement,
}

#[derive(Debug, Clone)]
pub struct ClassifiedCode {
    /// Leading run of import statements.
    pub preamble: Vec<Stmt>,
    /// Body units, without the trailing expression.
    pub body: Vec<Stmt>,
    pub trailing: Option<Expr>,
    pub kind: CodeKind,
    /// Source text from the first body unit onward.
    pub body_text: String,
}

pub fn classify(raw: &str) -> Result<ClassifiedCode, Diagnostic> {
    let module = parser::parse_module(raw)?;
    let mut items = module.items.into_iter().peekable();

    let mut preamble = Vec::new();
    while let Some(stmt) = items.next_if(Stmt::is_import) {
        preamble.push(stmt);
    }
    let mut body: Vec<Stmt> = items.collect();

    let body_text = body
        .first()
        .and_then(|first| raw.get(first.span.start..))
        .map(|text| text.trim_end().to_string())
        .unwrap_or_default();

    let trailing = match body.pop() {
        Some(Stmt {
            kind: StmtKind::Expr(expr),
            ..
        }) => Some(expr),
        Some(last) => {
            body.push(last);
            None
        }
        None => None,
    };
    let kind = if trailing.is_some() {
        CodeKind::Expression
    } else {
        CodeKind::Statement
    };

    Ok(ClassifiedCode {
        preamble,
        body,
        trailing,
        kind,
        body_text,
    })
}
