use crate::diagnostics::SourceSpan;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Expr {
        expr: Box<Expr>,
        /// `!r` or `!s`.
        conversion: Option<char>,
        spec: Option<FormatSpec>,
    },
}

/// The `[[fill]align][sign][0][width][,][.precision][type]` mini-language
/// accepted after `:` in a replacement field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatSpec {
    pub fill: Option<char>,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub zero_pad: bool,
    pub width: Option<usize>,
    pub grouping: bool,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl FormatSpec {
    pub fn parse(text: &str) -> Option<Self> {
        let chars: Vec<char> = text.chars().collect();
        let mut spec = FormatSpec::default();
        let mut pos = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

        if chars.len() >= 2 && is_align(chars[1]) {
            spec.fill = Some(chars[0]);
            spec.align = Some(chars[1]);
            pos = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            spec.align = Some(chars[0]);
            pos = 1;
        }
        if let Some(&sign @ ('+' | '-' | ' ')) = chars.get(pos) {
            spec.sign = Some(sign);
            pos += 1;
        }
        if chars.get(pos) == Some(&'0') {
            spec.zero_pad = true;
            pos += 1;
        }
        let digits: String = chars[pos..].iter().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            pos += digits.len();
            spec.width = digits.parse().ok();
        }
        if chars.get(pos) == Some(&',') {
            spec.grouping = true;
            pos += 1;
        }
        if chars.get(pos) == Some(&'.') {
            let digits: String = chars[pos + 1..]
                .iter()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if digits.is_empty() {
                return None;
            }
            pos += 1 + digits.len();
            spec.precision = digits.parse().ok();
        }
        if let Some(&kind @ ('s' | 'd' | 'f' | 'F' | 'e' | 'E' | '%' | 'x' | 'X' | 'b' | 'o')) =
            chars.get(pos)
        {
            spec.kind = Some(kind);
            pos += 1;
        }
        (pos == chars.len()).then_some(spec)
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Variable(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    ListLiteral(Vec<Expr>),
    DictLiteral(Vec<(Expr, Expr)>),
    TupleLiteral(Vec<Expr>),
    Group(Box<Expr>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Attribute {
        target: Box<Expr>,
        name: String,
    },
    FString(Vec<FStringPart>),
}

/// One name in an `import a.b.c [as d]` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportName {
    pub path: Vec<String>,
    pub alias: Option<String>,
}

impl ImportName {
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }

    /// The name this import binds in the enclosing scope.
    pub fn bound_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.path.first().map(String::as_str).unwrap_or_default(),
        }
    }

    pub fn render(&self) -> String {
        match &self.alias {
            Some(alias) => format!("import {} as {alias}", self.dotted()),
            None => format!("import {}", self.dotted()),
        }
    }
}

/// One name in a `from m import x [as y]` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportAlias {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportAlias {
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn render(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} as {alias}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        target: Expr,
        value: Expr,
    },
    AugAssign {
        op: BinaryOp,
        target: Expr,
        value: Expr,
    },
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: Expr,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Import(Vec<ImportName>),
    ImportFrom {
        module: Vec<String>,
        names: Vec<ImportAlias>,
    },
    Assert {
        condition: Expr,
        message: Option<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

impl Stmt {
    pub fn is_import(&self) -> bool {
        matches!(self.kind, StmtKind::Import(_) | StmtKind::ImportFrom { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub items: Vec<Stmt>,
}
