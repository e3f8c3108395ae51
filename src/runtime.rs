use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    ast::{BinaryOp, Expr, ExprKind, FStringPart, Literal, Stmt, StmtKind, UnaryOp},
    diagnostics::{fault, Diagnostic, FaultKind, LotusError, Result, SourceSpan, SourceText},
    environment::{Environment, EnvironmentRef},
    harness_frame, parser, stdlib,
    value::{format_with_spec, repeated_len, type_error, DictKey, UserFunction, Value, ValueKind},
};

/// File name reported in frames for code submitted to the engine.
pub const SUBMITTED_FILE: &str = "<input>";

pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

pub struct Interpreter {
    globals: EnvironmentRef,
    env: EnvironmentRef,
    source: Rc<SourceText>,
    line: usize,
    depth: usize,
    max_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter with its own fresh globals.
    pub fn new() -> Self {
        Self::with_globals(
            Environment::with_parent(builtins()),
            Rc::new(SourceText::new(SUBMITTED_FILE, "")),
            DEFAULT_MAX_CALL_DEPTH,
        )
    }

    /// An interpreter that runs `source` against existing globals.
    pub fn with_globals(
        globals: EnvironmentRef,
        source: Rc<SourceText>,
        max_depth: usize,
    ) -> Self {
        Self {
            env: Rc::clone(&globals),
            globals,
            source,
            line: 1,
            depth: 0,
            max_depth,
        }
    }

    pub fn globals(&self) -> &EnvironmentRef {
        &self.globals
    }

    /// Parses and runs `source`; a trailing expression statement's value is
    /// returned, otherwise `None`.
    pub fn eval_source(&mut self, source: &str) -> Result<Value> {
        self.source = Rc::new(SourceText::new(SUBMITTED_FILE, source));
        let mut module = parser::parse_module(source).map_err(|diag| {
            let line = diag.span.map(|span| span.line).unwrap_or(1);
            LotusError::from(diag.push_frame(self.source.frame(line, "<module>")))
        })?;
        match module.items.pop() {
            Some(Stmt {
                kind: StmtKind::Expr(expr),
                ..
            }) => {
                self.run_units(&module.items)?;
                self.evaluate_unit(&expr)
            }
            Some(last) => {
                module.items.push(last);
                self.run_units(&module.items)?;
                Ok(Value::none())
            }
            None => Ok(Value::none()),
        }
    }

    /// Runs top-level statements in order, stopping at the first fault.
    pub fn run_units(&mut self, units: &[Stmt]) -> Result<()> {
        self.enter_module();
        for unit in units {
            if let Err(err) = self.execute_statement(unit) {
                return Err(self.module_fault(err));
            }
        }
        Ok(())
    }

    /// Evaluates a trailing top-level expression.
    pub fn evaluate_unit(&mut self, expr: &Expr) -> Result<Value> {
        self.enter_module();
        self.line = expr.span.line;
        self.evaluate(expr).map_err(|err| self.module_fault(err))
    }

    fn enter_module(&mut self) {
        self.env = Rc::clone(&self.globals);
        self.depth = 0;
    }

    fn module_fault(&mut self, err: LotusError) -> LotusError {
        self.env = Rc::clone(&self.globals);
        self.depth = 0;
        err.push_frame(self.source.frame(self.line, "<module>"))
            .push_frame(harness_frame!("Interpreter::run_units"))
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<FlowControl> {
        self.line = stmt.span.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.evaluate(expr)?;
                Ok(FlowControl::Next)
            }
            StmtKind::Assign { target, value } => {
                let value = self.evaluate(value)?;
                self.assign_target(target, value)?;
                Ok(FlowControl::Next)
            }
            StmtKind::AugAssign { op, target, value } => {
                let current = self.evaluate(target)?;
                let operand = self.evaluate(value)?;
                let updated = arithmetic(*op, &current, &operand).map_err(|e| at(e, stmt.span))?;
                match &target.kind {
                    ExprKind::Variable(name) => {
                        Environment::assign(&self.env, name, updated);
                        Ok(FlowControl::Next)
                    }
                    _ => {
                        self.write_back(target, updated)?;
                        Ok(FlowControl::Next)
                    }
                }
            }
            StmtKind::FunctionDef { name, params, body } => {
                let function = UserFunction {
                    name: name.clone(),
                    params: params.clone(),
                    body: Rc::new(body.clone()),
                    env: Rc::clone(&self.env),
                    source: Rc::clone(&self.source),
                };
                self.env
                    .borrow_mut()
                    .define(name.clone(), Value::new(ValueKind::Function(function)));
                Ok(FlowControl::Next)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::none(),
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_block(then_branch)
                } else if let Some(branch) = else_branch {
                    self.execute_block(branch)
                } else {
                    Ok(FlowControl::Next)
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute_block(body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::For {
                target,
                iterable,
                body,
            } => {
                let items = self
                    .evaluate(iterable)?
                    .iterate()
                    .map_err(|e| at(e, iterable.span))?;
                for item in items {
                    self.assign_target(target, item)?;
                    match self.execute_block(body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Break => Ok(FlowControl::Break),
            StmtKind::Continue => Ok(FlowControl::Continue),
            StmtKind::Pass => Ok(FlowControl::Next),
            StmtKind::Import(names) => {
                for name in names {
                    let module = stdlib::import_module(&name.path).map_err(|e| at(e, stmt.span))?;
                    let bound = match &name.alias {
                        Some(_) => module,
                        None if name.path.len() > 1 => {
                            stdlib::import_module(&name.path[..1]).map_err(|e| at(e, stmt.span))?
                        }
                        None => module,
                    };
                    self.env.borrow_mut().define(name.bound_name(), bound);
                }
                Ok(FlowControl::Next)
            }
            StmtKind::ImportFrom { module, names } => {
                let module_value = stdlib::import_module(module).map_err(|e| at(e, stmt.span))?;
                let ValueKind::Module(loaded) = module_value.kind() else {
                    return Ok(FlowControl::Next);
                };
                for name in names {
                    let value = loaded.exports.get(&name.name).cloned().ok_or_else(|| {
                        fault(
                            FaultKind::Import,
                            format!(
                                "cannot import name '{}' from '{}'",
                                name.name, loaded.name
                            ),
                            stmt.span,
                        )
                    })?;
                    self.env.borrow_mut().define(name.bound_name(), value);
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Assert { condition, message } => {
                if self.evaluate(condition)?.is_truthy() {
                    return Ok(FlowControl::Next);
                }
                let message = match message {
                    Some(expr) => self.evaluate(expr)?.to_string(),
                    None => String::new(),
                };
                Err(fault(FaultKind::Assertion, message, stmt.span))
            }
        }
    }

    /// Runs a suite in the current scope; suites do not open a new scope.
    fn execute_block(&mut self, statements: &[Stmt]) -> Result<FlowControl> {
        for stmt in statements {
            match self.execute_statement(stmt)? {
                FlowControl::Next => {}
                other => return Ok(other),
            }
        }
        Ok(FlowControl::Next)
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(literal(lit)),
            ExprKind::Variable(name) => Environment::get(&self.env, name, expr.span),
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let left_value = self.evaluate(left)?;
                if !left_value.is_truthy() {
                    return Ok(left_value);
                }
                self.evaluate(right)
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let left_value = self.evaluate(left)?;
                if left_value.is_truthy() {
                    return Ok(left_value);
                }
                self.evaluate(right)
            }
            ExprKind::Binary { op, left, right } => {
                let left_value = self.evaluate(left)?;
                let right_value = self.evaluate(right)?;
                arithmetic(*op, &left_value, &right_value).map_err(|e| at(e, expr.span))
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.evaluate(operand)?;
                unary(*op, &value).map_err(|e| at(e, expr.span))
            }
            ExprKind::Call { callee, args } => {
                if let ExprKind::Attribute { target, name } = &callee.kind {
                    return self.call_attribute(target, name, args, expr.span);
                }
                let callee_value = self.evaluate(callee)?;
                let arguments = self.evaluate_all(args)?;
                self.call(callee_value, arguments, expr.span)
            }
            ExprKind::ListLiteral(elements) => Ok(Value::list(self.evaluate_all(elements)?)),
            ExprKind::TupleLiteral(elements) => Ok(Value::tuple(self.evaluate_all(elements)?)),
            ExprKind::DictLiteral(entries) => {
                let mut map = IndexMap::new();
                for (key_expr, value_expr) in entries {
                    let key_value = self.evaluate(key_expr)?;
                    let key = DictKey::from_value(&key_value).map_err(|e| at(e, key_expr.span))?;
                    let value = self.evaluate(value_expr)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::Group(inner) => self.evaluate(inner),
            ExprKind::Index { target, index } => {
                let container = self.evaluate(target)?;
                let key = self.evaluate(index)?;
                get_item(&container, &key).map_err(|e| at(e, expr.span))
            }
            ExprKind::Attribute { target, name } => {
                let owner = self.evaluate(target)?;
                match owner.kind() {
                    ValueKind::Module(module) => module.exports.get(name).cloned().ok_or_else(|| {
                        fault(
                            FaultKind::Attribute,
                            format!("module '{}' has no attribute '{name}'", module.name),
                            expr.span,
                        )
                    }),
                    _ => Err(at(stdlib::no_attribute(&owner, name), expr.span)),
                }
            }
            ExprKind::FString(parts) => {
                let mut rendered = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => rendered.push_str(text),
                        FStringPart::Expr {
                            expr: inner,
                            conversion,
                            spec,
                        } => {
                            let mut value = self.evaluate(inner)?;
                            if *conversion == Some('r') {
                                value = Value::string(value.repr());
                            }
                            match spec {
                                Some(spec) => rendered.push_str(
                                    &format_with_spec(&value, spec)
                                        .map_err(|e| at(e, inner.span))?,
                                ),
                                None => rendered.push_str(&value.to_string()),
                            }
                        }
                    }
                }
                Ok(Value::string(rendered))
            }
        }
    }

    fn evaluate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|expr| self.evaluate(expr)).collect()
    }

    /// `target.name(args)`: module functions are looked up and called,
    /// other receivers dispatch to their builtin methods. Mutating methods
    /// write the updated receiver back to wherever `target` was read from.
    fn call_attribute(
        &mut self,
        target: &Expr,
        name: &str,
        args: &[Expr],
        span: SourceSpan,
    ) -> Result<Value> {
        let receiver = self.evaluate(target)?;
        if let ValueKind::Module(module) = receiver.kind() {
            let function = module.exports.get(name).cloned().ok_or_else(|| {
                fault(
                    FaultKind::Attribute,
                    format!("module '{}' has no attribute '{name}'", module.name),
                    span,
                )
            })?;
            let arguments = self.evaluate_all(args)?;
            return self.call(function, arguments, span);
        }
        let arguments = self.evaluate_all(args)?;
        let (result, updated) = stdlib::call_method(&receiver, name, &arguments)
            .map_err(|e| at(e, span).push_frame(harness_frame!("stdlib::call_method")))?;
        if let Some(updated) = updated {
            self.write_back(target, updated)?;
        }
        Ok(result)
    }

    fn call(&mut self, callee: Value, args: Vec<Value>, span: SourceSpan) -> Result<Value> {
        match callee.kind() {
            ValueKind::NativeFunction(fun) => fun
                .call(&args)
                .map_err(|e| at(e, span).push_frame(harness_frame!("NativeFunction::call"))),
            ValueKind::Function(fun) => self.call_user(fun, args, span),
            _ => Err(fault(
                FaultKind::Type,
                format!("'{}' object is not callable", callee.type_name()),
                span,
            )),
        }
    }

    fn call_user(&mut self, fun: &UserFunction, args: Vec<Value>, span: SourceSpan) -> Result<Value> {
        let expected = fun.params.len();
        if args.len() > expected {
            return Err(fault(
                FaultKind::Type,
                format!(
                    "{}() takes {expected} positional argument{} but {} {} given",
                    fun.name,
                    if expected == 1 { "" } else { "s" },
                    args.len(),
                    if args.len() == 1 { "was" } else { "were" }
                ),
                span,
            ));
        }
        if args.len() < expected {
            let missing: Vec<String> = fun.params[args.len()..]
                .iter()
                .map(|name| format!("'{name}'"))
                .collect();
            return Err(fault(
                FaultKind::Type,
                format!(
                    "{}() missing {} required positional argument{}: {}",
                    fun.name,
                    missing.len(),
                    if missing.len() == 1 { "" } else { "s" },
                    missing.join(" and ")
                ),
                span,
            ));
        }
        if self.depth >= self.max_depth {
            return Err(fault(
                FaultKind::Recursion,
                "maximum recursion depth exceeded",
                span,
            ));
        }

        let local = Environment::with_parent(Rc::clone(&fun.env));
        for (name, value) in fun.params.iter().zip(args) {
            local.borrow_mut().define(name.clone(), value);
        }
        let caller_env = std::mem::replace(&mut self.env, local);
        let caller_line = self.line;
        self.depth += 1;
        let outcome = self.execute_block(&fun.body);
        self.depth -= 1;
        self.env = caller_env;
        let outcome = outcome.map_err(|err| err.push_frame(fun.source.frame(self.line, &fun.name)));
        self.line = caller_line;

        match outcome? {
            FlowControl::Return(value) => Ok(value),
            _ => Ok(Value::none()),
        }
    }

    fn assign_target(&mut self, target: &Expr, value: Value) -> Result<()> {
        match &target.kind {
            ExprKind::Variable(name) => {
                self.env.borrow_mut().define(name.clone(), value);
                Ok(())
            }
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let container = self.evaluate(owner)?;
                let key = self.evaluate(index)?;
                let updated = set_item(&container, &key, value).map_err(|e| at(e, target.span))?;
                self.write_back(owner, updated)
            }
            ExprKind::TupleLiteral(targets) | ExprKind::ListLiteral(targets) => {
                let items = value.iterate().map_err(|_| {
                    fault(
                        FaultKind::Type,
                        format!(
                            "cannot unpack non-iterable {} object",
                            value.type_name()
                        ),
                        target.span,
                    )
                })?;
                if items.len() < targets.len() {
                    return Err(fault(
                        FaultKind::Value,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                        target.span,
                    ));
                }
                if items.len() > targets.len() {
                    return Err(fault(
                        FaultKind::Value,
                        format!("too many values to unpack (expected {})", targets.len()),
                        target.span,
                    ));
                }
                for (sub_target, item) in targets.iter().zip(items) {
                    self.assign_target(sub_target, item)?;
                }
                Ok(())
            }
            ExprKind::Group(inner) => self.assign_target(inner, value),
            _ => Err(fault(
                FaultKind::Syntax,
                "cannot assign to expression",
                target.span,
            )),
        }
    }

    /// Stores an updated container back into the place `target` names.
    /// Targets that are not places (call results, literals) are temporaries
    /// and the update is dropped.
    fn write_back(&mut self, target: &Expr, new_value: Value) -> Result<()> {
        match &target.kind {
            ExprKind::Variable(name) => {
                Environment::assign(&self.env, name, new_value);
                Ok(())
            }
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let container = self.evaluate(owner)?;
                let key = self.evaluate(index)?;
                let updated =
                    set_item(&container, &key, new_value).map_err(|e| at(e, target.span))?;
                self.write_back(owner, updated)
            }
            ExprKind::Group(inner) => self.write_back(inner, new_value),
            _ => Ok(()),
        }
    }
}

/// A fresh scope holding the builtin functions.
pub fn builtins() -> EnvironmentRef {
    let env = Environment::new();
    stdlib::install(&env);
    env
}

enum FlowControl {
    Next,
    Return(Value),
    Break,
    Continue,
}

/// Attaches `span` to a fault raised without one.
fn at(err: LotusError, span: SourceSpan) -> LotusError {
    match err {
        LotusError::Diagnostic(mut diag) => {
            if diag.span.is_none() {
                diag.span = Some(span);
            }
            LotusError::Diagnostic(diag)
        }
        other => other,
    }
}

fn literal(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::int(*n),
        Literal::Float(n) => Value::float(*n),
        Literal::Bool(b) => Value::bool(*b),
        Literal::String(s) => Value::string(s.clone()),
        Literal::None => Value::none(),
    }
}

fn raise(kind: FaultKind, message: impl Into<String>) -> LotusError {
    LotusError::from(Diagnostic::new(kind, message))
}

fn overflow() -> LotusError {
    raise(FaultKind::Overflow, "integer overflow")
}

/// Both operands as ints, when neither is a float.
fn int_pair(left: &Value, right: &Value) -> Option<(i64, i64)> {
    Some((left.as_int()?, right.as_int()?))
}

fn float_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    Some((left.as_number()?, right.as_number()?))
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> LotusError {
    type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn repeat(items: &[Value], count: i64) -> Result<Vec<Value>> {
    let len = repeated_len(items.len(), count, "sequence")?;
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(len);
    for _ in 0..len / items.len() {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

fn floor_div(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        return Err(raise(
            FaultKind::ZeroDivision,
            "integer division or modulo by zero",
        ));
    }
    let quotient = a.checked_div(b).ok_or_else(overflow)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

fn floor_mod(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        return Err(raise(FaultKind::ZeroDivision, "integer modulo by zero"));
    }
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}

/// Applies a non-short-circuit binary operator with Python semantics.
pub fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    use BinaryOp::*;
    match op {
        Add => match (left.kind(), right.kind()) {
            (ValueKind::Str(a), ValueKind::Str(b)) => Ok(Value::string(format!("{a}{b}"))),
            (ValueKind::List(a), ValueKind::List(b)) => {
                Ok(Value::list(a.iter().chain(b).cloned().collect()))
            }
            (ValueKind::Tuple(a), ValueKind::Tuple(b)) => {
                Ok(Value::tuple(a.iter().chain(b).cloned().collect()))
            }
            (ValueKind::Str(_), _) => Err(type_error(format!(
                "can only concatenate str (not \"{}\") to str",
                right.type_name()
            ))),
            (ValueKind::List(_), _) => Err(type_error(format!(
                "can only concatenate list (not \"{}\") to list",
                right.type_name()
            ))),
            _ => numeric(op, left, right, i64::checked_add, |a, b| a + b),
        },
        Sub => numeric(op, left, right, i64::checked_sub, |a, b| a - b),
        Mul => match (left.kind(), right.kind()) {
            (ValueKind::Str(s), _) | (_, ValueKind::Str(s)) => {
                let count = if left.as_str().is_some() {
                    right.as_int()
                } else {
                    left.as_int()
                };
                match count {
                    Some(count) => {
                        let len = repeated_len(s.len(), count, "string")?;
                        Ok(Value::string(s.repeat(len.checked_div(s.len()).unwrap_or(0))))
                    }
                    None => Err(type_error(format!(
                        "can't multiply sequence by non-int of type '{}'",
                        if left.as_str().is_some() {
                            right.type_name()
                        } else {
                            left.type_name()
                        }
                    ))),
                }
            }
            (ValueKind::List(items), _) if right.as_int().is_some() => {
                Ok(Value::list(repeat(items, right.as_int().unwrap_or(0))?))
            }
            (_, ValueKind::List(items)) if left.as_int().is_some() => {
                Ok(Value::list(repeat(items, left.as_int().unwrap_or(0))?))
            }
            (ValueKind::Tuple(items), _) if right.as_int().is_some() => {
                Ok(Value::tuple(repeat(items, right.as_int().unwrap_or(0))?))
            }
            _ => numeric(op, left, right, i64::checked_mul, |a, b| a * b),
        },
        Div => {
            let (a, b) = float_pair(left, right).ok_or_else(|| unsupported(op, left, right))?;
            if b == 0.0 {
                return Err(raise(FaultKind::ZeroDivision, "division by zero"));
            }
            Ok(Value::float(a / b))
        }
        FloorDiv => {
            if let Some((a, b)) = int_pair(left, right) {
                return floor_div(a, b).map(Value::int);
            }
            let (a, b) = float_pair(left, right).ok_or_else(|| unsupported(op, left, right))?;
            if b == 0.0 {
                return Err(raise(FaultKind::ZeroDivision, "float floor division by zero"));
            }
            Ok(Value::float((a / b).floor()))
        }
        Mod => {
            if let Some((a, b)) = int_pair(left, right) {
                return floor_mod(a, b).map(Value::int);
            }
            let (a, b) = float_pair(left, right).ok_or_else(|| unsupported(op, left, right))?;
            if b == 0.0 {
                return Err(raise(FaultKind::ZeroDivision, "float modulo"));
            }
            let remainder = a % b;
            if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
                Ok(Value::float(remainder + b))
            } else {
                Ok(Value::float(remainder))
            }
        }
        Pow => {
            if let Some((base, exp)) = int_pair(left, right) {
                if exp >= 0 {
                    let exp = u32::try_from(exp).map_err(|_| overflow())?;
                    return base.checked_pow(exp).map(Value::int).ok_or_else(overflow);
                }
                if base == 0 {
                    return Err(raise(
                        FaultKind::ZeroDivision,
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::float((base as f64).powf(exp as f64)));
            }
            let (a, b) = float_pair(left, right).ok_or_else(|| unsupported(op, left, right))?;
            if a == 0.0 && b < 0.0 {
                return Err(raise(
                    FaultKind::ZeroDivision,
                    "0.0 cannot be raised to a negative power",
                ));
            }
            Ok(Value::float(a.powf(b)))
        }
        Equal => Ok(Value::bool(left == right)),
        NotEqual => Ok(Value::bool(left != right)),
        Less | LessEqual | Greater | GreaterEqual => {
            let ordering = left.partial_cmp(right).ok_or_else(|| {
                type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            let result = match op {
                Less => ordering.is_lt(),
                LessEqual => ordering.is_le(),
                Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::bool(result))
        }
        In => contains(right, left).map(Value::bool),
        NotIn => contains(right, left).map(|found| Value::bool(!found)),
        And => Ok(if left.is_truthy() {
            right.clone()
        } else {
            left.clone()
        }),
        Or => Ok(if left.is_truthy() {
            left.clone()
        } else {
            right.clone()
        }),
    }
}

fn numeric(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        return int_op(a, b).map(Value::int).ok_or_else(overflow);
    }
    match float_pair(left, right) {
        Some((a, b)) => Ok(Value::float(float_op(a, b))),
        None => Err(unsupported(op, left, right)),
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool> {
    match container.kind() {
        ValueKind::Str(haystack) => match needle.as_str() {
            Some(needle) => Ok(haystack.contains(needle)),
            None => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                needle.type_name()
            ))),
        },
        ValueKind::List(items) | ValueKind::Tuple(items) => {
            Ok(items.iter().any(|item| item == needle))
        }
        ValueKind::Dict(map) => Ok(map.contains_key(&DictKey::from_value(needle)?)),
        _ => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            container.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::bool(!value.is_truthy())),
        UnaryOp::Negate => match value.kind() {
            ValueKind::Float(f) => Ok(Value::float(-f)),
            _ => match value.as_int() {
                Some(n) => n.checked_neg().map(Value::int).ok_or_else(overflow),
                None => Err(type_error(format!(
                    "bad operand type for unary -: '{}'",
                    value.type_name()
                ))),
            },
        },
        UnaryOp::Plus => match value.kind() {
            ValueKind::Float(f) => Ok(Value::float(*f)),
            _ => value.as_int().map(Value::int).ok_or_else(|| {
                type_error(format!(
                    "bad operand type for unary +: '{}'",
                    value.type_name()
                ))
            }),
        },
    }
}

/// Resolves a possibly negative sequence index.
fn sequence_index(len: usize, key: &Value, kind: &str) -> Result<usize> {
    let idx = match key.kind() {
        ValueKind::Int(_) | ValueKind::Bool(_) => key.as_int().unwrap_or(0),
        _ => {
            return Err(type_error(format!(
                "{kind} indices must be integers, not {}",
                key.type_name()
            )))
        }
    };
    let resolved = if idx < 0 { idx + len as i64 } else { idx };
    if resolved < 0 || resolved >= len as i64 {
        let what = if kind == "str" { "string" } else { kind };
        return Err(raise(FaultKind::Index, format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

fn get_item(container: &Value, key: &Value) -> Result<Value> {
    match container.kind() {
        ValueKind::List(items) => Ok(items[sequence_index(items.len(), key, "list")?].clone()),
        ValueKind::Tuple(items) => Ok(items[sequence_index(items.len(), key, "tuple")?].clone()),
        ValueKind::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let idx = sequence_index(chars.len(), key, "str")?;
            Ok(Value::string(chars[idx].to_string()))
        }
        ValueKind::Dict(map) => map
            .get(&DictKey::from_value(key)?)
            .cloned()
            .ok_or_else(|| raise(FaultKind::Key, key.repr())),
        _ => Err(type_error(format!(
            "'{}' object is not subscriptable",
            container.type_name()
        ))),
    }
}

fn set_item(container: &Value, key: &Value, value: Value) -> Result<Value> {
    match container.kind() {
        ValueKind::List(items) => {
            let idx = sequence_index(items.len(), key, "list").map_err(|err| match err {
                LotusError::Diagnostic(diag) if diag.kind == FaultKind::Index => {
                    raise(FaultKind::Index, "list assignment index out of range")
                }
                other => other,
            })?;
            let mut updated = items.clone();
            updated[idx] = value;
            Ok(Value::list(updated))
        }
        ValueKind::Dict(map) => {
            let mut updated = map.clone();
            updated.insert(DictKey::from_value(key)?, value);
            Ok(Value::dict(updated))
        }
        _ => Err(type_error(format!(
            "'{}' object does not support item assignment",
            container.type_name()
        ))),
    }
}
