use std::{cmp::Ordering, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::{FormatSpec, Stmt},
    diagnostics::{Diagnostic, FaultKind, LotusError, Result, SourceText},
    environment::EnvironmentRef,
};

#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn none() -> Self {
        Self::new(ValueKind::None)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::Str(value.into()))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Self::new(ValueKind::List(values))
    }

    pub fn tuple(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Tuple(values))
    }

    pub fn dict(entries: IndexMap<DictKey, Value>) -> Self {
        Self::new(ValueKind::Dict(entries))
    }

    pub fn module(name: impl Into<String>, exports: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Module(ModuleValue {
            name: name.into(),
            exports,
        }))
    }

    pub fn native(name: &'static str, arity: usize, callback: NativeCallback) -> Self {
        Self::new(ValueKind::NativeFunction(NativeFunction {
            name,
            arity,
            callback,
        }))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        matches!(&*self.0, ValueKind::None)
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::None => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Int(n) => *n != 0,
            ValueKind::Float(f) => *f != 0.0,
            ValueKind::Str(s) => !s.is_empty(),
            ValueKind::List(values) | ValueKind::Tuple(values) => !values.is_empty(),
            ValueKind::Dict(map) => !map.is_empty(),
            ValueKind::Module(_)
            | ValueKind::Function(_)
            | ValueKind::NativeFunction(_)
            | ValueKind::Type(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::None => "NoneType",
            ValueKind::Bool(_) => "bool",
            ValueKind::Int(_) => "int",
            ValueKind::Float(_) => "float",
            ValueKind::Str(_) => "str",
            ValueKind::List(_) => "list",
            ValueKind::Tuple(_) => "tuple",
            ValueKind::Dict(_) => "dict",
            ValueKind::Module(_) => "module",
            ValueKind::Function(_) => "function",
            ValueKind::NativeFunction(_) => "builtin_function_or_method",
            ValueKind::Type(_) => "type",
        }
    }

    /// The value as a float when it is numeric.
    pub fn as_number(&self) -> Option<f64> {
        match &*self.0 {
            ValueKind::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ValueKind::Int(n) => Some(*n as f64),
            ValueKind::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The value as an int when it is an int or bool.
    pub fn as_int(&self) -> Option<i64> {
        match &*self.0 {
            ValueKind::Bool(b) => Some(i64::from(*b)),
            ValueKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The `repr()` display form.
    pub fn repr(&self) -> String {
        format!("{self:?}")
    }

    /// Elements of an iterable value, in iteration order.
    pub fn iterate(&self) -> Result<Vec<Value>> {
        match &*self.0 {
            ValueKind::List(values) | ValueKind::Tuple(values) => Ok(values.clone()),
            ValueKind::Str(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
            ValueKind::Dict(map) => Ok(map.keys().map(DictKey::to_value).collect()),
            _ => Err(type_error(format!(
                "'{}' object is not iterable",
                self.type_name()
            ))),
        }
    }
}

/// Python-style equality: numbers compare across int, float and bool.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&*self.0, &*other.0) {
            (ValueKind::None, ValueKind::None) => true,
            (ValueKind::Str(a), ValueKind::Str(b)) => a == b,
            (ValueKind::List(a), ValueKind::List(b)) | (ValueKind::Tuple(a), ValueKind::Tuple(b)) => {
                a == b
            }
            (ValueKind::Dict(a), ValueKind::Dict(b)) => {
                a.len() == b.len() && a.iter().all(|(key, value)| b.get(key) == Some(value))
            }
            (ValueKind::Type(a), ValueKind::Type(b)) => a == b,
            (ValueKind::Module(a), ValueKind::Module(b)) => a.name == b.name,
            (ValueKind::NativeFunction(a), ValueKind::NativeFunction(b)) => a.name == b.name,
            _ => match (self.as_int(), other.as_int()) {
                (Some(a), Some(b)) => a == b,
                _ => match (self.as_number(), other.as_number()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                },
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (&*self.0, &*other.0) {
            (ValueKind::Str(a), ValueKind::Str(b)) => Some(a.cmp(b)),
            (ValueKind::List(a), ValueKind::List(b)) | (ValueKind::Tuple(a), ValueKind::Tuple(b)) => {
                for (left, right) in a.iter().zip(b.iter()) {
                    if left != right {
                        return left.partial_cmp(right);
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => match (self.as_int(), other.as_int()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => match (self.as_number(), other.as_number()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Str(s) => f.write_str(&quote_str(s)),
            ValueKind::List(values) => write_sequence(f, "[", "]", values, false),
            ValueKind::Tuple(values) => write_sequence(f, "(", ")", values, true),
            ValueKind::Dict(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {value:?}", key.to_value())?;
                }
                write!(f, "}}")
            }
            _ => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::None => write!(f, "None"),
            ValueKind::Bool(true) => write!(f, "True"),
            ValueKind::Bool(false) => write!(f, "False"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => f.write_str(&format_float(*n)),
            ValueKind::Str(s) => f.write_str(s),
            ValueKind::List(_) | ValueKind::Tuple(_) | ValueKind::Dict(_) => write!(f, "{self:?}"),
            ValueKind::Module(module) => write!(f, "<module '{}'>", module.name),
            ValueKind::Function(fun) => write!(f, "<function {}>", fun.name),
            ValueKind::NativeFunction(fun) => write!(f, "<built-in function {}>", fun.name),
            ValueKind::Type(name) => write!(f, "<class '{name}'>"),
        }
    }
}

fn write_sequence(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    close: &str,
    values: &[Value],
    tuple: bool,
) -> fmt::Result {
    f.write_str(open)?;
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{value:?}")?;
    }
    if tuple && values.len() == 1 {
        write!(f, ",")?;
    }
    f.write_str(close)
}

/// Quotes a string the way `repr` does: single quotes unless the text
/// contains a single quote and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let abs = value.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        return python_exponent(&format!("{value:e}"));
    }
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Rewrites Rust's `1.5e7` exponent notation as `1.5e+07`.
fn python_exponent(text: &str) -> String {
    match text.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => {
            let exp: i32 = exponent.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => text.to_string(),
    }
}

#[derive(Clone)]
pub enum ValueKind {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(IndexMap<DictKey, Value>),
    Module(ModuleValue),
    Function(UserFunction),
    NativeFunction(NativeFunction),
    Type(&'static str),
}

/// A hashable dict key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Tuple(Vec<DictKey>),
}

impl DictKey {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(match &*value.0 {
            ValueKind::None => DictKey::None,
            ValueKind::Bool(b) => DictKey::Bool(*b),
            ValueKind::Int(n) => DictKey::Int(*n),
            ValueKind::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => DictKey::Int(*f as i64),
            ValueKind::Float(f) => DictKey::Float(f.to_bits()),
            ValueKind::Str(s) => DictKey::Str(s.clone()),
            ValueKind::Tuple(items) => DictKey::Tuple(
                items
                    .iter()
                    .map(DictKey::from_value)
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => {
                return Err(type_error(format!(
                    "unhashable type: '{}'",
                    value.type_name()
                )))
            }
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::None => Value::none(),
            DictKey::Bool(b) => Value::bool(*b),
            DictKey::Int(n) => Value::int(*n),
            DictKey::Float(bits) => Value::float(f64::from_bits(*bits)),
            DictKey::Str(s) => Value::string(s.clone()),
            DictKey::Tuple(items) => Value::tuple(items.iter().map(DictKey::to_value).collect()),
        }
    }
}

#[derive(Clone)]
pub struct ModuleValue {
    pub name: String,
    pub exports: IndexMap<String, Value>,
}

#[derive(Clone)]
pub struct UserFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<Vec<Stmt>>,
    pub env: EnvironmentRef,
    pub source: Rc<SourceText>,
}

pub type NativeCallback = fn(&[Value]) -> Result<Value>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    /// Exact argument count, or `usize::MAX` for variadic functions.
    pub arity: usize,
    pub callback: NativeCallback,
}

impl NativeFunction {
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if self.arity != usize::MAX && args.len() != self.arity {
            return Err(type_error(format!(
                "{}() takes {} positional argument{} but {} were given",
                self.name,
                self.arity,
                if self.arity == 1 { "" } else { "s" },
                args.len()
            )));
        }
        (self.callback)(args)
    }
}

pub fn type_error(message: impl Into<String>) -> LotusError {
    LotusError::from(Diagnostic::new(FaultKind::Type, message))
}

pub fn value_error(message: impl Into<String>) -> LotusError {
    LotusError::from(Diagnostic::new(FaultKind::Value, message))
}

/// Longest string or sequence that repetition and padding may build.
pub const MAX_REPEAT_LEN: usize = 1 << 30;

/// Length of `count` copies of something `unit` long. Negative counts give
/// zero; results past [`MAX_REPEAT_LEN`] are an overflow fault.
pub fn repeated_len(unit: usize, count: i64, what: &str) -> Result<usize> {
    let too_long = || {
        LotusError::from(Diagnostic::new(
            FaultKind::Overflow,
            format!("repeated {what} is too long"),
        ))
    };
    let count = usize::try_from(count.max(0)).map_err(|_| too_long())?;
    unit.checked_mul(count)
        .filter(|len| *len <= MAX_REPEAT_LEN)
        .ok_or_else(too_long)
}

/// Renders `value` according to a replacement-field format spec.
pub fn format_with_spec(value: &Value, spec: &FormatSpec) -> Result<String> {
    if spec.width.unwrap_or(0) > MAX_REPEAT_LEN || spec.precision.unwrap_or(0) > MAX_REPEAT_LEN {
        return Err(value_error("Too many decimal digits in format string"));
    }
    let numeric = value.as_number().is_some() && !matches!(&*value.0, ValueKind::Bool(_));
    let invalid = || {
        value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            spec.kind.unwrap_or('s'),
            value.type_name()
        ))
    };

    let mut body = match spec.kind {
        Some(kind @ ('f' | 'F' | 'e' | 'E' | '%')) => {
            let number = value.as_number().ok_or_else(invalid)?;
            let precision = spec.precision.unwrap_or(6);
            match kind {
                'e' | 'E' => {
                    let text = python_exponent(&format!("{:.*e}", precision, number.abs()));
                    if kind == 'E' {
                        text.to_uppercase()
                    } else {
                        text
                    }
                }
                '%' => format!("{:.*}%", precision, number.abs() * 100.0),
                _ => format!("{:.*}", precision, number.abs()),
            }
        }
        Some(kind @ ('d' | 'x' | 'X' | 'b' | 'o')) => {
            let number = match &*value.0 {
                ValueKind::Int(n) => *n,
                ValueKind::Bool(b) => i64::from(*b),
                _ => return Err(invalid()),
            };
            let magnitude = number.unsigned_abs();
            match kind {
                'x' => format!("{magnitude:x}"),
                'X' => format!("{magnitude:X}"),
                'b' => format!("{magnitude:b}"),
                'o' => format!("{magnitude:o}"),
                _ => magnitude.to_string(),
            }
        }
        Some(_) => {
            let text = value.to_string();
            match spec.precision {
                Some(precision) => text.chars().take(precision).collect(),
                None => text,
            }
        }
        None => match (&*value.0, spec.precision) {
            (ValueKind::Float(f), Some(precision)) => format!("{:.*}", precision, f.abs()),
            (ValueKind::Float(f), None) => format_float(f.abs()),
            (ValueKind::Int(n), _) => n.unsigned_abs().to_string(),
            (_, Some(precision)) => value.to_string().chars().take(precision).collect(),
            _ => value.to_string(),
        },
    };

    let negative = numeric && value.as_number().is_some_and(|n| n < 0.0);
    if numeric && spec.grouping {
        body = group_thousands(&body);
    }
    let sign = match (numeric, negative, spec.sign) {
        (true, true, _) => "-",
        (true, false, Some('+')) => "+",
        (true, false, Some(' ')) => " ",
        _ => "",
    };

    let width = spec.width.unwrap_or(0);
    let len = sign.chars().count() + body.chars().count();
    if len >= width {
        return Ok(format!("{sign}{body}"));
    }
    let padding = width - len;
    let (fill, align) = match (spec.fill, spec.align, spec.zero_pad) {
        (fill, Some(align), _) => (fill.unwrap_or(' '), align),
        (_, None, true) if numeric => ('0', '='),
        _ => (' ', if numeric { '>' } else { '<' }),
    };
    let pad = |count: usize| fill.to_string().repeat(count);
    Ok(match align {
        '<' => format!("{sign}{body}{}", pad(padding)),
        '^' => format!(
            "{}{sign}{body}{}",
            pad(padding / 2),
            pad(padding - padding / 2)
        ),
        '=' => format!("{sign}{}{body}", pad(padding)),
        _ => format!("{}{sign}{body}", pad(padding)),
    })
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => digits.split_at(idx),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped.push_str(rest);
    grouped
}
