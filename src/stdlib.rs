use std::{
    cell::Cell,
    cmp::Ordering,
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use chrono::{Local, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::{
    ast::BinaryOp,
    capture,
    diagnostics::{Diagnostic, FaultKind, LotusError, Result},
    environment::EnvironmentRef,
    runtime::arithmetic,
    value::{repeated_len, type_error, value_error, DictKey, NativeCallback, Value, ValueKind},
};

/// Module names accepted by `import`.
pub const MODULES: &[&str] = &["math", "time", "os", "os.path", "sys", "json", "string"];

/// Installs the builtin functions into `env`, which sits beneath the
/// session globals.
pub fn install(env: &EnvironmentRef) {
    let builtins = [
        native("print", usize::MAX, builtin_print),
        native("len", 1, builtin_len),
        native("str", usize::MAX, builtin_str),
        native("repr", 1, builtin_repr),
        native("int", usize::MAX, builtin_int),
        native("float", usize::MAX, builtin_float),
        native("bool", usize::MAX, builtin_bool),
        native("list", usize::MAX, builtin_list),
        native("tuple", usize::MAX, builtin_tuple),
        native("type", 1, builtin_type),
        native("range", usize::MAX, builtin_range),
        native("abs", 1, builtin_abs),
        native("min", usize::MAX, builtin_min),
        native("max", usize::MAX, builtin_max),
        native("sum", usize::MAX, builtin_sum),
        native("sorted", 1, builtin_sorted),
        native("round", usize::MAX, builtin_round),
        native("enumerate", usize::MAX, builtin_enumerate),
        native("zip", usize::MAX, builtin_zip),
        native("sleep", 1, builtin_sleep),
    ];
    let mut scope = env.borrow_mut();
    for builtin in builtins {
        if let ValueKind::NativeFunction(fun) = builtin.kind() {
            scope.define(fun.name, builtin.clone());
        }
    }
}

/// Loads one of the bundled modules by its dotted path.
pub fn import_module(path: &[String]) -> Result<Value> {
    let dotted = path.join(".");
    let module = match dotted.as_str() {
        "math" => math_module(),
        "time" => time_module(),
        "os" => os_module(),
        "os.path" => os_path_module(),
        "sys" => sys_module(),
        "json" => json_module(),
        "string" => string_module(),
        _ => {
            return Err(LotusError::from(Diagnostic::new(
                FaultKind::ModuleNotFound,
                format!("No module named '{dotted}'"),
            )))
        }
    };
    Ok(module)
}

fn native(name: &'static str, arity: usize, callback: NativeCallback) -> Value {
    Value::native(name, arity, callback)
}

fn exports(entries: Vec<(&str, Value)>) -> IndexMap<String, Value> {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn ensure_exact(args: &[Value], expected: usize, name: &str) -> Result<()> {
    if args.len() != expected {
        return Err(type_error(format!(
            "{name}() takes exactly {expected} argument{} ({} given)",
            if expected == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn ensure_range(args: &[Value], min: usize, max: usize, name: &str) -> Result<()> {
    if args.len() < min {
        return Err(type_error(format!(
            "{name}() expected at least {min} argument{}, got {}",
            if min == 1 { "" } else { "s" },
            args.len()
        )));
    }
    if args.len() > max {
        return Err(type_error(format!(
            "{name}() expected at most {max} argument{}, got {}",
            if max == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn expect_string(value: &Value, name: &str) -> Result<String> {
    match value.kind() {
        ValueKind::Str(s) => Ok(s.clone()),
        _ => Err(type_error(format!(
            "{name}() argument must be str, not {}",
            value.type_name()
        ))),
    }
}

fn expect_int(value: &Value, name: &str) -> Result<i64> {
    value.as_int().ok_or_else(|| {
        type_error(format!(
            "{name}() argument must be int, not {}",
            value.type_name()
        ))
    })
}

fn expect_number(value: &Value, name: &str) -> Result<f64> {
    value.as_number().ok_or_else(|| {
        type_error(format!(
            "{name}() argument must be a real number, not {}",
            value.type_name()
        ))
    })
}

fn io_error(name: &str, path: &str, err: io::Error) -> LotusError {
    let mut diagnostic = Diagnostic::new(FaultKind::Os, format!("{name}: {err}: '{path}'"));
    if let Some(code) = err.raw_os_error() {
        diagnostic = diagnostic.with_note(format!("os error code: {code}"));
    }
    LotusError::from(diagnostic)
}

fn builtin_print(args: &[Value]) -> Result<Value> {
    let mut line = String::new();
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{arg}");
    }
    line.push('\n');
    capture::write_stdout(&line);
    Ok(Value::none())
}

fn builtin_len(args: &[Value]) -> Result<Value> {
    let len = match args[0].kind() {
        ValueKind::Str(s) => s.chars().count(),
        ValueKind::List(values) | ValueKind::Tuple(values) => values.len(),
        ValueKind::Dict(map) => map.len(),
        _ => {
            return Err(type_error(format!(
                "object of type '{}' has no len()",
                args[0].type_name()
            )))
        }
    };
    Ok(Value::int(len as i64))
}

fn builtin_str(args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "str")?;
    Ok(Value::string(
        args.first().map(|v| v.to_string()).unwrap_or_default(),
    ))
}

fn builtin_repr(args: &[Value]) -> Result<Value> {
    Ok(Value::string(args[0].repr()))
}

fn builtin_int(args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "int")?;
    let Some(value) = args.first() else {
        return Ok(Value::int(0));
    };
    match value.kind() {
        ValueKind::Int(n) => Ok(Value::int(*n)),
        ValueKind::Bool(b) => Ok(Value::int(i64::from(*b))),
        ValueKind::Float(f) => {
            if !f.is_finite() {
                return Err(LotusError::from(Diagnostic::new(
                    FaultKind::Overflow,
                    "cannot convert float infinity or NaN to integer",
                )));
            }
            Ok(Value::int(f.trunc() as i64))
        }
        ValueKind::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::int)
            .map_err(|_| {
                value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    value.repr()
                ))
            }),
        _ => Err(type_error(format!(
            "int() argument must be a string or a real number, not '{}'",
            value.type_name()
        ))),
    }
}

fn builtin_float(args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "float")?;
    let Some(value) = args.first() else {
        return Ok(Value::float(0.0));
    };
    match value.kind() {
        ValueKind::Str(s) => {
            let text = s.trim().to_lowercase();
            let parsed = match text.as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                _ => text.replace('_', "").parse::<f64>().ok(),
            };
            parsed.map(Value::float).ok_or_else(|| {
                value_error(format!(
                    "could not convert string to float: {}",
                    value.repr()
                ))
            })
        }
        _ => value.as_number().map(Value::float).ok_or_else(|| {
            type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                value.type_name()
            ))
        }),
    }
}

fn builtin_bool(args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "bool")?;
    Ok(Value::bool(
        args.first().map(Value::is_truthy).unwrap_or(false),
    ))
}

fn builtin_list(args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "list")?;
    match args.first() {
        Some(value) => Ok(Value::list(value.iterate()?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn builtin_tuple(args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "tuple")?;
    match args.first() {
        Some(value) => Ok(Value::tuple(value.iterate()?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn builtin_type(args: &[Value]) -> Result<Value> {
    Ok(Value::new(ValueKind::Type(args[0].type_name())))
}

fn builtin_range(args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 3, "range")?;
    let ints = args
        .iter()
        .map(|arg| {
            arg.as_int().ok_or_else(|| {
                type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    arg.type_name()
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
        [] => (0, 0, 1),
    };
    if step == 0 {
        return Err(value_error("range() arg 3 must not be zero"));
    }
    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        values.push(Value::int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::list(values))
}

fn builtin_abs(args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Int(n) => n.checked_abs().map(Value::int).ok_or_else(|| {
            LotusError::from(Diagnostic::new(FaultKind::Overflow, "integer overflow"))
        }),
        ValueKind::Bool(b) => Ok(Value::int(i64::from(*b))),
        ValueKind::Float(f) => Ok(Value::float(f.abs())),
        _ => Err(type_error(format!(
            "bad operand type for abs(): '{}'",
            args[0].type_name()
        ))),
    }
}

fn extreme(args: &[Value], name: &str, wanted: Ordering) -> Result<Value> {
    ensure_range(args, 1, usize::MAX, name)?;
    let candidates = if args.len() == 1 {
        args[0].iterate()?
    } else {
        args.to_vec()
    };
    let mut best: Option<Value> = None;
    for candidate in candidates {
        best = Some(match best {
            None => candidate,
            Some(current) => match candidate.partial_cmp(&current) {
                Some(ordering) if ordering == wanted => candidate,
                Some(_) => current,
                None => return Err(unorderable(&candidate, &current)),
            },
        });
    }
    best.ok_or_else(|| value_error(format!("{name}() arg is an empty sequence")))
}

fn unorderable(left: &Value, right: &Value) -> LotusError {
    type_error(format!(
        "'<' not supported between instances of '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn builtin_min(args: &[Value]) -> Result<Value> {
    extreme(args, "min", Ordering::Less)
}

fn builtin_max(args: &[Value]) -> Result<Value> {
    extreme(args, "max", Ordering::Greater)
}

fn builtin_sum(args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "sum")?;
    let mut total = args.get(1).cloned().unwrap_or_else(|| Value::int(0));
    if total.as_str().is_some() {
        return Err(type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in args[0].iterate()? {
        total = arithmetic(BinaryOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn sort_values(values: &mut [Value]) -> Result<()> {
    let failed: Cell<Option<(Value, Value)>> = Cell::new(None);
    values.sort_by(|a, b| {
        a.partial_cmp(b).unwrap_or_else(|| {
            failed.set(Some((a.clone(), b.clone())));
            Ordering::Equal
        })
    });
    match failed.into_inner() {
        Some((a, b)) => Err(unorderable(&a, &b)),
        None => Ok(()),
    }
}

fn builtin_sorted(args: &[Value]) -> Result<Value> {
    let mut values = args[0].iterate()?;
    sort_values(&mut values)?;
    Ok(Value::list(values))
}

fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        2.0 * (value / 2.0).round()
    } else {
        rounded
    }
}

fn builtin_round(args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "round")?;
    let digits = match args.get(1) {
        Some(value) if !value.is_none() => Some(expect_int(value, "round")?),
        _ => None,
    };
    match (args[0].kind(), digits) {
        (ValueKind::Int(n), _) => Ok(Value::int(*n)),
        (ValueKind::Bool(b), _) => Ok(Value::int(i64::from(*b))),
        (ValueKind::Float(f), None) => {
            if !f.is_finite() {
                return Err(LotusError::from(Diagnostic::new(
                    FaultKind::Overflow,
                    "cannot convert float infinity or NaN to integer",
                )));
            }
            Ok(Value::int(round_half_even(*f) as i64))
        }
        (ValueKind::Float(f), Some(digits)) => {
            let factor = 10f64.powi(digits as i32);
            Ok(Value::float(round_half_even(f * factor) / factor))
        }
        _ => Err(type_error(format!(
            "type {} doesn't define __round__ method",
            args[0].type_name()
        ))),
    }
}

fn builtin_enumerate(args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "enumerate")?;
    let start = match args.get(1) {
        Some(value) => expect_int(value, "enumerate")?,
        None => 0,
    };
    let items = args[0]
        .iterate()?
        .into_iter()
        .zip(start..)
        .map(|(item, idx)| Value::tuple(vec![Value::int(idx), item]))
        .collect();
    Ok(Value::list(items))
}

fn builtin_zip(args: &[Value]) -> Result<Value> {
    let columns = args
        .iter()
        .map(Value::iterate)
        .collect::<Result<Vec<_>>>()?;
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let rows = (0..len)
        .map(|row| Value::tuple(columns.iter().map(|col| col[row].clone()).collect()))
        .collect();
    Ok(Value::list(rows))
}

fn builtin_sleep(args: &[Value]) -> Result<Value> {
    let seconds = expect_number(&args[0], "sleep")?;
    if seconds < 0.0 || !seconds.is_finite() {
        return Err(value_error("sleep length must be non-negative"));
    }
    let length = Duration::try_from_secs_f64(seconds).map_err(|_| {
        LotusError::from(Diagnostic::new(FaultKind::Overflow, "sleep length is too large"))
    })?;
    thread::sleep(length);
    Ok(Value::none())
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

/// Outcome of a method call: the returned value plus, for mutating methods,
/// the receiver's replacement value.
pub type MethodOutcome = (Value, Option<Value>);

/// Calls method `name` on a non-module receiver.
pub fn call_method(receiver: &Value, name: &str, args: &[Value]) -> Result<MethodOutcome> {
    match receiver.kind() {
        ValueKind::Str(text) => str_method(text, name, args).map(|value| (value, None)),
        ValueKind::List(items) => list_method(items, name, args),
        ValueKind::Dict(map) => dict_method(map, name, args),
        _ => Err(no_attribute(receiver, name)),
    }
}

pub fn no_attribute(receiver: &Value, name: &str) -> LotusError {
    LotusError::from(Diagnostic::new(
        FaultKind::Attribute,
        format!(
            "'{}' object has no attribute '{name}'",
            receiver.type_name()
        ),
    ))
}

fn str_method(text: &str, name: &str, args: &[Value]) -> Result<Value> {
    let receiver = || Value::string(text.to_string());
    match name {
        "upper" => {
            ensure_exact(args, 0, "upper")?;
            Ok(Value::string(text.to_uppercase()))
        }
        "lower" => {
            ensure_exact(args, 0, "lower")?;
            Ok(Value::string(text.to_lowercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            ensure_range(args, 0, 1, name)?;
            let chars: Option<Vec<char>> = match args.first() {
                Some(value) if !value.is_none() => {
                    Some(expect_string(value, name)?.chars().collect())
                }
                _ => None,
            };
            let strip = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "lstrip" => text.trim_start_matches(strip),
                "rstrip" => text.trim_end_matches(strip),
                _ => text.trim_matches(strip),
            };
            Ok(Value::string(stripped.to_string()))
        }
        "split" => {
            ensure_range(args, 0, 1, "split")?;
            let parts: Vec<Value> = match args.first() {
                Some(sep) if !sep.is_none() => {
                    let sep = expect_string(sep, "split")?;
                    if sep.is_empty() {
                        return Err(value_error("empty separator"));
                    }
                    text.split(sep.as_str()).map(Value::string).collect()
                }
                _ => text.split_whitespace().map(Value::string).collect(),
            };
            Ok(Value::list(parts))
        }
        "replace" => {
            ensure_exact(args, 2, "replace")?;
            let from = expect_string(&args[0], "replace")?;
            let to = expect_string(&args[1], "replace")?;
            Ok(Value::string(text.replace(&from, &to)))
        }
        "startswith" => {
            ensure_exact(args, 1, "startswith")?;
            let prefix = expect_string(&args[0], "startswith")?;
            Ok(Value::bool(text.starts_with(&prefix)))
        }
        "endswith" => {
            ensure_exact(args, 1, "endswith")?;
            let suffix = expect_string(&args[0], "endswith")?;
            Ok(Value::bool(text.ends_with(&suffix)))
        }
        "join" => {
            ensure_exact(args, 1, "join")?;
            let mut output = String::new();
            for (idx, item) in args[0].iterate()?.iter().enumerate() {
                let piece = item.as_str().ok_or_else(|| {
                    type_error(format!(
                        "sequence item {idx}: expected str instance, {} found",
                        item.type_name()
                    ))
                })?;
                if idx > 0 {
                    output.push_str(text);
                }
                output.push_str(piece);
            }
            Ok(Value::string(output))
        }
        "find" => {
            ensure_exact(args, 1, "find")?;
            let needle = expect_string(&args[0], "find")?;
            let position = text
                .find(&needle)
                .map(|byte| text[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::int(position))
        }
        "count" => {
            ensure_exact(args, 1, "count")?;
            let needle = expect_string(&args[0], "count")?;
            let count = if needle.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(needle.as_str()).count()
            };
            Ok(Value::int(count as i64))
        }
        "isdigit" => {
            ensure_exact(args, 0, "isdigit")?;
            Ok(Value::bool(
                !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()),
            ))
        }
        _ => Err(no_attribute(&receiver(), name)),
    }
}

fn list_method(items: &[Value], name: &str, args: &[Value]) -> Result<MethodOutcome> {
    match name {
        "append" => {
            ensure_exact(args, 1, "append")?;
            let mut updated = items.to_vec();
            updated.push(args[0].clone());
            Ok((Value::none(), Some(Value::list(updated))))
        }
        "extend" => {
            ensure_exact(args, 1, "extend")?;
            let mut updated = items.to_vec();
            updated.extend(args[0].iterate()?);
            Ok((Value::none(), Some(Value::list(updated))))
        }
        "insert" => {
            ensure_exact(args, 2, "insert")?;
            let idx = expect_int(&args[0], "insert")?;
            let len = items.len() as i64;
            let position = if idx < 0 { (len + idx).max(0) } else { idx.min(len) } as usize;
            let mut updated = items.to_vec();
            updated.insert(position, args[1].clone());
            Ok((Value::none(), Some(Value::list(updated))))
        }
        "pop" => {
            ensure_range(args, 0, 1, "pop")?;
            if items.is_empty() {
                return Err(LotusError::from(Diagnostic::new(
                    FaultKind::Index,
                    "pop from empty list",
                )));
            }
            let len = items.len() as i64;
            let idx = match args.first() {
                Some(value) => expect_int(value, "pop")?,
                None => -1,
            };
            let position = if idx < 0 { len + idx } else { idx };
            if !(0..len).contains(&position) {
                return Err(LotusError::from(Diagnostic::new(
                    FaultKind::Index,
                    "pop index out of range",
                )));
            }
            let mut updated = items.to_vec();
            let popped = updated.remove(position as usize);
            Ok((popped, Some(Value::list(updated))))
        }
        "index" => {
            ensure_exact(args, 1, "index")?;
            items
                .iter()
                .position(|item| item == &args[0])
                .map(|idx| (Value::int(idx as i64), None))
                .ok_or_else(|| value_error(format!("{} is not in list", args[0].repr())))
        }
        "count" => {
            ensure_exact(args, 1, "count")?;
            let count = items.iter().filter(|item| *item == &args[0]).count();
            Ok((Value::int(count as i64), None))
        }
        "reverse" => {
            ensure_exact(args, 0, "reverse")?;
            let updated = items.iter().rev().cloned().collect();
            Ok((Value::none(), Some(Value::list(updated))))
        }
        "sort" => {
            ensure_exact(args, 0, "sort")?;
            let mut updated = items.to_vec();
            sort_values(&mut updated)?;
            Ok((Value::none(), Some(Value::list(updated))))
        }
        _ => Err(no_attribute(&Value::list(Vec::new()), name)),
    }
}

fn dict_method(
    map: &IndexMap<DictKey, Value>,
    name: &str,
    args: &[Value],
) -> Result<MethodOutcome> {
    match name {
        "keys" => {
            ensure_exact(args, 0, "keys")?;
            Ok((Value::list(map.keys().map(DictKey::to_value).collect()), None))
        }
        "values" => {
            ensure_exact(args, 0, "values")?;
            Ok((Value::list(map.values().cloned().collect()), None))
        }
        "items" => {
            ensure_exact(args, 0, "items")?;
            let items = map
                .iter()
                .map(|(key, value)| Value::tuple(vec![key.to_value(), value.clone()]))
                .collect();
            Ok((Value::list(items), None))
        }
        "get" => {
            ensure_range(args, 1, 2, "get")?;
            let key = DictKey::from_value(&args[0])?;
            let value = map
                .get(&key)
                .cloned()
                .or_else(|| args.get(1).cloned())
                .unwrap_or_else(Value::none);
            Ok((value, None))
        }
        "pop" => {
            ensure_range(args, 1, 2, "pop")?;
            let key = DictKey::from_value(&args[0])?;
            let mut updated = map.clone();
            match updated.shift_remove(&key) {
                Some(value) => Ok((value, Some(Value::dict(updated)))),
                None => match args.get(1) {
                    Some(default) => Ok((default.clone(), None)),
                    None => Err(LotusError::from(Diagnostic::new(
                        FaultKind::Key,
                        args[0].repr(),
                    ))),
                },
            }
        }
        "update" => {
            ensure_exact(args, 1, "update")?;
            let ValueKind::Dict(other) = args[0].kind() else {
                return Err(type_error(format!(
                    "'{}' object is not a mapping",
                    args[0].type_name()
                )));
            };
            let mut updated = map.clone();
            for (key, value) in other {
                updated.insert(key.clone(), value.clone());
            }
            Ok((Value::none(), Some(Value::dict(updated))))
        }
        _ => Err(no_attribute(&Value::dict(IndexMap::new()), name)),
    }
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

fn math_module() -> Value {
    Value::module(
        "math",
        exports(vec![
            ("pi", Value::float(std::f64::consts::PI)),
            ("e", Value::float(std::f64::consts::E)),
            ("tau", Value::float(std::f64::consts::TAU)),
            ("inf", Value::float(f64::INFINITY)),
            ("nan", Value::float(f64::NAN)),
            ("sqrt", native("sqrt", 1, math_sqrt)),
            ("floor", native("floor", 1, math_floor)),
            ("ceil", native("ceil", 1, math_ceil)),
            ("trunc", native("trunc", 1, math_trunc)),
            ("fabs", native("fabs", 1, math_fabs)),
            ("pow", native("pow", 2, math_pow)),
            ("exp", native("exp", 1, math_exp)),
            ("log", native("log", usize::MAX, math_log)),
            ("log10", native("log10", 1, math_log10)),
            ("log2", native("log2", 1, math_log2)),
            ("sin", native("sin", 1, math_sin)),
            ("cos", native("cos", 1, math_cos)),
            ("tan", native("tan", 1, math_tan)),
            ("factorial", native("factorial", 1, math_factorial)),
            ("gcd", native("gcd", 2, math_gcd)),
        ]),
    )
}

fn domain_error() -> LotusError {
    value_error("math domain error")
}

fn float_to_int(value: f64) -> Result<Value> {
    if !value.is_finite() {
        return Err(LotusError::from(Diagnostic::new(
            FaultKind::Overflow,
            "cannot convert float infinity or NaN to integer",
        )));
    }
    Ok(Value::int(value as i64))
}

fn math_sqrt(args: &[Value]) -> Result<Value> {
    let number = expect_number(&args[0], "sqrt")?;
    if number < 0.0 {
        return Err(domain_error());
    }
    Ok(Value::float(number.sqrt()))
}

fn math_floor(args: &[Value]) -> Result<Value> {
    if let Some(n) = args[0].as_int() {
        return Ok(Value::int(n));
    }
    float_to_int(expect_number(&args[0], "floor")?.floor())
}

fn math_ceil(args: &[Value]) -> Result<Value> {
    if let Some(n) = args[0].as_int() {
        return Ok(Value::int(n));
    }
    float_to_int(expect_number(&args[0], "ceil")?.ceil())
}

fn math_trunc(args: &[Value]) -> Result<Value> {
    if let Some(n) = args[0].as_int() {
        return Ok(Value::int(n));
    }
    float_to_int(expect_number(&args[0], "trunc")?.trunc())
}

fn math_fabs(args: &[Value]) -> Result<Value> {
    Ok(Value::float(expect_number(&args[0], "fabs")?.abs()))
}

fn math_pow(args: &[Value]) -> Result<Value> {
    let base = expect_number(&args[0], "pow")?;
    let exponent = expect_number(&args[1], "pow")?;
    Ok(Value::float(base.powf(exponent)))
}

fn math_exp(args: &[Value]) -> Result<Value> {
    let result = expect_number(&args[0], "exp")?.exp();
    if result.is_infinite() {
        return Err(LotusError::from(Diagnostic::new(
            FaultKind::Overflow,
            "math range error",
        )));
    }
    Ok(Value::float(result))
}

fn math_log(args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "log")?;
    let number = expect_number(&args[0], "log")?;
    if number <= 0.0 {
        return Err(domain_error());
    }
    match args.get(1) {
        Some(base) => {
            let base = expect_number(base, "log")?;
            if base <= 0.0 || base == 1.0 {
                return Err(domain_error());
            }
            Ok(Value::float(number.ln() / base.ln()))
        }
        None => Ok(Value::float(number.ln())),
    }
}

fn math_log10(args: &[Value]) -> Result<Value> {
    let number = expect_number(&args[0], "log10")?;
    if number <= 0.0 {
        return Err(domain_error());
    }
    Ok(Value::float(number.log10()))
}

fn math_log2(args: &[Value]) -> Result<Value> {
    let number = expect_number(&args[0], "log2")?;
    if number <= 0.0 {
        return Err(domain_error());
    }
    Ok(Value::float(number.log2()))
}

fn math_sin(args: &[Value]) -> Result<Value> {
    Ok(Value::float(expect_number(&args[0], "sin")?.sin()))
}

fn math_cos(args: &[Value]) -> Result<Value> {
    Ok(Value::float(expect_number(&args[0], "cos")?.cos()))
}

fn math_tan(args: &[Value]) -> Result<Value> {
    Ok(Value::float(expect_number(&args[0], "tan")?.tan()))
}

fn math_factorial(args: &[Value]) -> Result<Value> {
    let n = expect_int(&args[0], "factorial")?;
    if n < 0 {
        return Err(value_error("factorial() not defined for negative values"));
    }
    (1..=n)
        .try_fold(1i64, |acc, k| acc.checked_mul(k))
        .map(Value::int)
        .ok_or_else(|| {
            LotusError::from(Diagnostic::new(
                FaultKind::Overflow,
                "integer overflow in factorial()",
            ))
        })
}

fn math_gcd(args: &[Value]) -> Result<Value> {
    let mut a = expect_int(&args[0], "gcd")?.unsigned_abs();
    let mut b = expect_int(&args[1], "gcd")?.unsigned_abs();
    while b != 0 {
        (a, b) = (b, a % b);
    }
    Ok(Value::int(a as i64))
}

fn time_module() -> Value {
    Value::module(
        "time",
        exports(vec![
            ("time", native("time", 0, time_time)),
            ("monotonic", native("monotonic", 0, time_monotonic)),
            ("perf_counter", native("perf_counter", 0, time_monotonic)),
            ("sleep", native("sleep", 1, builtin_sleep)),
            ("strftime", native("strftime", 1, time_strftime)),
        ]),
    )
}

fn time_time(_: &[Value]) -> Result<Value> {
    Ok(Value::float(Utc::now().timestamp_micros() as f64 / 1e6))
}

fn time_monotonic(_: &[Value]) -> Result<Value> {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    Ok(Value::float(origin.elapsed().as_secs_f64()))
}

fn time_strftime(args: &[Value]) -> Result<Value> {
    let format = expect_string(&args[0], "strftime")?;
    let mut rendered = String::new();
    write!(rendered, "{}", Local::now().format(&format))
        .map_err(|_| value_error(format!("invalid format string: {format:?}")))?;
    Ok(Value::string(rendered))
}

fn os_module() -> Value {
    let environ = std::env::vars()
        .map(|(key, value)| (DictKey::Str(key), Value::string(value)))
        .collect();
    Value::module(
        "os",
        exports(vec![
            ("name", Value::string(if cfg!(windows) { "nt" } else { "posix" })),
            ("sep", Value::string(std::path::MAIN_SEPARATOR.to_string())),
            ("environ", Value::dict(environ)),
            ("getcwd", native("getcwd", 0, os_getcwd)),
            ("getenv", native("getenv", usize::MAX, os_getenv)),
            ("listdir", native("listdir", usize::MAX, os_listdir)),
            ("path", os_path_module()),
        ]),
    )
}

fn os_getcwd(_: &[Value]) -> Result<Value> {
    let cwd = std::env::current_dir().map_err(|err| io_error("getcwd", ".", err))?;
    Ok(Value::string(cwd.to_string_lossy()))
}

fn os_getenv(args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "getenv")?;
    let key = expect_string(&args[0], "getenv")?;
    Ok(match std::env::var(&key) {
        Ok(value) => Value::string(value),
        Err(_) => args.get(1).cloned().unwrap_or_else(Value::none),
    })
}

fn os_listdir(args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "listdir")?;
    let path = match args.first() {
        Some(value) => expect_string(value, "listdir")?,
        None => ".".to_string(),
    };
    let entries = fs::read_dir(&path).map_err(|err| io_error("listdir", &path, err))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| io_error("listdir", &path, err))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(Value::list(names.into_iter().map(Value::string).collect()))
}

fn os_path_module() -> Value {
    Value::module(
        "os.path",
        exports(vec![
            ("join", native("join", usize::MAX, path_join)),
            ("exists", native("exists", 1, path_exists)),
            ("isfile", native("isfile", 1, path_isfile)),
            ("isdir", native("isdir", 1, path_isdir)),
            ("basename", native("basename", 1, path_basename)),
            ("dirname", native("dirname", 1, path_dirname)),
            ("splitext", native("splitext", 1, path_splitext)),
        ]),
    )
}

fn path_join(args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, usize::MAX, "join")?;
    let mut joined = PathBuf::new();
    for arg in args {
        joined.push(expect_string(arg, "join")?);
    }
    Ok(Value::string(joined.to_string_lossy()))
}

fn path_exists(args: &[Value]) -> Result<Value> {
    Ok(Value::bool(Path::new(&expect_string(&args[0], "exists")?).exists()))
}

fn path_isfile(args: &[Value]) -> Result<Value> {
    Ok(Value::bool(Path::new(&expect_string(&args[0], "isfile")?).is_file()))
}

fn path_isdir(args: &[Value]) -> Result<Value> {
    Ok(Value::bool(Path::new(&expect_string(&args[0], "isdir")?).is_dir()))
}

fn path_basename(args: &[Value]) -> Result<Value> {
    let path = expect_string(&args[0], "basename")?;
    let start = path.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    Ok(Value::string(&path[start..]))
}

fn path_dirname(args: &[Value]) -> Result<Value> {
    let path = expect_string(&args[0], "dirname")?;
    let end = path.rfind('/').unwrap_or(0);
    let dir = match end {
        0 if path.starts_with('/') => "/",
        _ => path[..end].trim_end_matches('/'),
    };
    Ok(Value::string(dir))
}

fn path_splitext(args: &[Value]) -> Result<Value> {
    let path = expect_string(&args[0], "splitext")?;
    let base_start = path.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    let base = &path[base_start..];
    let split = base
        .rfind('.')
        .filter(|&dot| base[..dot].chars().any(|c| c != '.'))
        .map(|dot| base_start + dot);
    let (root, ext) = match split {
        Some(idx) => path.split_at(idx),
        None => (path.as_str(), ""),
    };
    Ok(Value::tuple(vec![Value::string(root), Value::string(ext)]))
}

fn sys_module() -> Value {
    let stdout = Value::module(
        "sys.stdout",
        exports(vec![("write", native("write", 1, sys_stdout_write))]),
    );
    let stderr = Value::module(
        "sys.stderr",
        exports(vec![("write", native("write", 1, sys_stderr_write))]),
    );
    Value::module(
        "sys",
        exports(vec![
            ("stdout", stdout),
            ("stderr", stderr),
            (
                "version",
                Value::string(format!("lotus {}", env!("CARGO_PKG_VERSION"))),
            ),
            ("platform", Value::string(std::env::consts::OS)),
            ("maxsize", Value::int(i64::MAX)),
            ("argv", Value::list(Vec::new())),
        ]),
    )
}

fn sys_stdout_write(args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "write")?;
    capture::write_stdout(&text);
    Ok(Value::int(text.chars().count() as i64))
}

fn sys_stderr_write(args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "write")?;
    capture::write_stderr(&text);
    Ok(Value::int(text.chars().count() as i64))
}

fn json_module() -> Value {
    Value::module(
        "json",
        exports(vec![
            ("dumps", native("dumps", usize::MAX, json_dumps)),
            ("loads", native("loads", 1, json_loads)),
        ]),
    )
}

/// Writes JSON with `, ` and `: ` separators.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

fn to_json(value: &Value) -> Result<serde_json::Value> {
    use serde_json::Value as Json;
    Ok(match value.kind() {
        ValueKind::None => Json::Null,
        ValueKind::Bool(b) => Json::Bool(*b),
        ValueKind::Int(n) => Json::from(*n),
        ValueKind::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| value_error("Out of range float values are not JSON compliant"))?,
        ValueKind::Str(s) => Json::String(s.clone()),
        ValueKind::List(items) | ValueKind::Tuple(items) => {
            Json::Array(items.iter().map(to_json).collect::<Result<_>>()?)
        }
        ValueKind::Dict(map) => {
            let mut object = serde_json::Map::new();
            for (key, item) in map {
                let key = match key {
                    DictKey::Str(s) => s.clone(),
                    DictKey::Int(n) => n.to_string(),
                    DictKey::Bool(b) => b.to_string(),
                    DictKey::None => "null".to_string(),
                    DictKey::Float(bits) => f64::from_bits(*bits).to_string(),
                    DictKey::Tuple(_) => {
                        return Err(type_error(
                            "keys must be str, int, float, bool or None, not tuple",
                        ))
                    }
                };
                object.insert(key, to_json(item)?);
            }
            Json::Object(object)
        }
        _ => {
            return Err(type_error(format!(
                "Object of type {} is not JSON serializable",
                value.type_name()
            )))
        }
    })
}

fn from_json(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::none(),
        Json::Bool(b) => Value::bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::int(i),
            None => Value::float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::string(s),
        Json::Array(items) => Value::list(items.into_iter().map(from_json).collect()),
        Json::Object(map) => Value::dict(
            map.into_iter()
                .map(|(key, item)| (DictKey::Str(key), from_json(item)))
                .collect(),
        ),
    }
}

fn json_dumps(args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "dumps")?;
    let json = to_json(&args[0])?;
    let indent = match args.get(1) {
        Some(value) if !value.is_none() => {
            Some(repeated_len(1, expect_int(value, "dumps")?, "indent")?)
        }
        _ => None,
    };
    let mut buffer = Vec::new();
    match indent {
        Some(width) => {
            let indent = " ".repeat(width);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
            let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
            json.serialize(&mut serializer)?;
        }
        None => {
            let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, SpacedFormatter);
            json.serialize(&mut serializer)?;
        }
    }
    Ok(Value::string(String::from_utf8_lossy(&buffer)))
}

fn json_loads(args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "loads")?;
    let json: serde_json::Value =
        serde_json::from_str(&text).map_err(|err| value_error(format!("Expecting value: {err}")))?;
    Ok(from_json(json))
}

fn string_module() -> Value {
    const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
    const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    Value::module(
        "string",
        exports(vec![
            ("ascii_lowercase", Value::string(LOWER)),
            ("ascii_uppercase", Value::string(UPPER)),
            ("ascii_letters", Value::string(format!("{LOWER}{UPPER}"))),
            ("digits", Value::string("0123456789")),
            ("hexdigits", Value::string("0123456789abcdefABCDEF")),
            ("octdigits", Value::string("01234567")),
            (
                "punctuation",
                Value::string("!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~"),
            ),
            ("whitespace", Value::string(" \t\n\r\x0b\x0c")),
            ("capwords", native("capwords", 1, string_capwords)),
        ]),
    )
}

fn string_capwords(args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "capwords")?;
    let words: Vec<String> = text
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect();
    Ok(Value::string(words.join(" ")))
}
