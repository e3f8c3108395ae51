use lotus::{
    capture::with_capture,
    diagnostics::{FaultKind, LotusError},
    runtime::{Interpreter, SUBMITTED_FILE},
    value::{Value, ValueKind},
};

const STACK_SIZE: usize = 32 * 1024 * 1024;

/// Runs `f` on a thread with a large stack, like a session worker.
fn on_big_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(STACK_SIZE)
        .spawn(f)
        .expect("spawn interpreter thread")
        .join()
        .expect("interpreter thread panicked")
}

fn eval_repr(source: &str) -> String {
    let source = source.to_string();
    on_big_stack(move || {
        let mut interpreter = Interpreter::new();
        interpreter
            .eval_source(&source)
            .map(|value| value.repr())
            .unwrap_or_else(|err| panic!("evaluation failed: {err}"))
    })
}

fn eval_output(source: &str) -> String {
    let source = source.to_string();
    on_big_stack(move || {
        let mut interpreter = Interpreter::new();
        let (result, stdout, _) = with_capture(|| interpreter.eval_source(&source).map(|_| ()));
        if let Err(err) = result {
            panic!("evaluation failed: {err}");
        }
        stdout
    })
}

fn eval_fault(source: &str) -> (FaultKind, String, Vec<(String, usize, String)>) {
    let source = source.to_string();
    on_big_stack(move || {
        let mut interpreter = Interpreter::new();
        match interpreter.eval_source(&source) {
            Ok(value) => panic!("expected fault, received value {}", value.repr()),
            Err(LotusError::Diagnostic(diag)) => (
                diag.kind,
                diag.message,
                diag.frames
                    .into_iter()
                    .map(|frame| (frame.file, frame.line, frame.function))
                    .collect(),
            ),
            Err(other) => panic!("expected script fault, received {other}"),
        }
    })
}

fn expect_int(value: &Value) -> i64 {
    match value.kind() {
        ValueKind::Int(n) => *n,
        _ => panic!("expected int, found {}", value.type_name()),
    }
}

#[test]
fn evaluates_basic_arithmetic() {
    assert_eq!(eval_repr("2 + 2"), "4");
    assert_eq!(eval_repr("7 / 2"), "3.5");
    assert_eq!(eval_repr("4 / 2"), "2.0");
    assert_eq!(eval_repr("2 ** 10"), "1024");
    assert_eq!(eval_repr("2 ** -1"), "0.5");
    assert_eq!(eval_repr("1 + 2.5"), "3.5");
}

#[test]
fn floor_division_and_modulo_round_toward_negative_infinity() {
    assert_eq!(eval_repr("-7 // 2"), "-4");
    assert_eq!(eval_repr("-7 % 3"), "2");
    assert_eq!(eval_repr("7 % -3"), "-2");
    assert_eq!(eval_repr("7.5 // 2"), "3.0");
}

#[test]
fn power_is_right_associative_and_binds_tighter_than_unary_minus() {
    assert_eq!(eval_repr("2 ** 3 ** 2"), "512");
    assert_eq!(eval_repr("-2 ** 2"), "-4");
}

#[test]
fn boolean_operators_return_operands() {
    assert_eq!(eval_repr("0 or 'fallback'"), "'fallback'");
    assert_eq!(eval_repr("[] and 1"), "[]");
    assert_eq!(eval_repr("not None"), "True");
    assert_eq!(eval_repr("1 < 2 and 'a' in 'abc'"), "True");
    assert_eq!(eval_repr("3 not in [1, 2]"), "True");
}

#[test]
fn short_circuit_skips_right_operand() {
    assert_eq!(eval_repr("False and undefined_name"), "False");
    assert_eq!(eval_repr("True or 1 / 0"), "True");
}

#[test]
fn renders_values_like_python() {
    assert_eq!(eval_repr("'hi'"), "'hi'");
    assert_eq!(eval_repr("\"it's\""), "\"it's\"");
    assert_eq!(eval_repr("[1, 'a', None, True]"), "[1, 'a', None, True]");
    assert_eq!(eval_repr("(1,)"), "(1,)");
    assert_eq!(eval_repr("{'k': 1}"), "{'k': 1}");
    assert_eq!(eval_repr("str('hi')"), "'hi'");
}

#[test]
fn statements_share_state_within_a_source() {
    let source = r#"
total = 0
for n in range(1, 5):
    if n == 3:
        continue
    total += n
total
"#;
    assert_eq!(eval_repr(source), "7");
}

#[test]
fn while_loops_and_break() {
    let source = r#"
count = 0
while True:
    count += 1
    if count >= 10:
        break
count
"#;
    assert_eq!(eval_repr(source), "10");
}

#[test]
fn elif_chains_pick_first_true_branch() {
    let source = r#"
def bucket(n):
    if n < 0:
        return "negative"
    elif n == 0:
        return "zero"
    else:
        return "positive"
[bucket(-1), bucket(0), bucket(5)]
"#;
    assert_eq!(eval_repr(source), "['negative', 'zero', 'positive']");
}

#[test]
fn functions_close_over_defining_scope() {
    let source = r#"
def make_adder(n):
    def add(x):
        return x + n
    return add
add_two = make_adder(2)
add_two(40)
"#;
    assert_eq!(eval_repr(source), "42");
}

#[test]
fn assignment_inside_function_is_local() {
    let source = r#"
x = 1
def shadow():
    x = 99
    return x
shadow()
x
"#;
    assert_eq!(eval_repr(source), "1");
}

#[test]
fn recursion_works_within_depth_limit() {
    let source = r#"
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
fib(15)
"#;
    assert_eq!(eval_repr(source), "610");
}

#[test]
fn tuple_unpacking_and_swaps() {
    assert_eq!(eval_repr("a, b = 1, 2\na, b = b, a\n(a, b)"), "(2, 1)");
    assert_eq!(
        eval_repr("pairs = []\nfor i, c in enumerate('ab'):\n    pairs.append(f'{i}{c}')\npairs"),
        "['0a', '1b']"
    );
}

#[test]
fn list_methods_mutate_the_binding() {
    let source = r#"
items = [3, 1]
items.append(2)
items.extend([5, 4])
last = items.pop()
items.sort()
(items, last)
"#;
    assert_eq!(eval_repr(source), "([1, 2, 3, 5], 4)");
}

#[test]
fn index_assignment_updates_nested_containers() {
    let source = r#"
grid = {'row': [0, 0, 0]}
grid['row'][1] = 7
grid['row'][-1] += 2
grid
"#;
    assert_eq!(eval_repr(source), "{'row': [0, 7, 2]}");
}

#[test]
fn string_methods() {
    assert_eq!(eval_repr("'  Hi There '.strip().lower()"), "'hi there'");
    assert_eq!(eval_repr("'a,b,c'.split(',')"), "['a', 'b', 'c']");
    assert_eq!(eval_repr("'-'.join(['x', 'y'])"), "'x-y'");
    assert_eq!(eval_repr("'lotus'.startswith('lo')"), "True");
    assert_eq!(eval_repr("'ab' * 3"), "'ababab'");
}

#[test]
fn dict_methods() {
    let source = r#"
d = {'a': 1, 'b': 2}
(list(d.keys()), list(d.values()), d.get('c', 0), len(d.items()))
"#;
    assert_eq!(eval_repr(source), "(['a', 'b'], [1, 2], 0, 2)");
}

#[test]
fn builtins_cover_common_needs() {
    assert_eq!(eval_repr("len([1, 2, 3])"), "3");
    assert_eq!(eval_repr("sum(range(5))"), "10");
    assert_eq!(eval_repr("sorted([3, 1, 2])"), "[1, 2, 3]");
    assert_eq!(eval_repr("max(4, 9, 2)"), "9");
    assert_eq!(eval_repr("abs(-3)"), "3");
    assert_eq!(eval_repr("round(2.5)"), "2");
    assert_eq!(eval_repr("int('42') + 1"), "43");
    assert_eq!(eval_repr("type(1.5)"), "<class 'float'>");
}

#[test]
fn fstrings_support_format_specs_and_conversions() {
    assert_eq!(eval_repr("x = 3.14159\nf'{x:.2f}'"), "'3.14'");
    assert_eq!(eval_repr("name = 'a'\nf'{name!r} {{braces}}'"), "\"'a' {braces}\"");
    assert_eq!(eval_repr("f'{1234567:,}'"), "'1,234,567'");
}

#[test]
fn print_writes_to_captured_stdout() {
    let stdout = eval_output("print('hello', 42)\nprint()");
    assert_eq!(stdout, "hello 42\n\n");
}

#[test]
fn modules_import_and_resolve_attributes() {
    assert_eq!(eval_repr("import math\nmath.sqrt(16)"), "4.0");
    assert_eq!(eval_repr("from math import floor as fl\nfl(2.7)"), "2");
    assert_eq!(eval_repr("import os.path\nos.path.basename('/tmp/a.txt')"), "'a.txt'");
    assert_eq!(eval_repr("import json\njson.loads('[1, 2]')"), "[1, 2]");
    assert_eq!(
        eval_repr("import json\njson.dumps({'a': [1, None]})"),
        "'{\"a\": [1, null]}'"
    );
}

#[test]
fn sys_streams_are_captured() {
    let stdout = eval_output("import sys\nsys.stdout.write('raw')");
    assert_eq!(stdout, "raw");
}

#[test]
fn returns_value_of_trailing_expression_only() {
    let value = on_big_stack(|| {
        let mut interpreter = Interpreter::new();
        expect_int(&interpreter.eval_source("x = 5\nx * 2").expect("evaluates"))
    });
    assert_eq!(value, 10);
    assert_eq!(eval_repr("x = 5"), "None");
}

#[test]
fn reports_python_fault_kinds() {
    let cases = [
        ("missing", FaultKind::Name, "name 'missing' is not defined"),
        ("1 / 0", FaultKind::ZeroDivision, "division by zero"),
        ("[1][5]", FaultKind::Index, "list index out of range"),
        ("{'a': 1}['b']", FaultKind::Key, "'b'"),
        ("1 + 'a'", FaultKind::Type, "unsupported operand type(s) for +: 'int' and 'str'"),
        ("'a' + 1", FaultKind::Type, "can only concatenate str (not \"int\") to str"),
        ("int('x')", FaultKind::Value, "invalid literal for int() with base 10: 'x'"),
        ("import nope", FaultKind::ModuleNotFound, "No module named 'nope'"),
        ("from math import nope", FaultKind::Import, "cannot import name 'nope' from 'math'"),
        ("import math\nmath.nope", FaultKind::Attribute, "module 'math' has no attribute 'nope'"),
        ("assert 1 == 2, 'math is broken'", FaultKind::Assertion, "math is broken"),
        ("5()", FaultKind::Type, "'int' object is not callable"),
    ];
    for (source, kind, message) in cases {
        let (actual_kind, actual_message, _) = eval_fault(source);
        assert_eq!(actual_kind, kind, "kind for {source:?}");
        assert_eq!(actual_message, message, "message for {source:?}");
    }
}

#[test]
fn integer_overflow_is_reported() {
    let (kind, _, _) = eval_fault("9223372036854775807 + 1");
    assert_eq!(kind, FaultKind::Overflow);
}

#[test]
fn unbounded_recursion_raises_recursion_error() {
    let (kind, message, _) = eval_fault("def f(n):\n    return f(n + 1)\nf(0)");
    assert_eq!(kind, FaultKind::Recursion);
    assert_eq!(message, "maximum recursion depth exceeded");
}

#[test]
fn wrong_argument_count_is_a_type_error() {
    let (kind, message, _) = eval_fault("def f(a, b):\n    return a\nf(1)");
    assert_eq!(kind, FaultKind::Type);
    assert_eq!(message, "f() missing 1 required positional argument: 'b'");
}

#[test]
fn syntax_faults_are_reported_before_running() {
    let (kind, _, frames) = eval_fault("print('side effect')\nx = = 1");
    assert_eq!(kind, FaultKind::Syntax);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1, 2);
    assert_eq!(eval_fault("return 1").0, FaultKind::Syntax);
    assert_eq!(eval_fault("break").0, FaultKind::Syntax);
    assert_eq!(eval_fault("def f():\nreturn 1").0, FaultKind::Syntax);
}

#[test]
fn tracebacks_list_script_frames_outermost_first() {
    let source = "def inner():\n    return 1 / 0\ndef outer():\n    return inner()\nouter()";
    let (kind, _, frames) = eval_fault(source);
    assert_eq!(kind, FaultKind::ZeroDivision);
    let script: Vec<_> = frames
        .iter()
        .filter(|(file, _, _)| file == SUBMITTED_FILE)
        .map(|(_, line, function)| (*line, function.as_str()))
        .collect();
    assert_eq!(script, vec![(5, "<module>"), (4, "outer"), (2, "inner")]);
}
