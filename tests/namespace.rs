use std::rc::Rc;

use lotus::{
    diagnostics::SourceText,
    namespace::Namespace,
    runtime::{Interpreter, DEFAULT_MAX_CALL_DEPTH, SUBMITTED_FILE},
};

fn bind(namespace: &Namespace, source: &str) {
    let mut interpreter = Interpreter::with_globals(
        namespace.globals(),
        Rc::new(SourceText::new(SUBMITTED_FILE, source)),
        DEFAULT_MAX_CALL_DEPTH,
    );
    interpreter.eval_source(source).expect("source runs");
}

#[test]
fn builtins_are_not_session_names() {
    let namespace = Namespace::new();
    assert!(!namespace.contains("print"));
    assert_eq!(namespace.filter_preamble("import math"), "import math");
}

#[test]
fn bound_imports_are_dropped() {
    let namespace = Namespace::new();
    bind(&namespace, "import math\nfrom os import sep as separator");
    assert!(namespace.contains("math"));
    assert!(namespace.contains("separator"));

    assert_eq!(namespace.filter_preamble("import math, json"), "import json");
    assert_eq!(
        namespace.filter_preamble("from os import sep as separator, getcwd"),
        "from os import getcwd"
    );
    assert_eq!(namespace.filter_preamble("from os import sep as separator"), "");
}

#[test]
fn non_import_lines_are_kept_verbatim() {
    let namespace = Namespace::new();
    bind(&namespace, "import math");
    assert_eq!(
        namespace.filter_preamble("import math\nlimit = 10\nimport json"),
        "limit = 10\nimport json"
    );
}

#[test]
fn unparseable_preamble_comes_back_unchanged() {
    let namespace = Namespace::new();
    assert_eq!(namespace.filter_preamble("import"), "import");
}

#[test]
fn reset_clears_bindings_and_bumps_generation() {
    let mut namespace = Namespace::new();
    bind(&namespace, "import math");
    assert_eq!(namespace.generation(), 0);

    namespace.reset();
    assert_eq!(namespace.generation(), 1);
    assert!(!namespace.contains("math"));
    assert_eq!(namespace.filter_preamble("import math"), "import math");
}
