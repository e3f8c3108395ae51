use lotus::{
    ast::StmtKind,
    classifier::{classify, CodeKind},
    diagnostics::FaultKind,
};

#[test]
fn trailing_expression_is_split_off() {
    let classified = classify("x = 1\nx + 1").expect("parses");
    assert_eq!(classified.kind, CodeKind::Expression);
    assert_eq!(classified.body.len(), 1);
    assert!(classified.trailing.is_some());
}

#[test]
fn statements_classify_as_statement() {
    let classified = classify("x = 5").expect("parses");
    assert_eq!(classified.kind, CodeKind::Statement);
    assert!(classified.trailing.is_none());
    assert_eq!(classified.body.len(), 1);
}

#[test]
fn compound_statement_last_is_a_statement() {
    let classified = classify("for i in range(3):\n    i").expect("parses");
    assert_eq!(classified.kind, CodeKind::Statement);
}

#[test]
fn empty_code_is_an_empty_statement() {
    for source in ["", "   \n\n", "# only a comment\n"] {
        let classified = classify(source).expect("parses");
        assert_eq!(classified.kind, CodeKind::Statement);
        assert!(classified.body.is_empty());
        assert!(classified.preamble.is_empty());
    }
}

#[test]
fn leading_imports_form_the_preamble() {
    let classified = classify("import math\nfrom os import sep\nx = 1\nimport json\njson").expect("parses");
    assert_eq!(classified.preamble.len(), 2);
    assert!(classified.preamble.iter().all(|stmt| stmt.is_import()));
    assert_eq!(classified.body.len(), 2);
    assert!(matches!(classified.body[1].kind, StmtKind::Import(_)));
    assert_eq!(classified.kind, CodeKind::Expression);
    assert_eq!(classified.body_text, "x = 1\nimport json\njson");
}

#[test]
fn only_imports_is_a_statement() {
    let classified = classify("import math").expect("parses");
    assert_eq!(classified.preamble.len(), 1);
    assert!(classified.body.is_empty());
    assert_eq!(classified.kind, CodeKind::Statement);
}

#[test]
fn semicolon_joined_line_ends_in_expression() {
    let classified = classify("print('hi'); 'hi'").expect("parses");
    assert_eq!(classified.kind, CodeKind::Expression);
    assert_eq!(classified.body.len(), 1);
}

#[test]
fn syntax_errors_carry_the_line() {
    let diag = classify("x = 1\nif x\n    pass").expect_err("should not parse");
    assert_eq!(diag.kind, FaultKind::Syntax);
    assert_eq!(diag.span.map(|span| span.line), Some(2));
}

#[test]
fn unterminated_string_is_a_syntax_error() {
    let diag = classify("'abc").expect_err("should not parse");
    assert_eq!(diag.kind, FaultKind::Syntax);
    assert_eq!(diag.message, "unterminated string literal");
}

#[test]
fn import_spans_cover_every_name_and_alias() {
    for source in ["import math as m, os", "import os.path, json as j"] {
        let classified = classify(source).expect("parses");
        let span = classified.preamble[0].span;
        assert_eq!(&source[span.start..span.end], source);
    }
}
