use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use lotus::{
    config::{DisplayPolicy, ShellConfig},
    result::{Outcome, ShellResult},
    session::{Session, SessionPool},
    LotusError,
};
use tempfile::tempdir;

fn session() -> Session {
    Session::new(ShellConfig::default()).expect("session starts")
}

async fn run(session: &Session, code: &str) -> ShellResult {
    session
        .execute(code, None, None)
        .await
        .expect("session accepts code")
}

fn error_kind(result: &ShellResult) -> &str {
    match &result.outcome {
        Outcome::Error(info) => &info.error_kind,
        other => panic!("expected error result, got {other:?}"),
    }
}

#[tokio::test]
async fn bindings_persist_across_calls() {
    let session = session();
    let first = run(&session, "x = 1").await;
    assert_eq!(first.outcome, Outcome::Statement);
    let second = run(&session, "x").await;
    assert_eq!(second.value_repr(), Some("1"));
    assert_eq!(second.value_type(), Some("int"));
}

#[tokio::test]
async fn reset_forgets_bindings_and_history() {
    let session = session();
    run(&session, "x = 1").await;
    session.reset().await.expect("reset succeeds");
    assert_eq!(session.history_len(), 0);
    assert_eq!(session.generation(), 1);
    let result = run(&session, "x").await;
    assert_eq!(error_kind(&result), "NameError");
}

#[tokio::test]
async fn expressions_and_statements_are_distinguished() {
    let session = session();
    let expression = run(&session, "2 + 2").await;
    assert_eq!(expression.value_repr(), Some("4"));
    let statement = run(&session, "x = 5").await;
    assert_eq!(statement.outcome, Outcome::Statement);
    assert_eq!(statement.render(), "OK");
}

#[tokio::test]
async fn printed_output_suppresses_the_echoed_value() {
    let session = session();
    let result = run(&session, "print('hi'); 'hi'").await;
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.value_repr(), Some(""));
    assert_eq!(result.value_type(), Some("str"));
}

#[tokio::test]
async fn always_echo_reports_the_value_anyway() {
    let config = ShellConfig {
        display: DisplayPolicy::AlwaysEcho,
        ..ShellConfig::default()
    };
    let session = Session::new(config).expect("session starts");
    let result = run(&session, "print('hi'); 'hi'").await;
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.value_repr(), Some("'hi'"));
}

#[tokio::test]
async fn stderr_is_captured_separately() {
    let session = session();
    let result = run(&session, "import sys\nsys.stderr.write('oops')").await;
    assert_eq!(result.stderr, "oops");
    assert_eq!(result.stdout, "");
}

#[tokio::test]
async fn already_bound_imports_are_filtered_from_the_preamble() {
    let session = session();
    let first = session
        .execute("y = 1", Some("import os"), None)
        .await
        .expect("runs");
    assert_eq!(first.code, "import os\ny = 1");
    let second = session
        .execute("y = 1", Some("import os"), None)
        .await
        .expect("runs");
    assert_eq!(second.code, "y = 1");
    assert_eq!(run(&session, "y").await.value_repr(), Some("1"));
}

#[tokio::test]
async fn from_imports_keep_only_unbound_names() {
    let session = session();
    run(&session, "from math import sqrt").await;
    let result = session
        .execute("floor(sqrt(10))", Some("from math import sqrt, floor"), None)
        .await
        .expect("runs");
    assert_eq!(result.code, "from math import floor\nfloor(sqrt(10))");
    assert_eq!(result.value_repr(), Some("3"));
}

#[tokio::test]
async fn timeout_returns_promptly_with_partial_output() {
    let session = session();
    let started = Instant::now();
    let result = session
        .execute(
            "print('started'); sleep(2)",
            None,
            Some(Duration::from_millis(200)),
        )
        .await
        .expect("runs");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(error_kind(&result), "TimeoutError");
    assert_eq!(result.stdout, "started\n");
    assert_eq!(session.history_len(), 1);
}

#[tokio::test]
async fn next_call_waits_for_timed_out_work() {
    let session = session();
    let result = session
        .execute("sleep(0.5)\ndone = True", None, Some(Duration::from_millis(50)))
        .await
        .expect("runs");
    assert_eq!(error_kind(&result), "TimeoutError");

    let after = run(&session, "done").await;
    assert_eq!(after.value_repr(), Some("True"));
    // The abandoned job's own result is discarded.
    assert_eq!(session.history_len(), 2);
}

#[tokio::test]
async fn default_timeout_comes_from_config() {
    let config = ShellConfig {
        timeout_ms: Some(50),
        ..ShellConfig::default()
    };
    let session = Session::new(config).expect("session starts");
    let result = run(&session, "sleep(1)").await;
    assert_eq!(error_kind(&result), "TimeoutError");
    assert!(result
        .error()
        .map(|info| info.error_message.contains("50ms"))
        .unwrap_or(false));
}

#[tokio::test]
async fn concurrent_calls_never_interleave() {
    let session = Arc::new(session());
    run(&session, "counter = 0").await;
    let mut handles = Vec::new();
    for _ in 0..10 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            session
                .execute("current = counter\nsleep(0.01)\ncounter = current + 1", None, None)
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("task joins").expect("runs");
    }
    assert_eq!(run(&session, "counter").await.value_repr(), Some("10"));
}

#[tokio::test]
async fn deep_faults_report_only_script_frames() {
    let session = session();
    let code = "def a():\n    return b()\ndef b():\n    return c()\ndef c():\n    return 1 / 0\na()";
    let result = run(&session, code).await;
    let info = result.error().expect("error result");
    assert_eq!(info.error_kind, "ZeroDivisionError");
    assert_eq!(info.error_message, "division by zero");
    let functions: Vec<&str> = info.frames.iter().map(|frame| frame.function.as_str()).collect();
    assert_eq!(functions, vec!["<module>", "a", "b", "c"]);
    assert!(info.frames.iter().all(|frame| frame.file == "<input>"));
    assert!(info.frames.iter().all(|frame| !frame.file.ends_with(".rs")));
    assert_eq!(info.frames[3].source, "return 1 / 0");
}

#[tokio::test]
async fn faults_keep_earlier_effects_and_output() {
    let session = session();
    let result = run(&session, "z = 3\nprint('before')\nmissing()").await;
    assert_eq!(error_kind(&result), "NameError");
    assert_eq!(result.stdout, "before\n");
    assert_eq!(run(&session, "z").await.value_repr(), Some("3"));
}

#[tokio::test]
async fn syntax_errors_leave_the_namespace_untouched() {
    let session = session();
    let result = run(&session, "w = 1\nw = = 2").await;
    let info = result.error().expect("error result");
    assert_eq!(info.error_kind, "SyntaxError");
    assert_eq!(info.frames.len(), 1);
    assert_eq!(info.frames[0].line, 2);
    assert_eq!(error_kind(&run(&session, "w").await), "NameError");
}

#[tokio::test]
async fn recursion_and_missing_modules_are_reported() {
    let session = session();
    let recursion = run(&session, "def f(n):\n    return f(n + 1)\nf(0)").await;
    assert_eq!(error_kind(&recursion), "RecursionError");
    let missing = run(&session, "import not_a_module").await;
    assert_eq!(error_kind(&missing), "ModuleNotFoundError");
}

#[tokio::test]
async fn history_keeps_results_in_order() {
    let session = session();
    run(&session, "a = 1").await;
    run(&session, "a + 1").await;
    run(&session, "1 / 0").await;
    let kinds: Vec<&str> = session.history().iter().map(ShellResult::kind).collect::<Vec<_>>();
    assert_eq!(kinds, vec!["statement", "expression", "error"]);
    assert_eq!(
        session.last_result().and_then(|r| r.error().map(|e| e.error_kind.clone())),
        Some("ZeroDivisionError".to_string())
    );
    session.clear_history();
    assert_eq!(session.history_len(), 0);
    assert_eq!(run(&session, "a").await.value_repr(), Some("1"));
}

#[tokio::test]
async fn export_renders_a_replayable_script() {
    let session = session();
    assert_eq!(session.export_history(false), "# No history to export\n");

    run(&session, "import math\nr = 2").await;
    run(&session, "1 / 0").await;
    run(&session, "from json import dumps\nmath.pi * r").await;

    let script = session.export_history(false);
    assert!(script.starts_with("# Lotus Shell Session Export\n# Generated: "));
    assert!(script.contains("\nfrom json import dumps\nimport math\n"));
    assert!(script.contains("# Step 1\nimport math\nr = 2\n"));
    assert!(!script.contains("# Step 2"));
    assert!(script.contains("# Step 3\n"));
    assert!(session.export_history(true).contains("# Step 2\n1 / 0\n"));
}

#[tokio::test]
async fn export_to_file_appends_extension_and_rejects_absolute_paths() {
    let session = session();
    run(&session, "x = 1").await;
    let dir = tempdir().expect("create temp dir");

    let message = session
        .export_history_to(dir.path(), "replay", false)
        .expect("export succeeds");
    assert!(message.starts_with("Exported "));
    assert!(message.contains("replay.lotus"));
    let written = std::fs::read_to_string(dir.path().join("replay.lotus")).expect("file written");
    assert!(written.contains("x = 1"));

    let absolute = dir.path().join("abs").to_string_lossy().to_string();
    let err = session
        .export_history_to(dir.path(), &absolute, false)
        .expect_err("absolute path rejected");
    assert!(matches!(err, LotusError::AbsoluteExportPath(_)));
}

#[tokio::test]
async fn results_serialize_with_a_kind_tag() {
    let session = session();
    let result = run(&session, "1 + 1").await;
    let json: serde_json::Value =
        serde_json::from_str(&result.to_json().expect("serializes")).expect("valid json");
    assert_eq!(json["kind"], "expression");
    assert_eq!(json["value_repr"], "2");
    assert_eq!(json["value_type"], "int");
    assert_eq!(json["code"], "1 + 1");
    assert!(json["timestamp"].as_str().is_some());

    let failure = run(&session, "nope").await;
    let json: serde_json::Value =
        serde_json::from_str(&failure.to_json().expect("serializes")).expect("valid json");
    assert_eq!(json["kind"], "error");
    assert_eq!(json["error_kind"], "NameError");
    assert_eq!(json["frames"][0]["function"], "<module>");
}

#[tokio::test]
async fn error_render_includes_traceback() {
    let session = session();
    let result = run(&session, "def f():\n    return 1 / 0\nf()").await;
    let rendered = result.render();
    assert!(rendered.starts_with("ZeroDivisionError: division by zero\n\nTraceback:"));
    assert!(rendered.contains("  File \"<input>\", line 2, in f\n    return 1 / 0"));
}

#[tokio::test]
async fn pool_hands_out_one_session_per_client() {
    let pool = SessionPool::new(ShellConfig::default());
    let alice = pool.session("alice").expect("session");
    let bob = pool.session("bob").expect("session");
    alice.execute("v = 'a'", None, None).await.expect("runs");
    bob.execute("v = 'b'", None, None).await.expect("runs");

    let again = pool.session("alice").expect("session");
    assert_eq!(run(&again, "v").await.value_repr(), Some("'a'"));

    pool.reset("alice").await.expect("reset");
    assert_eq!(error_kind(&run(&alice, "v").await), "NameError");
    assert_eq!(run(&bob, "v").await.value_repr(), Some("'b'"));

    assert!(pool.remove("bob"));
    assert_eq!(pool.len(), 1);
}

#[tokio::test]
async fn oversized_sleep_and_repetition_fail_without_losing_the_session() {
    let session = session();
    let sleep = run(&session, "sleep(1e20)").await;
    assert_eq!(error_kind(&sleep), "OverflowError");
    assert_eq!(session.history_len(), 1);

    let text = run(&session, "'abcd' * (2 ** 62)").await;
    assert_eq!(error_kind(&text), "OverflowError");
    let items = run(&session, "[1] * (2 ** 62)").await;
    assert_eq!(error_kind(&items), "OverflowError");
    let width = run(&session, "f'{1:99999999999}'").await;
    assert_eq!(error_kind(&width), "ValueError");
    assert_eq!(session.history_len(), 4);

    assert_eq!(run(&session, "1 + 1").await.value_repr(), Some("2"));
    assert_eq!(run(&session, "[] * (2 ** 62)").await.value_repr(), Some("[]"));
    assert_eq!(run(&session, "'ab' * -3").await.value_repr(), Some("''"));
}
