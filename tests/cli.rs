use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn lotus_run_quickstart() {
    let mut cmd = Command::cargo_bin("lotus").expect("binary exists");
    cmd.arg("run").arg("demos/quickstart.lotus");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Hello from Lotus!"))
        .stdout(predicate::str::contains("squares: [0, 1, 4, 9, 16]"))
        .stdout(predicate::str::contains("circle area: 12.57"));
}

#[test]
fn lotus_eval_snippet() {
    let mut cmd = Command::cargo_bin("lotus").expect("binary exists");
    cmd.arg("eval").arg("1 + 2 + 3");
    cmd.assert().success().stdout(predicate::str::diff("6\n"));
}

#[test]
fn lotus_eval_json_output() {
    let mut cmd = Command::cargo_bin("lotus").expect("binary exists");
    cmd.args(["eval", "--json", "--imports", "import math", "math.floor(2.5)"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"expression\""))
        .stdout(predicate::str::contains("\"value_repr\": \"2\""))
        .stdout(predicate::str::contains("\"code\": \"import math\\nmath.floor(2.5)\""));
}

#[test]
fn lotus_run_reports_faults_with_failure_status() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("broken.lotus");
    fs::write(&script, "print('partial')\ndef f():\n    return missing\nf()\n").expect("write script");

    let mut cmd = Command::cargo_bin("lotus").expect("binary exists");
    cmd.arg("run").arg(&script);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("partial"))
        .stderr(predicate::str::contains("NameError: name 'missing' is not defined"))
        .stderr(predicate::str::contains("in f"));
}

#[test]
fn lotus_eval_honours_timeout_flag() {
    let mut cmd = Command::cargo_bin("lotus").expect("binary exists");
    cmd.args(["--timeout-ms", "100", "eval", "sleep(3)"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("TimeoutError"));
}

#[test]
fn lotus_reads_toml_config() {
    let dir = tempdir().expect("create temp dir");
    let config = dir.path().join("lotus.toml");
    fs::write(&config, "display = \"always_echo\"\n").expect("write config");

    let mut cmd = Command::cargo_bin("lotus").expect("binary exists");
    cmd.arg("--config")
        .arg(&config)
        .args(["eval", "print('x'); 5"]);
    cmd.assert().success().stdout(predicate::str::diff("x\n5\n"));
}
