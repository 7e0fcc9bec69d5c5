//! Run the `cmdscript` binary on small scripts and rc files.

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn binary() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_cmdscript"))
}

/// Run the binary with `args`, feeding `stdin`, with no rc file search.
fn run(args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(binary())
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn cmdscript");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn inline_script_with_builtins_succeeds() {
    let out = run(&["-f", "-c", "(if true) (if eq a b)"], "");
    assert!(out.status.success(), "{}", stderr(&out));
}

#[test]
fn unknown_command_fails() {
    let out = run(&["-f", "-c(window Main)"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("window"), "{}", stderr(&out));
}

#[test]
fn unclosed_bracket_fails() {
    let out = run(&["-f", "-"], "(if true");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("if"), "{}", stderr(&out));
}

#[test]
fn script_file_and_rc() {
    let dir = tempfile::tempdir().unwrap();
    let rc = dir.path().join("rc");
    std::fs::write(&rc, "; test rc\n/set mode=fast\n/bogus\n").unwrap();
    let script = dir.path().join("ui.cs");
    std::fs::write(&script, "(if defined mode (if true) (nope))\n").unwrap();

    let rc_arg = format!("-f{}", rc.display());
    let out = run(&[&rc_arg, script.to_str().unwrap()], "");
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stderr(&out).contains("unknown directive /bogus"));
}

#[test]
fn missing_script_file_fails() {
    let out = run(&["-f", "/nonexistent/script.cs"], "");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn bad_option_prints_usage() {
    let out = run(&["-z"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Usage:"));
}
