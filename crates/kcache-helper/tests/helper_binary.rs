//! End-to-end tests of the `kcache-helper` binary, driven the way the parent
//! process drives it.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use kcache::compile::{CompileError, SubprocessCompiler};
use tempfile::TempDir;

const HELPER: &str = env!("CARGO_BIN_EXE_kcache-helper");

/// Write a compiler config whose "compiler" is a shell script.
fn compiler_config(dir: &TempDir, script_body: &str) -> PathBuf {
    let script = dir.path().join("fake-cc");
    fs::write(&script, format!("#!/bin/sh\n{}\n", script_body)).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let config = dir.path().join("helper.toml");
    fs::write(
        &config,
        format!(
            "program = \"{}\"\nargs = [\"{{arch}}\", \"{{src}}\", \"{{out}}\"]\n",
            script.display()
        ),
    )
    .unwrap();
    config
}

fn run_helper(args: &[&str], config: Option<&Path>, input: &[u8]) -> (Option<i32>, Vec<u8>) {
    use std::io::Write;

    let mut command = Command::new(HELPER);
    command
        .args(args)
        .env_remove("KCACHE_HELPER_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    if let Some(config) = config {
        command.env("KCACHE_HELPER_CONFIG", config);
    }
    let mut child = command.spawn().unwrap();
    child.stdin.take().unwrap().write_all(input).unwrap();
    let output = child.wait_with_output().unwrap();
    (output.status.code(), output.stdout)
}

#[test]
fn test_helper_compiles_stdin() {
    let dir = TempDir::new().unwrap();
    let config = compiler_config(&dir, "printf '%s:' \"$1\" > \"$3\"; cat \"$2\" >> \"$3\"");

    let (code, stdout) = run_helper(&["gfx90a"], Some(&config), b"kernel body");
    assert_eq!(code, Some(0));
    assert_eq!(stdout, b"gfx90a:kernel body".to_vec());
}

#[test]
fn test_helper_reports_compiler_error_on_stdout() {
    let dir = TempDir::new().unwrap();
    let config = compiler_config(&dir, "echo 'syntax error' >&2; exit 1");

    let (code, stdout) = run_helper(&["gfx900"], Some(&config), b"broken");
    assert_eq!(code, Some(1));
    assert!(String::from_utf8_lossy(&stdout).contains("syntax error"));
}

#[test]
fn test_helper_without_config_fails() {
    let (code, stdout) = run_helper(&["gfx900"], None, b"src");
    assert_eq!(code, Some(1));
    assert!(String::from_utf8_lossy(&stdout).contains("KCACHE_HELPER_CONFIG"));
}

#[test]
fn test_helper_usage() {
    let (code, stdout) = run_helper(&[], None, b"");
    assert_eq!(code, Some(2));
    assert!(stdout.is_empty());

    let (code, _) = run_helper(&["gfx900", "extra"], None, b"");
    assert_eq!(code, Some(2));
}

#[test]
fn test_subprocess_compiler_drives_helper() {
    let good = TempDir::new().unwrap();
    let good_config = compiler_config(&good, "cat \"$2\" > \"$3\"");
    let bad = TempDir::new().unwrap();
    let bad_config = compiler_config(&bad, "echo 'undefined symbol' >&2; exit 1");

    let compiler = SubprocessCompiler::with_helper(HELPER);

    // The parent passes KCACHE_* variables through to the helper. This is the
    // only test in this file that reads the config from the process
    // environment.
    std::env::set_var("KCACHE_HELPER_CONFIG", &good_config);
    let source: String = (0..20_000).map(|i| format!("// line {}\n", i)).collect();
    let code = compiler.compile(&source, "gfx1100").unwrap();
    assert_eq!(code, source.as_bytes());

    std::env::set_var("KCACHE_HELPER_CONFIG", &bad_config);
    match compiler.compile("broken", "gfx1100") {
        Err(CompileError::ChildFailed { status, message }) => {
            assert_eq!(status.code(), Some(1));
            assert!(message.contains("undefined symbol"));
        }
        other => panic!("expected helper failure, got {:?}", other),
    }
    std::env::remove_var("KCACHE_HELPER_CONFIG");
}
