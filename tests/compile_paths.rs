//! Compile arbitration against real helper processes.
//!
//! Helpers are small shell scripts, so these tests only run on unix.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kcache::config::env;
use kcache::{
    Cache, CacheKey, CacheSettings, CompileError, CompileMode, CompileOrchestrator, CompilePath,
    CompileResult, GeneratorSignature, PersistentStore, SignatureBuilder, SubprocessCompiler,
    TierManager,
};
use tempfile::TempDir;

fn helper_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// In-process backend that returns the source unchanged, like the `cat`
/// helper does.
fn identity(source: &str, _arch: &str) -> CompileResult<Vec<u8>> {
    Ok(source.as_bytes().to_vec())
}

fn key(name: &str) -> CacheKey {
    let sig = SignatureBuilder::new().field("kernel", name).finish();
    CacheKey::new(name, "gfx900", 50000000, sig)
}

/// Tests in this file share the process-wide compile lock.
fn serial() -> MutexGuard<'static, ()> {
    static SERIAL: Mutex<()> = Mutex::new(());
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn memory_tiers() -> TierManager {
    TierManager::from_stores(
        PersistentStore::in_memory().unwrap(),
        None,
        &CacheSettings::default(),
    )
}

#[test]
fn test_contended_compile_uses_helper_with_identical_output() {
    let _serial = serial();
    let temp_dir = TempDir::new().unwrap();
    let cat_helper = helper_script(&temp_dir, "cat-helper", "exec cat");

    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);

    // Holds the compile lock for "slow" kernels until released.
    let backend = move |source: &str, arch: &str| -> CompileResult<Vec<u8>> {
        if source.starts_with("slow") {
            let _ = started_tx.lock().unwrap().send(());
            let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(30));
        }
        identity(source, arch)
    };

    let cache = Cache::new(
        memory_tiers(),
        CompileOrchestrator::new(
            backend,
            SubprocessCompiler::with_helper(cat_helper),
            CompileMode::Adaptive,
        ),
    );

    let source = "__global__ void kernel_b() { /* body */ }".repeat(500);

    std::thread::scope(|scope| {
        let holder = scope.spawn(|| {
            cache
                .cached_compile_report(&key("kernel_a"), |_| "slow kernel".to_string())
                .unwrap()
        });
        started_rx.recv_timeout(Duration::from_secs(30)).unwrap();

        let contended = cache
            .cached_compile_report(&key("kernel_b"), |_| source.clone())
            .unwrap();
        assert_eq!(contended.path, CompilePath::Subprocess);
        assert_eq!(contended.code, identity(&source, "gfx900").unwrap());

        release_tx.send(()).unwrap();
        assert_eq!(holder.join().unwrap().path, CompilePath::InProcess);
    });

    // Same source through the free in-process path is byte-identical.
    let (in_process, path) = cache
        .orchestrator()
        .compile("kernel_b", &source, "gfx900")
        .unwrap();
    assert_eq!(path, CompilePath::InProcess);
    assert_eq!(in_process, cache.get_code_object(&key("kernel_b")).unwrap());
}

#[test]
fn test_contended_compile_falls_back_when_helper_fails() {
    let _serial = serial();
    let temp_dir = TempDir::new().unwrap();
    let broken_helper = helper_script(
        &temp_dir,
        "broken-helper",
        "cat > /dev/null; echo 'cannot start'; exit 3",
    );

    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);

    let backend = move |source: &str, arch: &str| -> CompileResult<Vec<u8>> {
        if source.starts_with("slow") {
            let _ = started_tx.lock().unwrap().send(());
            let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(30));
        }
        identity(source, arch)
    };

    let orchestrator = CompileOrchestrator::new(
        backend,
        SubprocessCompiler::with_helper(broken_helper),
        CompileMode::Adaptive,
    );

    std::thread::scope(|scope| {
        let holder = scope.spawn(|| orchestrator.compile("kernel_a", "slow", "gfx900").unwrap());
        started_rx.recv_timeout(Duration::from_secs(30)).unwrap();

        let waiter = scope.spawn(|| orchestrator.compile("kernel_b", "quick", "gfx900").unwrap());
        // The waiter blocks on the lock after its helper failed; let it through.
        std::thread::sleep(Duration::from_millis(250));
        release_tx.send(()).unwrap();

        assert_eq!(holder.join().unwrap().1, CompilePath::InProcess);
        let (code, path) = waiter.join().unwrap();
        assert_eq!(path, CompilePath::InProcessFallback);
        assert_eq!(code, b"quick".to_vec());
    });
}

#[test]
fn test_out_of_process_mode_from_environment() {
    let _serial = serial();
    let temp_dir = TempDir::new().unwrap();
    let helper = helper_script(&temp_dir, "tag-helper", "printf 'helper:'; cat");

    let vars: Vec<(&str, String)> = vec![
        (env::PROCESS, "1".to_string()),
        (env::PROCESS_HELPER, helper.display().to_string()),
        (env::USER_CACHE_PATH, ":memory:".to_string()),
        (env::SYS_CACHE_PATH, ":memory:".to_string()),
    ];
    let settings = CacheSettings::load(None, |name| {
        vars.iter().find(|(k, _)| *k == name).map(|(_, v)| v.clone())
    })
    .unwrap();
    assert_eq!(settings.compile_mode, CompileMode::OutOfProcess);

    let cache = Cache::from_settings(&settings, identity).unwrap();
    let report = cache.cached_compile_report(&key("kernel_a"), |_| "src".to_string()).unwrap();

    assert_eq!(report.path, CompilePath::Subprocess);
    assert_eq!(report.code, b"helper:src".to_vec());
    assert_eq!(cache.get_code_object(&key("kernel_a")), Some(b"helper:src".to_vec()));
}

#[test]
fn test_helper_syntax_error_leaves_no_entry() {
    let _serial = serial();
    let temp_dir = TempDir::new().unwrap();
    let helper = helper_script(
        &temp_dir,
        "strict-helper",
        "cat > /dev/null; echo 'error: syntax error near line 1'; exit 1",
    );
    let rejecting = |_: &str, _: &str| -> CompileResult<Vec<u8>> {
        Err(CompileError::Backend("syntax error near line 1".to_string()))
    };

    let tiers = memory_tiers();
    let orchestrator = CompileOrchestrator::new(
        rejecting,
        SubprocessCompiler::with_helper(helper.clone()),
        CompileMode::OutOfProcess,
    );
    let bad_key = CacheKey::new("kernel_bad", "gfx900", 50000000, GeneratorSignature::of(b"bad"));

    let err = orchestrator
        .cached_compile(Some(&tiers), &bad_key, |_| "kernel void (".to_string())
        .unwrap_err();
    assert!(err.to_string().contains("syntax error"));
    assert_eq!(tiers.lookup(&bad_key), None);

    // The helper alone reports its stdout as the diagnostic.
    match SubprocessCompiler::with_helper(helper).compile("kernel void (", "gfx900") {
        Err(CompileError::ChildFailed { status, message }) => {
            assert_eq!(status.code(), Some(1));
            assert_eq!(message, "error: syntax error near line 1");
        }
        other => panic!("expected child failure, got {:?}", other),
    }
}

#[test]
fn test_in_process_mode_never_spawns() {
    let _serial = serial();
    let temp_dir = TempDir::new().unwrap();
    let marker = temp_dir.path().join("spawned");
    let helper = helper_script(
        &temp_dir,
        "marker-helper",
        &format!("touch '{}'; cat", marker.display()),
    );

    let orchestrator = CompileOrchestrator::new(
        identity,
        SubprocessCompiler::with_helper(helper),
        CompileMode::InProcess,
    );

    std::thread::scope(|scope| {
        for i in 0..4 {
            let orchestrator = &orchestrator;
            scope.spawn(move || {
                let (_, path) = orchestrator
                    .compile("kernel", &format!("src{}", i), "gfx900")
                    .unwrap();
                assert_eq!(path, CompilePath::InProcess);
            });
        }
    });
    assert!(!marker.exists());
}

#[test]
fn test_helper_timeout_falls_back_in_process() {
    let _serial = serial();
    let temp_dir = TempDir::new().unwrap();
    let hung = helper_script(&temp_dir, "hung-helper", "exec sleep 30");

    let orchestrator = CompileOrchestrator::new(
        identity,
        SubprocessCompiler::with_helper(hung)
            .with_timeout(Some(Duration::from_millis(300)), Duration::from_millis(200)),
        CompileMode::OutOfProcess,
    );

    let (code, path) = orchestrator.compile("kernel", "src", "gfx900").unwrap();
    assert_eq!(path, CompilePath::InProcessFallback);
    assert_eq!(code, b"src".to_vec());
}
