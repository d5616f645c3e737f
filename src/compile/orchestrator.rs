//! Compile arbitration.
//!
//! The in-process backend is assumed non-reentrant, so one process-wide
//! compile mutex serializes it across every orchestrator. In adaptive mode a caller that finds the mutex taken does
//! not queue behind it but compiles in a helper process instead; if that
//! fails it blocks on the mutex and compiles in-process after all.

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

use kcache_key::CacheKey;
use serde::Serialize;

use crate::config::CompileMode;
use crate::tiers::TierManager;

use super::backend::CompileBackend;
use super::subprocess::SubprocessCompiler;
use super::{CompileError, CompileResult};

/// Held for the duration of every in-process compile.
static COMPILE_LOCK: Mutex<()> = Mutex::new(());

/// How a code object was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilePath {
    /// Found in a cache tier; nothing was compiled.
    CacheHit,
    /// Compiled by the in-process backend.
    InProcess,
    /// Compiled by the helper process.
    Subprocess,
    /// Helper failed, then compiled in-process.
    InProcessFallback,
}

impl CompilePath {
    pub fn compiled(&self) -> bool {
        !matches!(self, CompilePath::CacheHit)
    }
}

/// Result of a cached compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    pub code: Vec<u8>,
    pub path: CompilePath,
}

pub struct CompileOrchestrator {
    backend: Box<dyn CompileBackend>,
    subprocess: SubprocessCompiler,
    mode: CompileMode,
}

impl std::fmt::Debug for CompileOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileOrchestrator")
            .field("subprocess", &self.subprocess)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl CompileOrchestrator {
    pub fn new(
        backend: impl CompileBackend + 'static,
        subprocess: SubprocessCompiler,
        mode: CompileMode,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            subprocess,
            mode,
        }
    }

    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    pub fn subprocess(&self) -> &SubprocessCompiler {
        &self.subprocess
    }

    /// Look up `key`, otherwise generate, compile and store it.
    ///
    /// `generate` receives the kernel name and runs outside every lock. Store
    /// failures are logged by the tier manager and never surface here.
    pub fn cached_compile<G>(
        &self,
        tiers: Option<&TierManager>,
        key: &CacheKey,
        generate: G,
    ) -> CompileResult<CompileReport>
    where
        G: FnOnce(&str) -> String,
    {
        if let Some(code) = tiers.and_then(|t| t.lookup(key)) {
            tracing::debug!(%key, bytes = code.len(), "kernel cache hit");
            return Ok(CompileReport {
                code,
                path: CompilePath::CacheHit,
            });
        }

        let start = Instant::now();
        let source = generate(&key.kernel_name);
        tracing::debug!(
            kernel = %key.kernel_name,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "generated kernel source"
        );

        let start = Instant::now();
        let (code, path) = self.compile(&key.kernel_name, &source, &key.target_arch)?;
        tracing::debug!(
            kernel = %key.kernel_name,
            target_arch = %key.target_arch,
            ?path,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "compiled kernel"
        );

        if let Some(tiers) = tiers {
            tiers.store(key, &code);
        }
        Ok(CompileReport { code, path })
    }

    /// Compile `source`, choosing in-process or helper according to the mode.
    pub fn compile(
        &self,
        kernel_name: &str,
        source: &str,
        target_arch: &str,
    ) -> CompileResult<(Vec<u8>, CompilePath)> {
        match self.mode {
            CompileMode::InProcess => {
                let _guard = self.lock_blocking();
                let code = self.compile_in_process(source, target_arch)?;
                Ok((code, CompilePath::InProcess))
            }
            CompileMode::OutOfProcess => self.compile_out_of_process(kernel_name, source, target_arch),
            CompileMode::Adaptive => {
                let guard = match COMPILE_LOCK.try_lock() {
                    Ok(guard) => Some(guard),
                    Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
                    Err(TryLockError::WouldBlock) => None,
                };
                match guard {
                    Some(_guard) => {
                        let code = self.compile_in_process(source, target_arch)?;
                        Ok((code, CompilePath::InProcess))
                    }
                    None => {
                        tracing::debug!(kernel = kernel_name, "compile lock busy, using helper");
                        self.compile_out_of_process(kernel_name, source, target_arch)
                    }
                }
            }
        }
    }

    fn compile_out_of_process(
        &self,
        kernel_name: &str,
        source: &str,
        target_arch: &str,
    ) -> CompileResult<(Vec<u8>, CompilePath)> {
        match self.subprocess.compile(source, target_arch) {
            Ok(code) => Ok((code, CompilePath::Subprocess)),
            Err(e) => {
                tracing::warn!(
                    kernel = kernel_name,
                    target_arch,
                    "helper compile failed, falling back to in-process: {}",
                    e
                );
                let _guard = self.lock_blocking();
                let code = self.compile_in_process(source, target_arch)?;
                Ok((code, CompilePath::InProcessFallback))
            }
        }
    }

    /// Caller must hold the compile lock.
    fn compile_in_process(&self, source: &str, target_arch: &str) -> CompileResult<Vec<u8>> {
        let code = self.backend.compile(source, target_arch)?;
        if code.is_empty() {
            return Err(CompileError::EmptyOutput);
        }
        Ok(code)
    }

    fn lock_blocking(&self) -> MutexGuard<'static, ()> {
        COMPILE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes unit tests that compile, since they share the compile lock.
#[cfg(test)]
pub(crate) fn serial_compiles() -> MutexGuard<'static, ()> {
    static SERIAL: Mutex<()> = Mutex::new(());
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}
