//! Mass precompilation.
//!
//! A fixed set of worker threads drains one shared queue of kernels and runs
//! [`Cache::cached_compile_report`] for every requested architecture. This is
//! the workload adaptive compile mode is tuned for: the first worker takes the
//! in-process backend, everyone else overflows into helper processes.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use kcache_key::CacheKey;
use serde::Serialize;

use crate::cache::Cache;
use crate::compile::CompilePath;

/// Source generator for one kernel; receives the kernel name.
pub type Generator = Box<dyn Fn(&str) -> String + Send + Sync>;

/// One kernel to precompile.
pub struct PrecompileItem {
    pub kernel_name: String,
    pub generate: Generator,
}

impl PrecompileItem {
    pub fn new(
        kernel_name: impl Into<String>,
        generate: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            generate: Box::new(generate),
        }
    }
}

impl std::fmt::Debug for PrecompileItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecompileItem")
            .field("kernel_name", &self.kernel_name)
            .finish_non_exhaustive()
    }
}

/// A kernel/arch pair that could not be produced.
#[derive(Debug, Clone, Serialize)]
pub struct PrecompileFailure {
    pub key: CacheKey,
    pub message: String,
}

/// Totals for one precompile run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrecompileSummary {
    /// Already present in a tier
    pub cached: usize,
    /// Compiled in-process
    pub in_process: usize,
    /// Compiled by a helper process
    pub subprocess: usize,
    /// Compiled in-process after a helper failed
    pub fallback: usize,
    pub failures: Vec<PrecompileFailure>,
    pub elapsed: Duration,
}

impl PrecompileSummary {
    pub fn compiled(&self) -> usize {
        self.in_process + self.subprocess + self.fallback
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.cached + self.compiled() + self.failed()
    }

    fn record(&mut self, path: CompilePath) {
        match path {
            CompilePath::CacheHit => self.cached += 1,
            CompilePath::InProcess => self.in_process += 1,
            CompilePath::Subprocess => self.subprocess += 1,
            CompilePath::InProcessFallback => self.fallback += 1,
        }
    }

    fn absorb(&mut self, other: PrecompileSummary) {
        self.cached += other.cached;
        self.in_process += other.in_process;
        self.subprocess += other.subprocess;
        self.fallback += other.fallback;
        self.failures.extend(other.failures);
    }
}

/// Compile every item for every arch on `threads` workers.
///
/// `make_key` maps a kernel name and arch to its cache key. Failures are
/// collected in the summary and never stop the run.
pub fn precompile<K>(
    cache: &Cache,
    items: Vec<PrecompileItem>,
    archs: &[String],
    threads: usize,
    make_key: K,
) -> PrecompileSummary
where
    K: Fn(&str, &str) -> CacheKey + Sync,
{
    let start = Instant::now();
    let queue = Mutex::new(items.into_iter().collect::<VecDeque<_>>());
    let threads = threads.max(1);

    let mut summary = thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|_| scope.spawn(|| drain(cache, &queue, archs, &make_key)))
            .collect();

        let mut summary = PrecompileSummary::default();
        for worker in workers {
            match worker.join() {
                Ok(partial) => summary.absorb(partial),
                Err(_) => tracing::error!("precompile worker panicked"),
            }
        }
        summary
    });

    summary.elapsed = start.elapsed();
    tracing::info!(
        cached = summary.cached,
        compiled = summary.compiled(),
        failed = summary.failed(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "precompile finished"
    );
    summary
}

fn drain<K>(
    cache: &Cache,
    queue: &Mutex<VecDeque<PrecompileItem>>,
    archs: &[String],
    make_key: &K,
) -> PrecompileSummary
where
    K: Fn(&str, &str) -> CacheKey + Sync,
{
    let mut summary = PrecompileSummary::default();
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(item) = next else { break };

        for arch in archs {
            let key = make_key(&item.kernel_name, arch);
            match cache.cached_compile_report(&key, |name| (item.generate)(name)) {
                Ok(report) => summary.record(report.path),
                Err(e) => {
                    tracing::warn!(%key, "precompile failed: {}", e);
                    summary.failures.push(PrecompileFailure {
                        key,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
    summary
}
