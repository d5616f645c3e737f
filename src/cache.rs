//! The embedder-facing cache.

use kcache_key::CacheKey;
use kcache_store::StoreResult;

use crate::compile::{
    CompileBackend, CompileOrchestrator, CompileReport, CompileResult, SubprocessCompiler,
};
use crate::config::CacheSettings;
use crate::tiers::{TierManager, TierReport};

/// Tiered kernel cache plus the compiler arbitration that fills it.
///
/// Construct one per process and share it by reference; every method takes
/// `&self` and is safe to call from many threads.
#[derive(Debug)]
pub struct Cache {
    tiers: TierManager,
    orchestrator: CompileOrchestrator,
}

impl Cache {
    pub fn new(tiers: TierManager, orchestrator: CompileOrchestrator) -> Self {
        Self {
            tiers,
            orchestrator,
        }
    }

    /// Open the tiers and locate the helper as `settings` describe.
    pub fn from_settings(
        settings: &CacheSettings,
        backend: impl CompileBackend + 'static,
    ) -> StoreResult<Self> {
        let tiers = TierManager::open(settings)?;
        let orchestrator = CompileOrchestrator::new(
            backend,
            SubprocessCompiler::from_settings(settings),
            settings.compile_mode,
        );
        tracing::debug!(
            user = %tiers.user_store().location(),
            sys = ?tiers.sys_store().map(|s| s.location().to_string()),
            mode = %settings.compile_mode,
            "kernel cache ready"
        );
        Ok(Self::new(tiers, orchestrator))
    }

    pub fn tiers(&self) -> &TierManager {
        &self.tiers
    }

    pub fn orchestrator(&self) -> &CompileOrchestrator {
        &self.orchestrator
    }

    pub fn describe(&self) -> TierReport {
        self.tiers.describe()
    }

    /// Cached code for `key`, user tier first.
    pub fn get_code_object(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.tiers.lookup(key)
    }

    /// Record `code` for `key` in the user tier. Never fails.
    pub fn store_code_object(&self, key: &CacheKey, code: &[u8]) {
        self.tiers.store(key, code)
    }

    /// Return cached code for `key`, compiling and storing it on a miss.
    pub fn cached_compile<G>(&self, key: &CacheKey, generate: G) -> CompileResult<Vec<u8>>
    where
        G: FnOnce(&str) -> String,
    {
        self.cached_compile_report(key, generate).map(|report| report.code)
    }

    /// Like [`Cache::cached_compile`], also reporting how the code was obtained.
    pub fn cached_compile_report<G>(&self, key: &CacheKey, generate: G) -> CompileResult<CompileReport>
    where
        G: FnOnce(&str) -> String,
    {
        self.orchestrator.cached_compile(Some(&self.tiers), key, generate)
    }

    /// Snapshot of the user tier.
    pub fn serialize(&self) -> StoreResult<Vec<u8>> {
        self.tiers.user_store().snapshot()
    }

    /// Merge a snapshot into the user tier; returns the number of entries.
    pub fn deserialize(&self, image: &[u8]) -> StoreResult<usize> {
        self.tiers.user_store().merge(image)
    }
}
