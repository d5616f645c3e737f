//! kcache - JIT GPU kernel cache and compile orchestration
//!
//! Compiled kernels are keyed by name, target architecture, runtime version and
//! a digest of the source generator, and kept in two SQLite-backed tiers: a
//! read-only system tier shipped with an installation and a writable user
//! tier. On a miss the kernel is generated and compiled, in-process when the
//! compiler is free and in a helper process when it is not.

pub mod cache;
pub mod compile;
pub mod config;
pub mod logging;
pub mod precompile;
pub mod tiers;

pub use cache::Cache;
pub use compile::{
    CommandBackend, CompileBackend, CompileError, CompileOrchestrator, CompilePath, CompileReport,
    CompileResult, SubprocessCompiler,
};
pub use config::{CacheSettings, CompileMode, ConfigError};
pub use precompile::{precompile, PrecompileItem, PrecompileSummary};
pub use tiers::{TierManager, TierReport};

pub use kcache_key::{CacheKey, CodeObject, GeneratorSignature, SignatureBuilder};
pub use kcache_store::{OpenMode, PersistentStore, StoreError, StoreLocation, StoreResult};
