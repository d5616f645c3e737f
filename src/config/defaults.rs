//! Built-in defaults (layer 1) and environment variable names.

use std::time::Duration;

use kcache_store::DEFAULT_BUSY_TIMEOUT;

/// Environment variables understood by [`CacheSettings`](super::CacheSettings).
pub mod env {
    /// Path of the read-only system tier. `:memory:` disables the tier.
    pub const SYS_CACHE_PATH: &str = "KCACHE_SYS_CACHE_PATH";
    /// Path of the writable user tier; replaces the whole candidate search.
    pub const USER_CACHE_PATH: &str = "KCACHE_CACHE_PATH";
    /// Any non-empty value disables cache reads.
    pub const READ_DISABLE: &str = "KCACHE_CACHE_READ_DISABLE";
    /// Any non-empty value disables cache writes.
    pub const WRITE_DISABLE: &str = "KCACHE_CACHE_WRITE_DISABLE";
    /// `0` forces in-process compiles, `1` forces subprocess compiles.
    pub const PROCESS: &str = "KCACHE_PROCESS";
    /// Explicit path of the compile helper executable.
    pub const PROCESS_HELPER: &str = "KCACHE_PROCESS_HELPER";
    /// Seconds a compile helper may run before it is terminated.
    pub const HELPER_TIMEOUT_SECS: &str = "KCACHE_HELPER_TIMEOUT_SECS";
}

/// Built-in default values.
#[derive(Debug, Clone)]
pub struct BuiltinDefaults {
    /// Store busy timeout (default: 5s)
    pub busy_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL for a timed-out helper (default: 2s)
    pub termination_grace: Duration,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            termination_grace: Duration::from_secs(2),
        }
    }
}
