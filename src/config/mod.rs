//! Cache configuration
//!
//! Settings are resolved in three layers, later layers winning:
//! 1. Built-in defaults
//! 2. Optional TOML file (e.g. `kcache.toml`)
//! 3. Environment (`KCACHE_*` variables)
//!
//! The environment is read through a lookup function so tests and embedders
//! can supply their own without touching process state.

mod defaults;
mod settings;

pub use defaults::{env, BuiltinDefaults};
pub use settings::{
    CacheSettings, CompileMode, ConfigError, FileCacheSection, FileCompileSection, FileSettings,
};
