//! Resolved cache settings.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::defaults::{env, BuiltinDefaults};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

/// How a cache miss gets compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileMode {
    /// In-process when the compile lock is free, subprocess under contention,
    /// blocking in-process as the last resort.
    #[default]
    Adaptive,
    /// Always in-process, waiting for the compile lock.
    InProcess,
    /// Always in a helper process; in-process only if the helper fails.
    OutOfProcess,
}

impl CompileMode {
    /// Interpret the `KCACHE_PROCESS` value: `0` = in-process, `1` =
    /// out-of-process, anything else = adaptive.
    pub fn from_env_value(value: &str) -> Self {
        match value.trim() {
            "0" => Self::InProcess,
            "1" => Self::OutOfProcess,
            _ => Self::Adaptive,
        }
    }
}

impl fmt::Display for CompileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adaptive => f.write_str("adaptive"),
            Self::InProcess => f.write_str("in_process"),
            Self::OutOfProcess => f.write_str("out_of_process"),
        }
    }
}

/// TOML file layer. Every field is optional; absent fields keep the value
/// from the layer below.
///
/// ```toml
/// [cache]
/// sys_path = "/opt/kernels/kcache_kernel_cache.db"
/// user_path = "/scratch/kcache.db"
/// read_disable = false
/// write_disable = false
/// busy_timeout_ms = 5000
///
/// [compile]
/// mode = "adaptive"
/// helper = "/opt/kernels/bin/kcache-helper"
/// helper_timeout_seconds = 120
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    #[serde(default)]
    pub cache: FileCacheSection,
    #[serde(default)]
    pub compile: FileCompileSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCacheSection {
    pub sys_path: Option<PathBuf>,
    pub user_path: Option<PathBuf>,
    pub read_disable: Option<bool>,
    pub write_disable: Option<bool>,
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCompileSection {
    pub mode: Option<CompileMode>,
    pub helper: Option<PathBuf>,
    pub helper_timeout_seconds: Option<u64>,
}

impl FileSettings {
    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings for one cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSettings {
    /// System tier path override
    pub sys_cache_path: Option<PathBuf>,
    /// User tier path override
    pub user_cache_path: Option<PathBuf>,
    /// Lookups always miss
    pub read_disabled: bool,
    /// Stores are no-ops
    pub write_disabled: bool,
    /// Compile path selection
    pub compile_mode: CompileMode,
    /// Helper executable override
    pub helper_path: Option<PathBuf>,
    /// Maximum helper run time; `None` waits indefinitely
    pub helper_timeout: Option<Duration>,
    /// SIGTERM to SIGKILL grace for a timed-out helper
    pub termination_grace: Duration,
    /// Store busy timeout under cross-process contention
    pub busy_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = BuiltinDefaults::default();
        Self {
            sys_cache_path: None,
            user_cache_path: None,
            read_disabled: false,
            write_disabled: false,
            compile_mode: CompileMode::Adaptive,
            helper_path: None,
            helper_timeout: None,
            termination_grace: defaults.termination_grace,
            busy_timeout: defaults.busy_timeout,
        }
    }
}

impl CacheSettings {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None, |name| std::env::var(name).ok())
    }

    /// Resolve all layers: defaults, then `file` if given, then `lookup`.
    pub fn load<F>(file: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(path) = file {
            settings.apply_file(&FileSettings::from_file(path)?);
        }
        settings.apply_env(lookup)?;
        Ok(settings)
    }

    /// Overlay a parsed TOML layer.
    pub fn apply_file(&mut self, file: &FileSettings) {
        let cache = &file.cache;
        if let Some(path) = &cache.sys_path {
            self.sys_cache_path = Some(path.clone());
        }
        if let Some(path) = &cache.user_path {
            self.user_cache_path = Some(path.clone());
        }
        if let Some(disabled) = cache.read_disable {
            self.read_disabled = disabled;
        }
        if let Some(disabled) = cache.write_disable {
            self.write_disabled = disabled;
        }
        if let Some(ms) = cache.busy_timeout_ms {
            self.busy_timeout = Duration::from_millis(ms);
        }

        let compile = &file.compile;
        if let Some(mode) = compile.mode {
            self.compile_mode = mode;
        }
        if let Some(helper) = &compile.helper {
            self.helper_path = Some(helper.clone());
        }
        if let Some(secs) = compile.helper_timeout_seconds {
            self.helper_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
    }

    /// Overlay environment-style variables.
    ///
    /// Empty values count as unset, so `KCACHE_CACHE_READ_DISABLE=` does not
    /// disable reads.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(path) = get(env::SYS_CACHE_PATH) {
            self.sys_cache_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get(env::USER_CACHE_PATH) {
            self.user_cache_path = Some(PathBuf::from(path));
        }
        if get(env::READ_DISABLE).is_some() {
            self.read_disabled = true;
        }
        if get(env::WRITE_DISABLE).is_some() {
            self.write_disabled = true;
        }
        if let Some(mode) = get(env::PROCESS) {
            self.compile_mode = CompileMode::from_env_value(&mode);
        }
        if let Some(path) = get(env::PROCESS_HELPER) {
            self.helper_path = Some(PathBuf::from(path));
        }
        if let Some(value) = get(env::HELPER_TIMEOUT_SECS) {
            let secs: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: env::HELPER_TIMEOUT_SECS.to_string(),
                value: value.clone(),
                reason: "expected a whole number of seconds".to_string(),
            })?;
            self.helper_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(())
    }
}
