//! Tier location resolution.
//!
//! Pure functions over [`CacheSettings`] and [`UserDirs`]; nothing here opens
//! a database.

use std::env;
use std::path::{Path, PathBuf};

use kcache_store::StoreLocation;

use crate::config::CacheSettings;

/// File name of a cache database, in every tier.
pub const CACHE_FILENAME: &str = "kcache_kernel_cache.db";

/// Directory name used under per-user cache roots.
pub const CACHE_DIRNAME: &str = "kcache";

/// Platform directories consulted while resolving tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDirs {
    /// Platform cache root (XDG cache home, `~/Library/Caches`, `%LOCALAPPDATA%`)
    pub cache_dir: Option<PathBuf>,
    /// Home directory
    pub home_dir: Option<PathBuf>,
    /// Temporary directory
    pub temp_dir: PathBuf,
    /// Directory holding the running executable
    pub install_dir: Option<PathBuf>,
}

impl UserDirs {
    /// Detect directories for the current user and process.
    pub fn detect() -> Self {
        Self {
            cache_dir: dirs::cache_dir(),
            home_dir: dirs::home_dir(),
            temp_dir: env::temp_dir(),
            install_dir: install_dir(),
        }
    }
}

/// Directory of the running executable, the installed-library analogue.
pub fn install_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Location of the system tier, if any.
///
/// An explicit override wins; otherwise the tier sits next to the installed
/// binary.
pub fn sys_cache_location(settings: &CacheSettings, dirs: &UserDirs) -> Option<StoreLocation> {
    if let Some(path) = &settings.sys_cache_path {
        return Some(StoreLocation::from_path(path));
    }
    dirs.install_dir
        .as_ref()
        .map(|dir| StoreLocation::File(dir.join(CACHE_FILENAME)))
}

/// Candidate user tier locations in decreasing order of preference.
///
/// The list always ends with [`StoreLocation::Memory`], so some writable tier
/// exists even when every directory is unusable.
pub fn user_cache_candidates(settings: &CacheSettings, dirs: &UserDirs) -> Vec<StoreLocation> {
    let mut candidates = Vec::new();

    if let Some(path) = &settings.user_cache_path {
        candidates.push(StoreLocation::from_path(path));
    } else {
        if let Some(cache_dir) = &dirs.cache_dir {
            candidates.push(StoreLocation::File(
                cache_dir.join(CACHE_DIRNAME).join(CACHE_FILENAME),
            ));
        } else if let Some(home) = &dirs.home_dir {
            // Persistent fallback when the platform reports no cache root.
            candidates.push(StoreLocation::File(
                home.join(".cache").join(CACHE_DIRNAME).join(CACHE_FILENAME),
            ));
        }
        candidates.push(StoreLocation::File(dirs.temp_dir.join(CACHE_FILENAME)));
    }

    if candidates.last() != Some(&StoreLocation::Memory) {
        candidates.push(StoreLocation::Memory);
    }
    candidates
}
