//! Cache tiers
//!
//! Two independent stores back every cache instance:
//! - **user**: read-write, per user or machine. Resolved through an ordered
//!   candidate search that ends in an in-memory store, so it always exists.
//! - **sys**: read-only, shared, typically shipped with an installation.
//!   Optional; absent when no file is found or the file is unusable.
//!
//! Lookups consult user then sys. Stores only ever go to user. Store-layer
//! errors are logged and swallowed here: a broken tier behaves like a miss,
//! never like a failed compile.

mod paths;

use std::fs;

use kcache_key::CacheKey;
use kcache_store::{OpenMode, PersistentStore, StoreLocation, StoreResult};
use serde::Serialize;

use crate::config::CacheSettings;

pub use paths::{
    install_dir, sys_cache_location, user_cache_candidates, UserDirs, CACHE_DIRNAME,
    CACHE_FILENAME,
};

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    User,
    Sys,
}

/// Where each tier lives, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TierReport {
    pub user: String,
    pub user_is_memory: bool,
    pub sys: Option<String>,
    pub read_disabled: bool,
    pub write_disabled: bool,
}

/// Owner of the user and system tier handles.
#[derive(Debug)]
pub struct TierManager {
    user: PersistentStore,
    sys: Option<PersistentStore>,
    read_disabled: bool,
    write_disabled: bool,
}

impl TierManager {
    /// Resolve and open both tiers for the current user and process.
    pub fn open(settings: &CacheSettings) -> StoreResult<Self> {
        Self::open_with_dirs(settings, &UserDirs::detect())
    }

    /// Resolve and open both tiers against explicit platform directories.
    ///
    /// Fails only if not even an in-memory user store can be created.
    pub fn open_with_dirs(settings: &CacheSettings, dirs: &UserDirs) -> StoreResult<Self> {
        let sys = sys_cache_location(settings, dirs).and_then(|location| {
            match PersistentStore::open_with_timeout(
                location.clone(),
                OpenMode::ReadOnly,
                settings.busy_timeout,
            ) {
                Ok(store) => Some(store),
                Err(e) => {
                    tracing::debug!(%location, "system cache tier unavailable: {}", e);
                    None
                }
            }
        });

        let user = Self::open_user(settings, dirs)?;

        Ok(Self::from_stores(user, sys, settings))
    }

    /// Assemble a manager from already-open stores.
    pub fn from_stores(
        user: PersistentStore,
        sys: Option<PersistentStore>,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            user,
            sys,
            read_disabled: settings.read_disabled,
            write_disabled: settings.write_disabled,
        }
    }

    fn open_user(settings: &CacheSettings, dirs: &UserDirs) -> StoreResult<PersistentStore> {
        let candidates = user_cache_candidates(settings, dirs);
        let mut last_err = None;

        for location in candidates {
            if let StoreLocation::File(path) = &location {
                if let Some(parent) = path.parent() {
                    // Best effort; the open below reports the real failure.
                    let _ = fs::create_dir_all(parent);
                }
            }

            match PersistentStore::open_with_timeout(
                location.clone(),
                OpenMode::ReadWrite,
                settings.busy_timeout,
            ) {
                Ok(store) => {
                    if location.is_memory() {
                        tracing::warn!(
                            "no writable kernel cache location found; compiled kernels \
                             will not persist past this process"
                        );
                    }
                    return Ok(store);
                }
                Err(e) => {
                    tracing::debug!(%location, "user cache candidate rejected: {}", e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => PersistentStore::in_memory(),
        }
    }

    /// The writable tier. Always present.
    pub fn user_store(&self) -> &PersistentStore {
        &self.user
    }

    /// The read-only tier, if one was found and is usable.
    pub fn sys_store(&self) -> Option<&PersistentStore> {
        self.sys.as_ref()
    }

    pub fn read_disabled(&self) -> bool {
        self.read_disabled
    }

    pub fn write_disabled(&self) -> bool {
        self.write_disabled
    }

    /// Look up `key`, user tier first.
    pub fn lookup(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.lookup_with_tier(key).map(|(code, _)| code)
    }

    /// Look up `key` and report which tier answered.
    pub fn lookup_with_tier(&self, key: &CacheKey) -> Option<(Vec<u8>, Tier)> {
        if self.read_disabled {
            return None;
        }

        let tiers = [(Tier::User, Some(&self.user)), (Tier::Sys, self.sys.as_ref())];
        for (tier, store) in tiers {
            let Some(store) = store else { continue };
            match store.get(key) {
                Ok(Some(code)) if !code.is_empty() => return Some((code, tier)),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        ?tier,
                        location = %store.location(),
                        %key,
                        "kernel cache lookup failed, treating as miss: {}",
                        e
                    );
                }
            }
        }
        None
    }

    /// Write `code` for `key` into the user tier. Failures are logged only.
    pub fn store(&self, key: &CacheKey, code: &[u8]) {
        if self.write_disabled {
            return;
        }
        if let Err(e) = self.user.put(key, code) {
            tracing::warn!(
                location = %self.user.location(),
                %key,
                "failed to store code object: {}",
                e
            );
        }
    }

    /// Describe the resolved tiers.
    pub fn describe(&self) -> TierReport {
        TierReport {
            user: self.user.location().to_string(),
            user_is_memory: self.user.location().is_memory(),
            sys: self.sys.as_ref().map(|s| s.location().to_string()),
            read_disabled: self.read_disabled,
            write_disabled: self.write_disabled,
        }
    }
}
