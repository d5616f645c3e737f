//! Log setup for the binaries.
//!
//! The library only emits `tracing` events. Binaries call [`init`] once; the
//! filter comes from `KCACHE_LOG` and output always goes to stderr because the
//! helper's stdout carries code objects.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "KCACHE_LOG";

/// Install a stderr subscriber. `default` applies when `KCACHE_LOG` is unset
/// or invalid. Calling it again is a no-op.
pub fn init(default: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
