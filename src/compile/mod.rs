//! Kernel compilation
//!
//! - [`CompileBackend`]: the pluggable source-to-code-object compiler
//! - [`SubprocessCompiler`]: runs a compile inside the helper executable
//! - [`CompileOrchestrator`]: decides where a compile runs and consults the
//!   cache tiers around it

mod backend;
mod orchestrator;
pub mod subprocess;

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

pub use backend::{CommandBackend, CompileBackend};
pub use orchestrator::{CompileOrchestrator, CompilePath, CompileReport};
#[cfg(test)]
pub(crate) use orchestrator::serial_compiles;
pub use subprocess::{locate_helper, SubprocessCompiler, HELPER_EXE};

/// Errors raised while producing a code object.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compile helper '{}' not found (searched: {})", HELPER_EXE, display_paths(.searched))]
    HelperNotFound { searched: Vec<PathBuf> },

    #[error("failed to spawn {path}: {source}")]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compile helper failed ({status}): {message}")]
    ChildFailed { status: ExitStatus, message: String },

    #[error("compiler produced no output")]
    EmptyOutput,

    #[error("compile helper timed out after {0:?}")]
    Timeout(Duration),

    #[error("compile failed: {0}")]
    Backend(String),
}

/// Result type for compile operations
pub type CompileResult<T> = Result<T, CompileError>;

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
