//! Child side of out-of-process compilation.
//!
//! Invoked as `kcache-helper <target_arch>`. Reads kernel source from stdin
//! until EOF, compiles it and writes the code object to stdout. On failure
//! the diagnostic text goes to stdout instead and the exit code is non-zero;
//! the parent reads stdout either way.

use std::io::{self, Read, Write};
use std::path::Path;

use kcache::compile::{CommandBackend, CompileBackend};
use kcache::ConfigError;

/// Environment variable naming the compiler TOML file.
pub const CONFIG_ENV: &str = "KCACHE_HELPER_CONFIG";

/// Process outcome of one helper run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperStatus {
    /// Code object written to stdout
    Success,
    /// Diagnostic written to stdout
    CompileFailed,
    /// Bad invocation
    Usage,
}

impl HelperStatus {
    pub fn code(self) -> u8 {
        match self {
            HelperStatus::Success => 0,
            HelperStatus::CompileFailed => 1,
            HelperStatus::Usage => 2,
        }
    }
}

/// Load the compiler command from a TOML file with `program` and `args`.
pub fn load_backend(path: &Path) -> Result<CommandBackend, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml_backend(path, &content)
}

fn toml_backend(path: &Path, content: &str) -> Result<CommandBackend, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Compile everything read from `input` for `target_arch`, writing the result
/// or a diagnostic to `output`.
pub fn serve<B, R, W>(backend: &B, target_arch: &str, input: &mut R, output: &mut W) -> HelperStatus
where
    B: CompileBackend + ?Sized,
    R: Read,
    W: Write,
{
    let mut source = String::new();
    if let Err(e) = input.read_to_string(&mut source) {
        return fail(output, &format!("failed to read kernel source: {}", e));
    }

    match backend.compile(&source, target_arch) {
        Ok(code) if !code.is_empty() => {
            if let Err(e) = output.write_all(&code).and_then(|_| output.flush()) {
                tracing::error!("failed to write code object: {}", e);
                return HelperStatus::CompileFailed;
            }
            HelperStatus::Success
        }
        Ok(_) => fail(output, "compiler produced no output"),
        Err(e) => fail(output, &e.to_string()),
    }
}

/// Run with the process's stdin and stdout.
pub fn run<B: CompileBackend + ?Sized>(backend: &B, target_arch: &str) -> HelperStatus {
    serve(
        backend,
        target_arch,
        &mut io::stdin().lock(),
        &mut io::stdout().lock(),
    )
}

/// Report a failure on stdout and return the matching status.
pub fn fail<W: Write>(output: &mut W, message: &str) -> HelperStatus {
    tracing::debug!("helper failure: {}", message);
    let _ = output.write_all(message.as_bytes());
    let _ = output.flush();
    HelperStatus::CompileFailed
}
