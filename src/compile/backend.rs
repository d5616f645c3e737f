//! Compile backends.

use std::fs;
use std::process::{Command, Stdio};

use serde::Deserialize;

use super::{CompileError, CompileResult};

/// Something that turns kernel source into a code object for one target.
///
/// Implementations must be safe to call from any thread. Whether two calls may
/// run at once in the same process is up to the orchestrator, not the backend.
pub trait CompileBackend: Send + Sync {
    fn compile(&self, source: &str, target_arch: &str) -> CompileResult<Vec<u8>>;
}

impl<F> CompileBackend for F
where
    F: Fn(&str, &str) -> CompileResult<Vec<u8>> + Send + Sync,
{
    fn compile(&self, source: &str, target_arch: &str) -> CompileResult<Vec<u8>> {
        self(source, target_arch)
    }
}

/// Backend that shells out to an external compiler.
///
/// Arguments may contain the placeholders `{arch}`, `{src}` and `{out}`. The
/// source is written to a scratch file substituted for `{src}`; the code
/// object is read back from the file substituted for `{out}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandBackend {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl CompileBackend for CommandBackend {
    fn compile(&self, source: &str, target_arch: &str) -> CompileResult<Vec<u8>> {
        let scratch = tempfile::tempdir()?;
        let src_path = scratch.path().join("kernel.src");
        let out_path = scratch.path().join("kernel.out");
        fs::write(&src_path, source)?;

        let src = src_path.to_string_lossy();
        let out = out_path.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{arch}", target_arch)
                    .replace("{src}", &src)
                    .replace("{out}", &out)
            })
            .collect();

        tracing::trace!(program = %self.program, ?args, "invoking compiler");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CompileError::Backend(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(CompileError::Backend(message));
        }

        let code = match fs::read(&out_path) {
            Ok(code) => code,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if code.is_empty() {
            return Err(CompileError::EmptyOutput);
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_backend() {
        let backend = |source: &str, arch: &str| -> CompileResult<Vec<u8>> {
            Ok(format!("{}:{}", arch, source).into_bytes())
        };
        assert_eq!(backend.compile("src", "gfx900").unwrap(), b"gfx900:src".to_vec());
    }

    #[test]
    fn test_command_backend_from_toml() {
        let backend: CommandBackend = toml::from_str(
            r#"
            program = "hipcc"
            args = ["--offload-arch={arch}", "{src}", "-o", "{out}"]
            "#,
        )
        .unwrap();
        assert_eq!(backend.program, "hipcc");
        assert_eq!(backend.args.len(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_backend_substitutes_placeholders() {
        let backend = CommandBackend::new(
            "sh",
            vec![
                "-c".to_string(),
                "printf '%s:' \"$0\" > \"$2\" && cat \"$1\" >> \"$2\"".to_string(),
                "{arch}".to_string(),
                "{src}".to_string(),
                "{out}".to_string(),
            ],
        );
        let code = backend.compile("kernel body", "gfx1030").unwrap();
        assert_eq!(code, b"gfx1030:kernel body".to_vec());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_backend_reports_stderr() {
        let backend = CommandBackend::new(
            "sh",
            vec!["-c".to_string(), "echo 'syntax error' >&2; exit 1".to_string()],
        );
        match backend.compile("bad", "gfx900") {
            Err(CompileError::Backend(message)) => assert_eq!(message, "syntax error"),
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_command_backend_without_output_is_empty() {
        let backend = CommandBackend::new("true", vec![]);
        assert!(matches!(
            backend.compile("src", "gfx900"),
            Err(CompileError::EmptyOutput)
        ));
    }

    #[test]
    fn test_command_backend_missing_program() {
        let backend = CommandBackend::new("kcache-no-such-compiler", vec![]);
        assert!(matches!(
            backend.compile("src", "gfx900"),
            Err(CompileError::Backend(_))
        ));
    }
}
