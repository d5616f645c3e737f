//! Out-of-process compilation through the helper executable.
//!
//! Protocol with `kcache-helper`:
//! - argv: the target architecture as the sole argument
//! - stdin: kernel source, closed once fully written
//! - stdout: the code object on exit 0, a diagnostic message otherwise
//! - stderr: inherited, never captured
//!
//! Exit 0 with empty output is still a failure.

mod channel;
#[cfg(not(unix))]
mod threaded;
#[cfg(unix)]
mod unix;

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::CacheSettings;
use crate::tiers::install_dir;

use super::{CompileError, CompileResult};

pub use channel::{transfer, DuplexChannel, ReadChunk, Readiness, READ_CHUNK, WRITE_CHUNK};

#[cfg(not(unix))]
use threaded::PipeChannel;
#[cfg(unix)]
use unix::PipeChannel;

/// File name of the helper executable.
pub const HELPER_EXE: &str = if cfg!(windows) {
    "kcache-helper.exe"
} else {
    "kcache-helper"
};

/// Environment passed through to the helper. Variables prefixed with
/// `KCACHE_` are passed as well.
const ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "TMPDIR",
    "TEMP",
    "TMP",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "USER",
    "LOGNAME",
    "LD_LIBRARY_PATH",
    "DYLD_LIBRARY_PATH",
    "ROCM_PATH",
    "HIP_PATH",
    "SystemRoot",
];

const PASSTHROUGH_PREFIX: &str = "KCACHE_";

/// Poll interval while waiting for a helper to exit.
const EXIT_POLL: Duration = Duration::from_millis(10);

/// Paths searched for the helper, in order.
///
/// An explicit path is the only candidate when given. Otherwise the helper is
/// looked for next to the installed binary, then in a sibling `bin/`.
pub fn helper_candidates(explicit: Option<&Path>, install_dir: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    match install_dir {
        Some(dir) => {
            let mut candidates = vec![dir.join(HELPER_EXE)];
            if let Some(parent) = dir.parent() {
                candidates.push(parent.join("bin").join(HELPER_EXE));
            }
            candidates
        }
        None => Vec::new(),
    }
}

/// Find the helper executable.
pub fn locate_helper(explicit: Option<&Path>, install_dir: Option<&Path>) -> CompileResult<PathBuf> {
    let searched = helper_candidates(explicit, install_dir);
    match searched.iter().find(|p| p.is_file()) {
        Some(found) => Ok(found.clone()),
        None => Err(CompileError::HelperNotFound { searched }),
    }
}

/// Runs single compiles in a fresh helper process.
#[derive(Debug, Clone)]
pub struct SubprocessCompiler {
    helper: Option<PathBuf>,
    searched: Vec<PathBuf>,
    timeout: Option<Duration>,
    grace: Duration,
}

impl SubprocessCompiler {
    /// Resolve the helper from settings and the installed location.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        let install = install_dir();
        let searched = helper_candidates(settings.helper_path.as_deref(), install.as_deref());
        let helper = searched.iter().find(|p| p.is_file()).cloned();
        if helper.is_none() {
            tracing::debug!(?searched, "compile helper not found");
        }
        Self {
            helper,
            searched,
            timeout: settings.helper_timeout,
            grace: settings.termination_grace,
        }
    }

    /// Use a known helper path.
    pub fn with_helper(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            helper: Some(path.clone()),
            searched: vec![path],
            timeout: None,
            grace: CacheSettings::default().termination_grace,
        }
    }

    /// Bound each helper run; `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>, grace: Duration) -> Self {
        self.timeout = timeout;
        self.grace = grace;
        self
    }

    pub fn helper_path(&self) -> Option<&Path> {
        self.helper.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Compile `source` for `target_arch` in a helper process.
    pub fn compile(&self, source: &str, target_arch: &str) -> CompileResult<Vec<u8>> {
        let helper = self.helper.as_ref().ok_or_else(|| CompileError::HelperNotFound {
            searched: self.searched.clone(),
        })?;

        let mut command = Command::new(helper);
        command
            .arg(target_arch)
            .env_clear()
            .envs(helper_environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command.spawn().map_err(|e| CompileError::SpawnFailed {
            path: helper.clone(),
            source: e,
        })?;
        tracing::debug!(pid = child.id(), helper = %helper.display(), target_arch, "spawned compile helper");

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let output = match self.exchange(&mut child, source.as_bytes(), deadline) {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                self.terminate_child(&mut child);
                return Err(CompileError::Timeout(self.timeout.unwrap_or_default()));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        let status = match deadline {
            Some(deadline) => match wait_until(&mut child, deadline)? {
                Some(status) => status,
                None => {
                    self.terminate_child(&mut child);
                    return Err(CompileError::Timeout(self.timeout.unwrap_or_default()));
                }
            },
            None => child.wait()?,
        };

        if !status.success() {
            let mut message = String::from_utf8_lossy(&output).trim().to_string();
            if message.is_empty() {
                message = "child produced no output".to_string();
            }
            return Err(CompileError::ChildFailed { status, message });
        }
        if output.is_empty() {
            return Err(CompileError::EmptyOutput);
        }
        Ok(output)
    }

    fn exchange(
        &self,
        child: &mut Child,
        input: &[u8],
        deadline: Option<Instant>,
    ) -> io::Result<Vec<u8>> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "helper stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "helper stdout not captured"))?;

        let mut channel = PipeChannel::new(stdin, stdout)?;
        transfer(&mut channel, input, deadline)
    }

    /// Terminate a child process gracefully then forcefully.
    fn terminate_child(&self, child: &mut Child) {
        tracing::warn!(pid = child.id(), "compile helper timed out, terminating");

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            let _ = signal::kill(pid, Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }

        let start = Instant::now();
        while start.elapsed() < self.grace {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(EXIT_POLL),
                Err(_) => break,
            }
        }

        let _ = child.kill();
        let _ = child.wait();
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<std::process::ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(EXIT_POLL);
    }
}

fn helper_environment() -> Vec<(String, String)> {
    env::vars()
        .filter(|(key, _)| {
            ENV_ALLOWLIST.contains(&key.as_str()) || key.starts_with(PASSTHROUGH_PREFIX)
        })
        .collect()
}
