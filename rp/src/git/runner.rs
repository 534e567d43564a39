//! CommandRunner trait and the git subprocess implementation

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::GitError;
use crate::config::GitConfig;

/// Runs one version-control subprocess per call
///
/// Arguments are always passed as an argument vector, never through a shell.
/// Implementations enforce the timeout themselves and do not retry.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command with `args` in `cwd`, returning captured stdout
    async fn run(&self, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String, GitError>;
}

/// Reject malformed invocations before anything is spawned
pub fn validate_invocation(args: &[&str], cwd: &Path, timeout: Duration) -> Result<(), GitError> {
    if args.is_empty() {
        return Err(GitError::InvalidArgument("argument vector is empty".to_string()));
    }
    if let Some(idx) = args.iter().position(|a| a.is_empty()) {
        return Err(GitError::InvalidArgument(format!("argument {} is empty", idx)));
    }
    if args.iter().any(|a| a.contains('\0')) {
        return Err(GitError::InvalidArgument("argument contains a NUL byte".to_string()));
    }
    if cwd.as_os_str().is_empty() {
        return Err(GitError::InvalidArgument("working directory is empty".to_string()));
    }
    if timeout.is_zero() {
        return Err(GitError::InvalidArgument("timeout must be non-zero".to_string()));
    }
    Ok(())
}

/// Render a command line for logs and error payloads
pub fn render_command(program: &Path, args: &[&str]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs the `git` executable directly
#[derive(Debug, Clone)]
pub struct GitRunner {
    program: PathBuf,
}

impl Default for GitRunner {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitRunner {
    /// Create a runner for the given git executable
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        debug!(?program, "GitRunner::new: called");
        Self { program }
    }

    /// Create a runner from configuration
    pub fn from_config(config: &GitConfig) -> Self {
        Self::new(&config.program)
    }

    /// Path of the executable this runner spawns
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl CommandRunner for GitRunner {
    async fn run(&self, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String, GitError> {
        validate_invocation(args, cwd, timeout)?;
        let command = render_command(&self.program, args);
        debug!(%command, cwd = %cwd.display(), ?timeout, "GitRunner::run: called");

        let child = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            // Reads must never take index.lock, or the watcher would see its own churn
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GitError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                debug!(%command, %source, "GitRunner::run: wait failed");
                return Err(GitError::Spawn { command, source });
            }
            Err(_) => {
                debug!(%command, "GitRunner::run: timed out, child killed");
                return Err(GitError::Timeout { command, timeout });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(%command, code = ?output.status.code(), "GitRunner::run: non-zero exit");
            return Err(GitError::CommandFailed {
                command,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
