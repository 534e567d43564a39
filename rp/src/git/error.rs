//! Git command error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running a git subprocess
#[derive(Debug, Error)]
pub enum GitError {
    /// Malformed call into the runner. A programming error, never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected output from `{command}`: {message}")]
    Parse { command: String, message: String },
}

impl GitError {
    /// Check if this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, GitError::Timeout { .. })
    }

    /// The command line that failed, if one was attempted
    pub fn command(&self) -> Option<&str> {
        match self {
            GitError::InvalidArgument(_) => None,
            GitError::Spawn { command, .. }
            | GitError::Timeout { command, .. }
            | GitError::CommandFailed { command, .. }
            | GitError::Parse { command, .. } => Some(command),
        }
    }

    /// Exit code for a non-zero exit, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            GitError::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }

    /// True when the command exited non-zero and wrote nothing to stderr.
    ///
    /// Several plumbing commands (`symbolic-ref -q`, `config --get-regexp`)
    /// report "nothing found" this way.
    pub fn is_quiet_failure(&self) -> bool {
        matches!(self, GitError::CommandFailed { stderr, .. } if stderr.trim().is_empty())
    }
}
