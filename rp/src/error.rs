//! Monitoring engine error types

use std::path::PathBuf;

use thiserror::Error;

use crate::git::GitError;

/// Errors surfaced by the watcher, coordinator and store layers
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The filesystem watch could not be established; fatal to that repository's lifecycle
    #[error("Failed to watch {path}: {source}")]
    WatchRegistrationFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// One detector's metadata read failed; converted to an ERROR event, never propagated
    #[error("{detector} detector failed: {source}")]
    ClassificationAuxiliaryFailed {
        detector: &'static str,
        #[source]
        source: GitError,
    },

    #[error("Snapshot read failed: {0}")]
    Snapshot(#[source] GitError),

    #[error("Remote refresh failed: {0}")]
    RemoteRefresh(#[source] GitError),

    #[error("Not a git repository: {path}")]
    NotARepository {
        path: PathBuf,
        #[source]
        source: GitError,
    },

    #[error("Repository already registered: {0}")]
    DuplicateRepository(String),

    #[error("Unknown repository: {0}")]
    UnknownRepository(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl MonitorError {
    /// The underlying git error, if this failure came from a subprocess
    pub fn git_error(&self) -> Option<&GitError> {
        match self {
            MonitorError::ClassificationAuxiliaryFailed { source, .. }
            | MonitorError::Snapshot(source)
            | MonitorError::RemoteRefresh(source)
            | MonitorError::NotARepository { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this error ends a repository's watch lifecycle
    pub fn is_fatal_to_watch(&self) -> bool {
        matches!(
            self,
            MonitorError::WatchRegistrationFailed { .. } | MonitorError::NotARepository { .. }
        )
    }
}
