//! Activity event types
//!
//! An event's type is carried by its [`ActivityDetails`] variant, so the two
//! can never disagree. On the wire the variant name becomes the `type` field:
//!
//! ```json
//! {"project_id":"p1","repository_id":"r1","type":"COMMIT","branch":"main",
//!  "head":"c2","author":"Ada","subject":"Fix parser","timestamp":"..."}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::Branch;

/// Kind of activity, one per detector plus ERROR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    BranchCreated,
    BranchSwitch,
    Commit,
    Merge,
    Push,
    RemoteUpdate,
    WorktreeChange,
    Error,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BranchCreated => "BRANCH_CREATED",
            Self::BranchSwitch => "BRANCH_SWITCH",
            Self::Commit => "COMMIT",
            Self::Merge => "MERGE",
            Self::Push => "PUSH",
            Self::RemoteUpdate => "REMOTE_UPDATE",
            Self::WorktreeChange => "WORKTREE_CHANGE",
            Self::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Where a newly created branch appeared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchScope {
    Local,
    Remote,
}

/// Line-count statistics for uncommitted changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    pub files_changed: u64,
    pub insertions: u64,
    pub deletions: u64,
}

/// Payload of an activity event, one shape per kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityDetails {
    BranchCreated {
        name: String,
        scope: BranchScope,
    },
    BranchSwitch {
        from: Branch,
        to: Branch,
    },
    Commit {
        branch: Branch,
        head: String,
        author: String,
        subject: String,
    },
    Merge {
        branch: Branch,
        head: String,
        parent_count: usize,
    },
    Push {
        branch: Branch,
        head: String,
    },
    RemoteUpdate {
        branch: Branch,
        ahead: u32,
        behind: u32,
    },
    WorktreeChange {
        summary: String,
        changed_paths: usize,
        stat: DiffStat,
    },
    Error {
        /// Detector or stage that failed
        context: String,
        /// Failing command line, for diagnostics only
        command: Option<String>,
        message: String,
    },
}

impl ActivityDetails {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::BranchCreated { .. } => ActivityKind::BranchCreated,
            Self::BranchSwitch { .. } => ActivityKind::BranchSwitch,
            Self::Commit { .. } => ActivityKind::Commit,
            Self::Merge { .. } => ActivityKind::Merge,
            Self::Push { .. } => ActivityKind::Push,
            Self::RemoteUpdate { .. } => ActivityKind::RemoteUpdate,
            Self::WorktreeChange { .. } => ActivityKind::WorktreeChange,
            Self::Error { .. } => ActivityKind::Error,
        }
    }

    /// Build an ERROR payload from any error that may carry a command line
    pub fn error(context: impl Into<String>, err: &crate::git::GitError) -> Self {
        Self::Error {
            context: context.into(),
            command: err.command().map(str::to_string),
            message: err.to_string(),
        }
    }
}

/// One emitted activity, owned by the consumer once emitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub project_id: String,
    pub repository_id: String,
    #[serde(flatten)]
    pub details: ActivityDetails,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(project_id: impl Into<String>, repository_id: impl Into<String>, details: ActivityDetails) -> Self {
        Self {
            project_id: project_id.into(),
            repository_id: repository_id.into(),
            details,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> ActivityKind {
        self.details.kind()
    }

    pub fn is_error(&self) -> bool {
        self.kind() == ActivityKind::Error
    }
}
