//! Repository snapshot value types

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What git reports in place of a branch name when HEAD is detached
pub const DETACHED_SENTINEL: &str = "HEAD";

/// Number of status entries rendered by [`WorkingTreeSummary::summary`]
const SUMMARY_ENTRIES: usize = 5;

/// The branch HEAD points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Branch {
    Named(String),
    Detached,
}

impl Branch {
    pub fn named(name: impl Into<String>) -> Self {
        Branch::Named(name.into())
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Branch::Detached)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Branch::Named(name) => name,
            Branch::Detached => DETACHED_SENTINEL,
        }
    }
}

impl From<String> for Branch {
    fn from(value: String) -> Self {
        if value == DETACHED_SENTINEL || value.is_empty() {
            Branch::Detached
        } else {
            Branch::Named(value)
        }
    }
}

impl From<Branch> for String {
    fn from(value: Branch) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Named(name) => write!(f, "{}", name),
            Branch::Detached => write!(f, "(detached)"),
        }
    }
}

/// One line of porcelain status: two-letter code and path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusEntry {
    pub code: String,
    pub path: String,
}

/// Compact working-tree status, sorted so equal trees compare equal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkingTreeSummary {
    entries: Vec<StatusEntry>,
}

impl WorkingTreeSummary {
    pub fn new(mut entries: Vec<StatusEntry>) -> Self {
        entries.sort();
        entries.dedup();
        Self { entries }
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.entries
    }

    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Short human-readable summary, e.g. `M src/lib.rs, ?? notes.txt (+2 more)`
    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return "clean".to_string();
        }
        let shown: Vec<String> = self
            .entries
            .iter()
            .take(SUMMARY_ENTRIES)
            .map(|e| format!("{} {}", e.code, e.path))
            .collect();
        let mut text = shown.join(", ");
        if self.entries.len() > SUMMARY_ENTRIES {
            text.push_str(&format!(" (+{} more)", self.entries.len() - SUMMARY_ENTRIES));
        }
        text
    }
}

/// Point-in-time read of one repository
///
/// All fields are read together and compared as a unit; nothing here claims
/// cross-field atomicity beyond that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub branch: Branch,
    pub head_commit: String,
    pub working_tree: WorkingTreeSummary,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub local_branches: BTreeSet<String>,
    pub remote_branches: BTreeSet<String>,
    pub remote_urls: BTreeMap<String, String>,
    pub read_at: DateTime<Utc>,
}

impl RepositorySnapshot {
    /// Snapshot with only the load-bearing fields set
    pub fn new(branch: Branch, head_commit: impl Into<String>) -> Self {
        Self {
            branch,
            head_commit: head_commit.into(),
            working_tree: WorkingTreeSummary::default(),
            upstream: None,
            ahead: 0,
            behind: 0,
            local_branches: BTreeSet::new(),
            remote_branches: BTreeSet::new(),
            remote_urls: BTreeMap::new(),
            read_at: Utc::now(),
        }
    }

    /// Whether periodic remote polling applies to this repository
    pub fn has_remote(&self) -> bool {
        !self.remote_urls.is_empty()
    }

    pub fn with_local_branches<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.local_branches = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_remote_branches<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remote_branches = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_upstream(mut self, upstream: impl Into<String>, ahead: u32, behind: u32) -> Self {
        self.upstream = Some(upstream.into());
        self.ahead = ahead;
        self.behind = behind;
        self
    }

    pub fn with_remote(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.remote_urls.insert(name.into(), url.into());
        self
    }

    pub fn with_working_tree(mut self, entries: Vec<StatusEntry>) -> Self {
        self.working_tree = WorkingTreeSummary::new(entries);
        self
    }
}
