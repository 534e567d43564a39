//! Auxiliary metadata reads used by individual detectors

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::DiffStat;
use crate::git::{CommandRunner, GitError, parse};

/// Reflog subject git writes when a push moves a remote-tracking ref
pub const PUSH_REFLOG_SUBJECT: &str = "update by push";

/// How many reflog entries one push scan looks at
const REFLOG_SCAN_LIMIT: &str = "100";

/// Author and subject of one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub author: String,
    pub subject: String,
}

/// One movement of a reference, as recorded in its reflog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflogEntry {
    pub commit: String,
    pub at: DateTime<Utc>,
    pub subject: String,
}

impl ReflogEntry {
    pub fn is_push(&self) -> bool {
        self.subject.starts_with(PUSH_REFLOG_SUBJECT)
    }
}

/// Per-detector metadata queries
///
/// Each call is independent; a failure affects only the detector that asked.
#[async_trait]
pub trait CommitInspector: Send + Sync {
    /// Number of parents of `commit`
    async fn parent_count(&self, path: &Path, commit: &str) -> Result<usize, GitError>;

    /// Author and subject of `commit`
    async fn commit_info(&self, path: &Path, commit: &str) -> Result<CommitInfo, GitError>;

    /// Line statistics of uncommitted changes against HEAD
    async fn diff_stat(&self, path: &Path) -> Result<DiffStat, GitError>;

    /// Recent reflog of the remote-tracking ref `remote_ref` (e.g. `origin/main`), newest first
    async fn remote_reflog(&self, path: &Path, remote_ref: &str) -> Result<Vec<ReflogEntry>, GitError>;
}

/// Answers metadata queries with git subprocesses
#[derive(Clone)]
pub struct GitInspector {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl GitInspector {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        debug!(?timeout, "GitInspector::new: called");
        Self { runner, timeout }
    }
}

fn parse_error(args: &[&str], message: &str) -> GitError {
    GitError::Parse {
        command: format!("git {}", args.join(" ")),
        message: message.to_string(),
    }
}

#[async_trait]
impl CommitInspector for GitInspector {
    async fn parent_count(&self, path: &Path, commit: &str) -> Result<usize, GitError> {
        debug!(%commit, "GitInspector::parent_count: called");
        let args = ["rev-list", "--parents", "-n", "1", commit];
        let out = self.runner.run(&args, path, self.timeout).await?;
        parse::parse_parent_count(&out).ok_or_else(|| parse_error(&args, "empty rev-list output"))
    }

    async fn commit_info(&self, path: &Path, commit: &str) -> Result<CommitInfo, GitError> {
        debug!(%commit, "GitInspector::commit_info: called");
        let args = ["log", "-1", "--format=%an%x1f%s", commit];
        let out = self.runner.run(&args, path, self.timeout).await?;
        parse::parse_commit_info(&out).ok_or_else(|| parse_error(&args, "missing author or subject"))
    }

    async fn diff_stat(&self, path: &Path) -> Result<DiffStat, GitError> {
        debug!(path = %path.display(), "GitInspector::diff_stat: called");
        let out = self.runner.run(&["diff", "HEAD", "--numstat"], path, self.timeout).await?;
        Ok(parse::parse_numstat(&out))
    }

    async fn remote_reflog(&self, path: &Path, remote_ref: &str) -> Result<Vec<ReflogEntry>, GitError> {
        debug!(%remote_ref, "GitInspector::remote_reflog: called");
        let refname = format!("refs/remotes/{}", remote_ref);
        let args = [
            "log",
            "-g",
            "-n",
            REFLOG_SCAN_LIMIT,
            "--date=unix",
            "--format=%H%x1f%gd%x1f%gs",
            refname.as_str(),
        ];
        let out = self.runner.run(&args, path, self.timeout).await?;
        Ok(parse::parse_reflog(&out))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Scripted metadata answers for classifier tests
    ///
    /// Unscripted commits have one parent and a placeholder author; scripting a
    /// query as failing makes it return `CommandFailed`.
    #[derive(Default)]
    pub struct MockInspector {
        parents: Mutex<HashMap<String, usize>>,
        infos: Mutex<HashMap<String, CommitInfo>>,
        stat: Mutex<DiffStat>,
        reflogs: Mutex<HashMap<String, Vec<ReflogEntry>>>,
        failing: Mutex<HashSet<&'static str>>,
    }

    impl MockInspector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_parents(&self, commit: &str, count: usize) {
            self.parents.lock().unwrap().insert(commit.to_string(), count);
        }

        pub fn set_info(&self, commit: &str, author: &str, subject: &str) {
            self.infos.lock().unwrap().insert(
                commit.to_string(),
                CommitInfo {
                    author: author.to_string(),
                    subject: subject.to_string(),
                },
            );
        }

        pub fn set_stat(&self, stat: DiffStat) {
            *self.stat.lock().unwrap() = stat;
        }

        /// Append an entry to the reflog of `remote_ref`; entries are returned newest first
        pub fn push_reflog(&self, remote_ref: &str, commit: &str, at: DateTime<Utc>, subject: &str) {
            let mut reflogs = self.reflogs.lock().unwrap();
            let reflog = reflogs.entry(remote_ref.to_string()).or_default();
            reflog.push(ReflogEntry {
                commit: commit.to_string(),
                at,
                subject: subject.to_string(),
            });
            reflog.sort_by(|a, b| b.at.cmp(&a.at));
        }

        /// Make one query fail: "parent_count", "commit_info", "diff_stat" or "remote_reflog"
        pub fn fail(&self, query: &'static str) {
            self.failing.lock().unwrap().insert(query);
        }

        fn check(&self, query: &'static str, command: String) -> Result<(), GitError> {
            if self.failing.lock().unwrap().contains(query) {
                return Err(GitError::CommandFailed {
                    command,
                    code: Some(128),
                    stderr: format!("scripted {} failure", query),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CommitInspector for MockInspector {
        async fn parent_count(&self, _path: &Path, commit: &str) -> Result<usize, GitError> {
            self.check("parent_count", format!("git rev-list --parents -n 1 {}", commit))?;
            Ok(self.parents.lock().unwrap().get(commit).copied().unwrap_or(1))
        }

        async fn commit_info(&self, _path: &Path, commit: &str) -> Result<CommitInfo, GitError> {
            self.check("commit_info", format!("git log -1 --format=%an%x1f%s {}", commit))?;
            let info = self.infos.lock().unwrap().get(commit).cloned();
            Ok(info.unwrap_or_else(|| CommitInfo {
                author: "Test Author".to_string(),
                subject: format!("commit {}", commit),
            }))
        }

        async fn diff_stat(&self, _path: &Path) -> Result<DiffStat, GitError> {
            self.check("diff_stat", "git diff HEAD --numstat".to_string())?;
            Ok(*self.stat.lock().unwrap())
        }

        async fn remote_reflog(&self, _path: &Path, remote_ref: &str) -> Result<Vec<ReflogEntry>, GitError> {
            self.check("remote_reflog", format!("git log -g refs/remotes/{}", remote_ref))?;
            Ok(self.reflogs.lock().unwrap().get(remote_ref).cloned().unwrap_or_default())
        }
    }
}
