//! StateReader - composes git reads into one consistent snapshot

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::types::{Branch, RepositorySnapshot, WorkingTreeSummary};
use crate::config::GitConfig;
use crate::error::MonitorError;
use crate::git::{CommandRunner, GitError, parse};

/// Metadata directories of a repository
///
/// For a linked worktree `git_dir` holds HEAD and index while `common_dir`
/// holds the shared `refs/` tree. For a normal clone they are the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitDirs {
    pub git_dir: PathBuf,
    pub common_dir: PathBuf,
}

/// Reads repository state through a [`CommandRunner`]
#[derive(Clone)]
pub struct StateReader {
    runner: Arc<dyn CommandRunner>,
    command_timeout: Duration,
    liveness_timeout: Duration,
    fetch_timeout: Duration,
}

impl StateReader {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &GitConfig) -> Self {
        debug!(?config, "StateReader::new: called");
        Self {
            runner,
            command_timeout: config.command_timeout(),
            liveness_timeout: config.liveness_timeout(),
            fetch_timeout: config.fetch_timeout(),
        }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    async fn git(&self, path: &Path, args: &[&str]) -> Result<String, GitError> {
        self.runner.run(args, path, self.command_timeout).await
    }

    /// Resolve the metadata directories, failing fast if `path` is not a repository
    pub async fn git_dirs(&self, path: &Path) -> Result<GitDirs, GitError> {
        debug!(path = %path.display(), "StateReader::git_dirs: called");
        let args = ["rev-parse", "--absolute-git-dir", "--git-common-dir"];
        let out = self.runner.run(&args, path, self.liveness_timeout).await?;
        let mut lines = out.lines().map(str::trim).filter(|l| !l.is_empty());
        let (Some(git_dir), Some(common_dir)) = (lines.next(), lines.next()) else {
            return Err(GitError::Parse {
                command: format!("git {}", args.join(" ")),
                message: "expected two lines".to_string(),
            });
        };
        let git_dir = PathBuf::from(git_dir);
        let common_dir = PathBuf::from(common_dir);
        // Older git prints the common dir relative to the working directory
        let common_dir = if common_dir.is_absolute() {
            common_dir
        } else {
            path.join(common_dir)
        };
        Ok(GitDirs { git_dir, common_dir })
    }

    /// Read one snapshot of the repository at `path`
    ///
    /// Sub-reads run concurrently. Branch and head are load-bearing and fail
    /// the whole read; every other field degrades to its default.
    pub async fn read(&self, path: &Path) -> Result<RepositorySnapshot, GitError> {
        debug!(path = %path.display(), "StateReader::read: called");

        let (branch, head, status, upstream, counts, local, remote, remotes) = tokio::join!(
            self.git(path, &["symbolic-ref", "--quiet", "--short", "HEAD"]),
            self.git(path, &["rev-parse", "--verify", "HEAD"]),
            self.git(path, &["status", "--porcelain", "--untracked-files=normal"]),
            self.git(path, &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{upstream}"]),
            self.git(path, &["rev-list", "--left-right", "--count", "HEAD...@{upstream}"]),
            self.git(path, &["for-each-ref", "--format=%(refname)", "refs/heads/"]),
            self.git(path, &["for-each-ref", "--format=%(refname)", "refs/remotes/"]),
            self.git(path, &["config", "--get-regexp", r"^remote\..*\.url$"]),
        );

        let branch = match branch {
            Ok(out) => Branch::from(out.trim().to_string()),
            // symbolic-ref -q exits 1 silently when HEAD is detached
            Err(e) if e.exit_code() == Some(1) && e.is_quiet_failure() => Branch::Detached,
            Err(e) => {
                debug!(error = %e, "StateReader::read: branch read failed");
                return Err(e);
            }
        };

        let head_commit = head?.trim().to_string();
        if head_commit.is_empty() {
            return Err(GitError::Parse {
                command: "git rev-parse --verify HEAD".to_string(),
                message: "empty commit id".to_string(),
            });
        }

        let working_tree = degrade("working_tree", status.map(|out| WorkingTreeSummary::new(parse::parse_status(&out))));
        let upstream = match upstream {
            Ok(out) => Some(out.trim().to_string()).filter(|u| !u.is_empty()),
            Err(e) => {
                debug!(error = %e, "StateReader::read: no upstream");
                None
            }
        };
        let (ahead, behind) = match (&upstream, counts) {
            (Some(_), Ok(out)) => parse::parse_ahead_behind(&out).unwrap_or_else(|| {
                warn!(output = %out.trim(), "Unparseable ahead/behind counts, using 0/0");
                (0, 0)
            }),
            (Some(_), Err(e)) => {
                warn!(error = %e, "Failed to read ahead/behind counts, using 0/0");
                (0, 0)
            }
            (None, _) => (0, 0),
        };
        let local_branches = degrade("local_branches", local.map(|out| parse::parse_ref_names(&out, "refs/heads/")));
        let remote_branches = degrade(
            "remote_branches",
            remote.map(|out| parse::parse_ref_names(&out, "refs/remotes/")),
        );
        let remote_urls = degrade("remote_urls", remotes.map(|out| parse::parse_remote_urls(&out)));

        let snapshot = RepositorySnapshot {
            branch,
            head_commit,
            working_tree,
            upstream,
            ahead,
            behind,
            local_branches,
            remote_branches,
            remote_urls,
            read_at: Utc::now(),
        };
        debug!(branch = %snapshot.branch, head = %snapshot.head_commit, "StateReader::read: snapshot taken");
        Ok(snapshot)
    }

    /// Update remote-tracking refs without touching the working tree
    pub async fn refresh_remotes(&self, path: &Path) -> Result<(), GitError> {
        debug!(path = %path.display(), "StateReader::refresh_remotes: called");
        self.runner
            .run(&["fetch", "--all", "--prune", "--quiet"], path, self.fetch_timeout)
            .await?;
        Ok(())
    }

    /// Fetch from every remote, then read a snapshot
    ///
    /// Network-bound; may take seconds. Never call this from the debounce path.
    pub async fn read_with_refresh(&self, path: &Path) -> Result<RepositorySnapshot, MonitorError> {
        debug!(path = %path.display(), "StateReader::read_with_refresh: called");
        self.refresh_remotes(path).await.map_err(MonitorError::RemoteRefresh)?;
        self.read(path).await.map_err(MonitorError::Snapshot)
    }
}

/// Fall back to the field default when a non-load-bearing read fails
fn degrade<T: Default>(field: &str, result: Result<T, GitError>) -> T {
    match result {
        Ok(value) => value,
        // config --get-regexp exits 1 with no output when nothing matches
        Err(e) if e.is_quiet_failure() => {
            debug!(%field, error = %e, "degrade: empty result");
            T::default()
        }
        Err(e) => {
            warn!(%field, error = %e, "Snapshot field read failed, using default");
            T::default()
        }
    }
}

#[cfg(test)]
pub mod fixtures {
    use crate::git::runner::mock::MockRunner;

    /// Script a mock runner with a clean repository on `branch` at `head`
    pub fn script_repo(runner: &MockRunner, branch: &str, head: &str) {
        runner.ok("symbolic-ref --quiet --short HEAD", &format!("{}\n", branch));
        runner.ok("rev-parse --verify HEAD", &format!("{}\n", head));
        runner.ok("status --porcelain --untracked-files=normal", "");
        runner.fail("rev-parse --abbrev-ref --symbolic-full-name @{upstream}", 128, "fatal: no upstream");
        runner.fail("rev-list --left-right --count HEAD...@{upstream}", 128, "fatal: no upstream");
        runner.ok("for-each-ref --format=%(refname) refs/heads/", &format!("refs/heads/{}\n", branch));
        runner.ok("for-each-ref --format=%(refname) refs/remotes/", "");
        runner.fail(r"config --get-regexp ^remote\..*\.url$", 1, "");
    }

    /// Give a scripted repository an upstream with the given counts and an origin remote
    pub fn script_upstream(runner: &MockRunner, branch: &str, ahead: u32, behind: u32) {
        runner.ok(
            "rev-parse --abbrev-ref --symbolic-full-name @{upstream}",
            &format!("origin/{}\n", branch),
        );
        runner.ok(
            "rev-list --left-right --count HEAD...@{upstream}",
            &format!("{}\t{}\n", ahead, behind),
        );
        runner.ok(
            "for-each-ref --format=%(refname) refs/remotes/",
            &format!("refs/remotes/origin/HEAD\nrefs/remotes/origin/{}\n", branch),
        );
        runner.ok(
            r"config --get-regexp ^remote\..*\.url$",
            "remote.origin.url git@example.com:team/repo.git\n",
        );
        runner.ok("fetch --all --prune --quiet", "");
    }
}
