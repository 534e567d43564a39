//! ActivityClassifier - turns two consecutive snapshots into activity events
//!
//! Detectors run in a fixed order and every one that matches contributes:
//!
//! 1. local branch created
//! 2. remote branch created
//! 3. branch switch
//! 4. merge (new head with more than one parent)
//! 5. commit (new head, not a merge)
//! 6. remote update (ahead/behind changed)
//! 7. push (remote poll only, from remote-tracking reflogs)
//! 8. worktree change (only when nothing above fired)
//!
//! A failed metadata read turns that one detector into an ERROR event; the
//! rest of the pass carries on.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::inspector::CommitInspector;
use super::types::{ActivityDetails, ActivityEvent, BranchScope};
use crate::error::MonitorError;
use crate::git::GitError;
use crate::snapshot::{Branch, RepositorySnapshot};

/// Remote-tracking reflogs read at once during push detection
const REFLOG_CONCURRENCY: usize = 4;

/// Which path triggered the classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyMode {
    /// Filesystem-triggered cycle; push detection is off
    Watch,
    /// Periodic remote poll; pushes recorded after `since` are reported
    RemotePoll { since: DateTime<Utc> },
}

/// Identity and mode for one classification pass
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub project_id: &'a str,
    pub repository_id: &'a str,
    pub path: &'a Path,
    pub mode: ClassifyMode,
}

/// Compares snapshots and asks an inspector for the few facts a diff cannot show
#[derive(Clone)]
pub struct ActivityClassifier {
    inspector: Arc<dyn CommitInspector>,
}

impl ActivityClassifier {
    pub fn new(inspector: Arc<dyn CommitInspector>) -> Self {
        Self { inspector }
    }

    /// Classify the transition `previous -> current`
    ///
    /// Returns nothing when there is no previous snapshot. Never fails; metadata
    /// errors come back as ERROR events in detector order.
    pub async fn classify(
        &self,
        previous: Option<&RepositorySnapshot>,
        current: &RepositorySnapshot,
        ctx: &ClassifyContext<'_>,
    ) -> Vec<ActivityEvent> {
        debug!(repository_id = %ctx.repository_id, mode = ?ctx.mode, "ActivityClassifier::classify: called");
        let Some(previous) = previous else {
            debug!("ActivityClassifier::classify: no baseline, nothing to diff");
            return Vec::new();
        };

        let mut details = Vec::new();
        details.extend(created_branches(previous, current));
        details.extend(branch_switch(previous, current));
        details.extend(self.head_change(previous, current, ctx.path).await);
        details.extend(remote_update(previous, current));
        if let ClassifyMode::RemotePoll { since } = ctx.mode {
            details.extend(self.pushes(current, ctx.path, since).await);
        }
        if details.is_empty()
            && let Some(change) = self.worktree_change(previous, current, ctx.path).await
        {
            details.push(change);
        }

        debug!(count = details.len(), "ActivityClassifier::classify: detectors done");
        details
            .into_iter()
            .map(|d| ActivityEvent::new(ctx.project_id, ctx.repository_id, d))
            .collect()
    }

    /// MERGE when the new head has several parents, COMMIT otherwise
    async fn head_change(
        &self,
        previous: &RepositorySnapshot,
        current: &RepositorySnapshot,
        path: &Path,
    ) -> Option<ActivityDetails> {
        if current.head_commit == previous.head_commit {
            return None;
        }
        let head = &current.head_commit;
        let parents = match self.inspector.parent_count(path, head).await {
            Ok(count) => count,
            Err(e) => return Some(auxiliary_failure("merge", e)),
        };
        if parents > 1 {
            return Some(ActivityDetails::Merge {
                branch: current.branch.clone(),
                head: head.clone(),
                parent_count: parents,
            });
        }
        match self.inspector.commit_info(path, head).await {
            Ok(info) => Some(ActivityDetails::Commit {
                branch: current.branch.clone(),
                head: head.clone(),
                author: info.author,
                subject: info.subject,
            }),
            Err(e) => Some(auxiliary_failure("commit", e)),
        }
    }

    /// Pushes recorded on any remote-tracking ref since `since`, oldest first
    ///
    /// Each push names the remote ref it moved, which need not be the checked
    /// out branch or its upstream. Reflog times are whole seconds, so `since`
    /// is truncated and the bound is inclusive: a push in the same second as
    /// the previous poll can be reported twice but is never dropped.
    async fn pushes(&self, current: &RepositorySnapshot, path: &Path, since: DateTime<Utc>) -> Vec<ActivityDetails> {
        let since = since.trunc_subsecs(0);
        let reads: Vec<_> = current
            .remote_branches
            .iter()
            .map(|remote_ref| async move { (remote_ref, self.inspector.remote_reflog(path, remote_ref).await) })
            .collect();
        let reads: Vec<_> = stream::iter(reads)
            .buffered(REFLOG_CONCURRENCY)
            .collect()
            .await;

        let mut pushed = Vec::new();
        let mut failures = Vec::new();
        for (remote_ref, read) in reads {
            match read {
                Ok(entries) => pushed.extend(
                    entries
                        .into_iter()
                        .rev()
                        .filter(|entry| entry.is_push() && entry.at >= since)
                        .map(|entry| (entry.at, remote_ref, entry.commit)),
                ),
                Err(e) => failures.push(auxiliary_failure("push", e)),
            }
        }
        // Stable: same-second pushes keep ref name order
        pushed.sort_by_key(|(at, _, _)| *at);
        debug!(count = pushed.len(), failed = failures.len(), "ActivityClassifier::pushes: reflogs scanned");

        pushed
            .into_iter()
            .map(|(_, remote_ref, head)| ActivityDetails::Push {
                branch: Branch::named(remote_ref.as_str()),
                head,
            })
            .chain(failures)
            .collect()
    }

    async fn worktree_change(
        &self,
        previous: &RepositorySnapshot,
        current: &RepositorySnapshot,
        path: &Path,
    ) -> Option<ActivityDetails> {
        if current.working_tree == previous.working_tree {
            return None;
        }
        match self.inspector.diff_stat(path).await {
            Ok(stat) => Some(ActivityDetails::WorktreeChange {
                summary: current.working_tree.summary(),
                changed_paths: current.working_tree.len(),
                stat,
            }),
            Err(e) => Some(auxiliary_failure("worktree", e)),
        }
    }
}

/// One event per new branch name, local before remote, in name order
fn created_branches(previous: &RepositorySnapshot, current: &RepositorySnapshot) -> Vec<ActivityDetails> {
    let local = current
        .local_branches
        .difference(&previous.local_branches)
        .map(|name| (name, BranchScope::Local));
    let remote = current
        .remote_branches
        .difference(&previous.remote_branches)
        .map(|name| (name, BranchScope::Remote));
    local
        .chain(remote)
        .map(|(name, scope)| ActivityDetails::BranchCreated {
            name: name.clone(),
            scope,
        })
        .collect()
}

fn branch_switch(previous: &RepositorySnapshot, current: &RepositorySnapshot) -> Option<ActivityDetails> {
    (current.branch != previous.branch).then(|| ActivityDetails::BranchSwitch {
        from: previous.branch.clone(),
        to: current.branch.clone(),
    })
}

/// Ahead/behind counts moved
fn remote_update(previous: &RepositorySnapshot, current: &RepositorySnapshot) -> Option<ActivityDetails> {
    let changed = current.ahead != previous.ahead || current.behind != previous.behind;
    changed.then(|| ActivityDetails::RemoteUpdate {
        branch: current.branch.clone(),
        ahead: current.ahead,
        behind: current.behind,
    })
}

fn auxiliary_failure(detector: &'static str, source: GitError) -> ActivityDetails {
    let details = ActivityDetails::error(detector, &source);
    let err = MonitorError::ClassificationAuxiliaryFailed { detector, source };
    warn!(error = %err, "Detector metadata read failed, reporting ERROR event");
    details
}
