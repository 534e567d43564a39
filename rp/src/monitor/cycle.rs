//! Read-classify-emit cycles shared by the watcher and the remote poll

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::state::{MonitorContext, RepositoryState};
use crate::activity::{ActivityDetails, ClassifyContext, ClassifyMode};
use crate::error::MonitorError;

/// Result of one remote poll of one repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Classified { events: usize },
    /// No remote, or watching stopped
    Skipped,
    /// Refresh or read failed; an ERROR event was emitted
    Failed,
    Cancelled,
}

fn failure_details(context: &str, err: &MonitorError) -> ActivityDetails {
    match err.git_error() {
        Some(git) => ActivityDetails::error(context, git),
        None => ActivityDetails::Error {
            context: context.to_string(),
            command: None,
            message: err.to_string(),
        },
    }
}

impl RepositoryState {
    /// Take the initial baseline; emits nothing
    ///
    /// Returns false when the read failed. The next successful cycle seeds
    /// the baseline instead.
    pub async fn seed(&self, ctx: &MonitorContext) -> bool {
        debug!(repository_id = %self.id(), "RepositoryState::seed: called");
        let mut baseline = self.baseline.lock().await;
        let read = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            read = ctx.reader.read(self.path()) => read,
        };
        match read {
            Ok(snapshot) => {
                ctx.record(self.repository(), &snapshot).await;
                baseline.snapshot = Some(snapshot);
                true
            }
            Err(e) => {
                warn!(repository_id = %self.id(), error = %e, "Seed read failed, baseline left empty");
                false
            }
        }
    }

    /// One debounce-triggered cycle; returns the number of events emitted
    ///
    /// A failed read emits one ERROR event and keeps the old baseline.
    pub async fn watch_cycle(&self, ctx: &MonitorContext) -> usize {
        debug!(repository_id = %self.id(), "RepositoryState::watch_cycle: called");
        let mut baseline = self.baseline.lock().await;
        if !baseline.active || self.is_cancelled() {
            return 0;
        }

        let read = tokio::select! {
            _ = self.cancel.cancelled() => return 0,
            read = ctx.reader.read(self.path()) => read,
        };
        let current = match read {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(repository_id = %self.id(), error = %e, "Snapshot read failed");
                if self.is_cancelled() {
                    return 0;
                }
                ctx.emit(self.repository(), ActivityDetails::error("snapshot", &e));
                return 1;
            }
        };

        let cctx = ClassifyContext {
            project_id: &self.repository().project_id,
            repository_id: self.id(),
            path: self.path(),
            mode: ClassifyMode::Watch,
        };
        let events = tokio::select! {
            _ = self.cancel.cancelled() => return 0,
            events = ctx.classifier.classify(baseline.snapshot.as_ref(), &current, &cctx) => events,
        };
        if self.is_cancelled() {
            debug!(repository_id = %self.id(), "RepositoryState::watch_cycle: stopped mid-cycle, result dropped");
            return 0;
        }

        ctx.record(self.repository(), &current).await;
        baseline.snapshot = Some(current);
        let count = events.len();
        for event in events {
            ctx.sink.emit(event);
        }
        debug!(repository_id = %self.id(), count, "RepositoryState::watch_cycle: done");
        count
    }

    /// Fetch, read and classify with push detection
    ///
    /// `window` bounds the push search before the first successful poll;
    /// after that the previous poll time is the lower bound. Without a
    /// baseline the read only seeds one and nothing is emitted.
    pub async fn remote_poll(&self, ctx: &MonitorContext, window: Duration) -> PollOutcome {
        debug!(repository_id = %self.id(), "RepositoryState::remote_poll: called");
        let mut baseline = self.baseline.lock().await;
        if !baseline.active || self.is_cancelled() {
            return PollOutcome::Skipped;
        }
        if baseline.snapshot.as_ref().is_some_and(|previous| !previous.has_remote()) {
            return PollOutcome::Skipped;
        }

        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        // Taken before the fetch so pushes landing while it runs fall after it
        let polled_at = Utc::now();
        let since = baseline.last_successful_poll.unwrap_or(polled_at - window);

        let read = tokio::select! {
            _ = self.cancel.cancelled() => return PollOutcome::Cancelled,
            read = ctx.reader.read_with_refresh(self.path()) => read,
        };
        let current = match read {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(repository_id = %self.id(), error = %e, "Remote poll failed");
                if self.is_cancelled() {
                    return PollOutcome::Cancelled;
                }
                let context = match e {
                    MonitorError::RemoteRefresh(_) => "remote_refresh",
                    _ => "snapshot",
                };
                ctx.emit(self.repository(), failure_details(context, &e));
                return PollOutcome::Failed;
            }
        };

        let Some(previous) = baseline.snapshot.clone() else {
            if self.is_cancelled() {
                return PollOutcome::Cancelled;
            }
            ctx.record(self.repository(), &current).await;
            baseline.snapshot = Some(current);
            baseline.last_successful_poll = Some(polled_at);
            info!(repository_id = %self.id(), "Baseline seeded by remote poll");
            return PollOutcome::Classified { events: 0 };
        };

        let cctx = ClassifyContext {
            project_id: &self.repository().project_id,
            repository_id: self.id(),
            path: self.path(),
            mode: ClassifyMode::RemotePoll { since },
        };
        let events = tokio::select! {
            _ = self.cancel.cancelled() => return PollOutcome::Cancelled,
            events = ctx.classifier.classify(Some(&previous), &current, &cctx) => events,
        };
        if self.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        ctx.record(self.repository(), &current).await;
        baseline.snapshot = Some(current);
        baseline.last_successful_poll = Some(polled_at);
        let count = events.len();
        for event in events {
            ctx.sink.emit(event);
        }
        if count > 0 {
            info!(repository_id = %self.id(), count, "Remote poll produced activity");
        }
        PollOutcome::Classified { events: count }
    }
}
