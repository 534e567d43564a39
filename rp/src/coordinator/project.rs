//! ProjectCoordinator - owns every watcher of one project plus the remote poll
//!
//! One coordinator per project; there is no process-wide registry. The poll
//! task only ever sees repositories that are currently watching, and each
//! poll takes the same per-repository lock as that repository's watch cycle.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::MonitorError;
use crate::monitor::{MonitorContext, PollOutcome, RepositoryState, WatchedRepository};
use crate::watcher::{RepositoryWatcher, WatchPhase};

type ActiveStates = Arc<RwLock<HashMap<String, Arc<RepositoryState>>>>;

/// Timing knobs for one coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub poll_concurrency: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: config.watcher.debounce(),
            poll_interval: config.coordinator.poll_interval(),
            poll_concurrency: config.coordinator.poll_concurrency.max(1),
        }
    }
}

/// Which repositories came up in [`ProjectCoordinator::start`]
#[derive(Debug, Default)]
#[must_use]
pub struct StartSummary {
    pub started: Vec<String>,
    pub failed: Vec<(String, MonitorError)>,
}

impl StartSummary {
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Totals of one remote-poll batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub classified: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub events: usize,
}

impl PollSummary {
    fn add(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Classified { events } => {
                self.classified += 1;
                self.events += events;
            }
            PollOutcome::Skipped => self.skipped += 1,
            PollOutcome::Failed => self.failed += 1,
            PollOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Point-in-time view of one member repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStatus {
    pub id: String,
    pub path: PathBuf,
    pub enabled: bool,
    pub watching: bool,
    pub has_baseline: bool,
    pub last_successful_poll: Option<DateTime<Utc>>,
}

struct PollTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Manages the repository watchers and remote polling of one project
pub struct ProjectCoordinator {
    project_id: String,
    ctx: Arc<MonitorContext>,
    settings: CoordinatorSettings,
    repositories: BTreeMap<String, WatchedRepository>,
    watchers: HashMap<String, RepositoryWatcher>,
    active: ActiveStates,
    poll: Option<PollTask>,
}

impl ProjectCoordinator {
    pub fn new(project_id: impl Into<String>, ctx: Arc<MonitorContext>, settings: CoordinatorSettings) -> Self {
        let project_id = project_id.into();
        debug!(%project_id, ?settings, "ProjectCoordinator::new: called");
        Self {
            project_id,
            ctx,
            settings,
            repositories: BTreeMap::new(),
            watchers: HashMap::new(),
            active: Arc::new(RwLock::new(HashMap::new())),
            poll: None,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Whether the remote poll timer is armed
    pub fn is_running(&self) -> bool {
        self.poll.is_some()
    }

    /// Member repositories, enabled or not, in id order
    pub fn repositories(&self) -> impl Iterator<Item = &WatchedRepository> {
        self.repositories.values()
    }

    /// Start a watcher per enabled repository and arm the poll timer
    ///
    /// One repository failing to start does not stop the others.
    pub async fn start(&mut self, repos: Vec<WatchedRepository>) -> StartSummary {
        info!(project_id = %self.project_id, count = repos.len(), "Starting project");
        let mut summary = StartSummary::default();

        for repo in repos {
            let id = repo.id.clone();
            match self.add_repository(repo).await {
                Ok(()) => summary.started.push(id),
                Err(e) => {
                    warn!(project_id = %self.project_id, repository_id = %id, error = %e, "Repository failed to start");
                    summary.failed.push((id, e));
                }
            }
        }

        self.arm_poll();
        info!(
            project_id = %self.project_id,
            started = summary.started.len(),
            failed = summary.failed.len(),
            "Project started"
        );
        summary
    }

    fn arm_poll(&mut self) {
        if self.poll.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.project_id.clone(),
            self.active.clone(),
            self.ctx.clone(),
            self.settings,
            cancel.clone(),
        ));
        self.poll = Some(PollTask { cancel, task });
        debug!(project_id = %self.project_id, interval = ?self.settings.poll_interval, "ProjectCoordinator::arm_poll: timer armed");
    }

    /// Add one repository without touching the others
    ///
    /// An enabled repository that fails to start is not added.
    pub async fn add_repository(&mut self, repo: WatchedRepository) -> Result<(), MonitorError> {
        debug!(project_id = %self.project_id, repository_id = %repo.id, "ProjectCoordinator::add_repository: called");
        if self.repositories.contains_key(&repo.id) {
            return Err(MonitorError::DuplicateRepository(repo.id));
        }
        if repo.project_id != self.project_id {
            warn!(
                repository_id = %repo.id,
                repository_project = %repo.project_id,
                project_id = %self.project_id,
                "Repository belongs to another project, adopting it"
            );
        }

        let id = repo.id.clone();
        if repo.enabled {
            self.start_watcher(&repo).await?;
        }
        self.repositories.insert(id, repo);
        Ok(())
    }

    /// Stop and forget one repository
    pub async fn remove_repository(&mut self, id: &str) -> Result<WatchedRepository, MonitorError> {
        debug!(project_id = %self.project_id, repository_id = %id, "ProjectCoordinator::remove_repository: called");
        let repo = self
            .repositories
            .remove(id)
            .ok_or_else(|| MonitorError::UnknownRepository(id.to_string()))?;
        self.stop_watcher(id).await;
        info!(project_id = %self.project_id, repository_id = %id, "Repository removed");
        Ok(repo)
    }

    /// Start or stop one repository's watcher without removing it
    pub async fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), MonitorError> {
        debug!(project_id = %self.project_id, repository_id = %id, enabled, "ProjectCoordinator::set_enabled: called");
        let repo = self
            .repositories
            .get(id)
            .cloned()
            .ok_or_else(|| MonitorError::UnknownRepository(id.to_string()))?;
        if repo.enabled == enabled {
            return Ok(());
        }

        if enabled {
            self.start_watcher(&repo).await?;
        } else {
            self.stop_watcher(id).await;
        }
        if let Some(stored) = self.repositories.get_mut(id) {
            stored.enabled = enabled;
        }
        Ok(())
    }

    async fn start_watcher(&mut self, repo: &WatchedRepository) -> Result<(), MonitorError> {
        let mut watcher = RepositoryWatcher::new(repo.clone(), self.ctx.clone(), self.settings.debounce);
        let state = watcher.start().await?;
        self.active.write().await.insert(repo.id.clone(), state);
        self.watchers.insert(repo.id.clone(), watcher);
        Ok(())
    }

    async fn stop_watcher(&mut self, id: &str) {
        self.active.write().await.remove(id);
        if let Some(mut watcher) = self.watchers.remove(id) {
            watcher.stop().await;
        }
    }

    /// Run one remote-poll batch now, outside the timer
    pub async fn poll_now(&self) -> PollSummary {
        debug!(project_id = %self.project_id, "ProjectCoordinator::poll_now: called");
        let states: Vec<_> = self.active.read().await.values().cloned().collect();
        poll_batch(states, &self.ctx, self.settings).await
    }

    /// Status of every member repository, in id order
    pub async fn status(&self) -> Vec<RepositoryStatus> {
        let mut statuses = Vec::with_capacity(self.repositories.len());
        for repo in self.repositories.values() {
            let watcher = self.watchers.get(&repo.id);
            let watching = watcher.is_some_and(|w| w.phase() == WatchPhase::Watching);
            let (has_baseline, last_successful_poll) = match watcher.and_then(|w| w.state()) {
                Some(state) => (state.baseline().await.is_some(), state.last_successful_poll().await),
                None => (false, None),
            };
            statuses.push(RepositoryStatus {
                id: repo.id.clone(),
                path: repo.path.clone(),
                enabled: repo.enabled,
                watching,
                has_baseline,
                last_successful_poll,
            });
        }
        statuses
    }

    /// Cancel the poll timer and stop every watcher
    pub async fn stop(&mut self) {
        info!(project_id = %self.project_id, "Stopping project");
        if let Some(poll) = self.poll.take() {
            poll.cancel.cancel();
            if let Err(e) = poll.task.await {
                warn!(project_id = %self.project_id, error = %e, "Poll task ended abnormally");
            }
        }
        let ids: Vec<String> = self.watchers.keys().cloned().collect();
        for id in ids {
            self.stop_watcher(&id).await;
        }
        debug!(project_id = %self.project_id, "ProjectCoordinator::stop: done");
    }
}

impl Drop for ProjectCoordinator {
    fn drop(&mut self) {
        if let Some(poll) = &self.poll {
            poll.cancel.cancel();
        }
    }
}

/// Poll every state with bounded concurrency; one failure never affects another
async fn poll_batch(states: Vec<Arc<RepositoryState>>, ctx: &Arc<MonitorContext>, settings: CoordinatorSettings) -> PollSummary {
    let window = settings.poll_interval;
    let outcomes: Vec<PollOutcome> = futures::stream::iter(states)
        .map(|state| {
            let ctx = ctx.clone();
            async move { state.remote_poll(&ctx, window).await }
        })
        .buffer_unordered(settings.poll_concurrency.max(1))
        .collect()
        .await;

    let mut summary = PollSummary::default();
    for outcome in outcomes {
        summary.add(outcome);
    }
    summary
}

async fn poll_loop(
    project_id: String,
    active: ActiveStates,
    ctx: Arc<MonitorContext>,
    settings: CoordinatorSettings,
    cancel: CancellationToken,
) {
    debug!(%project_id, "poll_loop: started");
    let period = settings.poll_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let states: Vec<_> = active.read().await.values().cloned().collect();
                debug!(%project_id, count = states.len(), "poll_loop: tick");
                let summary = tokio::select! {
                    _ = cancel.cancelled() => break,
                    summary = poll_batch(states, &ctx, settings) => summary,
                };
                if summary.failed > 0 {
                    warn!(%project_id, failed = summary.failed, "Remote poll had failures");
                }
                debug!(%project_id, ?summary, "poll_loop: batch done");
            }
        }
    }
    debug!(%project_id, "poll_loop: exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::activity::inspector::mock::MockInspector;
    use crate::activity::{ActivityClassifier, ActivityKind};
    use crate::config::GitConfig;
    use crate::git::runner::mock::{MockResponse, MockRunner};
    use crate::sink::mock::RecordingSink;
    use crate::snapshot::StateReader;
    use crate::snapshot::fixtures::{script_repo, script_upstream};

    const FETCH: &str = "fetch --all --prune --quiet";

    struct Fixture {
        _dir: tempfile::TempDir,
        runner: Arc<MockRunner>,
        sink: Arc<RecordingSink>,
        coordinator: ProjectCoordinator,
    }

    /// A coordinator whose repositories all resolve to one fake metadata dir
    fn fixture(settings: CoordinatorSettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let git_dir = dir.path().join(".git");
        std::fs::create_dir_all(git_dir.join("refs").join("heads")).unwrap();

        let runner = Arc::new(MockRunner::new());
        let git_dir = git_dir.display().to_string();
        runner.ok(
            "rev-parse --absolute-git-dir --git-common-dir",
            &format!("{}\n{}\n", git_dir, git_dir),
        );
        script_repo(&runner, "main", "c1");
        script_upstream(&runner, "main", 0, 0);

        let sink = Arc::new(RecordingSink::new());
        let reader = StateReader::new(runner.clone(), &GitConfig::default());
        let classifier = ActivityClassifier::new(Arc::new(MockInspector::new()));
        let ctx = Arc::new(MonitorContext::new(reader, classifier, sink.clone()));
        Fixture {
            _dir: dir,
            runner,
            sink,
            coordinator: ProjectCoordinator::new("proj", ctx, settings),
        }
    }

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            debounce: Duration::from_millis(100),
            poll_interval: Duration::from_secs(120),
            poll_concurrency: 2,
        }
    }

    fn repo(id: &str) -> WatchedRepository {
        WatchedRepository::new("proj", format!("/src/{}", id)).with_id(id)
    }

    #[tokio::test]
    async fn test_start_reports_failures_per_repository() {
        let mut f = fixture(settings());
        f.runner.set_in(
            Path::new("/src/bad"),
            "rev-parse --absolute-git-dir --git-common-dir",
            MockResponse::Fail {
                code: 128,
                stderr: "fatal: not a git repository".to_string(),
            },
        );

        let summary = f.coordinator.start(vec![repo("good"), repo("bad"), repo("off").disabled()]).await;

        assert_eq!(summary.started, vec!["good".to_string(), "off".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert!(matches!(summary.failed[0].1, MonitorError::NotARepository { .. }));
        assert!(f.coordinator.is_running());

        let status = f.coordinator.status().await;
        assert_eq!(status.len(), 2);
        let good = status.iter().find(|s| s.id == "good").unwrap();
        assert!(good.watching && good.has_baseline);
        let off = status.iter().find(|s| s.id == "off").unwrap();
        assert!(!off.watching && !off.enabled);

        f.coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_repository() {
        let mut f = fixture(settings());
        f.coordinator.add_repository(repo("a")).await.unwrap();

        let err = f.coordinator.add_repository(repo("a")).await.unwrap_err();
        assert!(matches!(err, MonitorError::DuplicateRepository(_)));
        let err = f.coordinator.remove_repository("zzz").await.unwrap_err();
        assert!(matches!(err, MonitorError::UnknownRepository(_)));

        f.coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_remove_repository_leaves_siblings() {
        let mut f = fixture(settings());
        let _ = f.coordinator.start(vec![repo("a"), repo("b")]).await;

        let removed = f.coordinator.remove_repository("a").await.unwrap();
        assert_eq!(removed.id, "a");

        let status = f.coordinator.status().await;
        assert_eq!(status.len(), 1);
        assert!(status[0].watching);
        assert_eq!(status[0].id, "b");

        f.coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_poll_isolates_failures() {
        let mut f = fixture(settings());
        let _ = f.coordinator.start(vec![repo("a"), repo("b")]).await;

        f.runner.set_in(
            Path::new("/src/a"),
            FETCH,
            MockResponse::Fail {
                code: 128,
                stderr: "fatal: unable to access remote".to_string(),
            },
        );
        script_upstream(&f.runner, "main", 0, 2);

        let summary = f.coordinator.poll_now().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.classified, 1);
        let events = f.sink.events();
        let a: Vec<_> = events.iter().filter(|e| e.repository_id == "a").map(|e| e.kind()).collect();
        let b: Vec<_> = events.iter().filter(|e| e.repository_id == "b").map(|e| e.kind()).collect();
        assert_eq!(a, vec![ActivityKind::Error]);
        assert_eq!(b, vec![ActivityKind::RemoteUpdate]);

        f.coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_poll_skips_repository_without_remote() {
        let mut f = fixture(settings());
        f.runner.fail(r"config --get-regexp ^remote\..*\.url$", 1, "");
        let _ = f.coordinator.start(vec![repo("local")]).await;

        let summary = f.coordinator.poll_now().await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(f.runner.call_count(FETCH), 0);
        f.coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_set_enabled_toggles_watch() {
        let mut f = fixture(settings());
        let _ = f.coordinator.start(vec![repo("a")]).await;

        f.coordinator.set_enabled("a", false).await.unwrap();
        let status = f.coordinator.status().await;
        assert!(!status[0].enabled && !status[0].watching && !status[0].has_baseline);
        assert_eq!(f.coordinator.poll_now().await, PollSummary::default());

        f.coordinator.set_enabled("a", true).await.unwrap();
        assert!(f.coordinator.status().await[0].watching);

        f.coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_polls_until_stopped() {
        let mut f = fixture(settings());
        let _ = f.coordinator.start(vec![repo("a")]).await;
        script_upstream(&f.runner, "main", 0, 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.runner.call_count(FETCH), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(f.runner.call_count(FETCH), 1);
        assert_eq!(f.sink.kinds(), vec![ActivityKind::RemoteUpdate]);

        f.coordinator.stop().await;
        assert!(!f.coordinator.is_running());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(f.runner.call_count(FETCH), 1);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.coordinator.poll_concurrency = 0;
        let settings = CoordinatorSettings::from_config(&config);
        assert_eq!(settings.poll_concurrency, 1);
        assert_eq!(settings.poll_interval, Duration::from_secs(120));
        assert_eq!(settings.debounce, Duration::from_millis(400));
    }
}
