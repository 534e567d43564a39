//! RepositoryWatcher - one repository's filesystem watch lifecycle
//!
//! `Idle -> Starting -> Watching -> Stopping -> Idle`. While watching, raw
//! notifications from the metadata directories feed a [`Debouncer`]; each
//! fire runs one read-classify-emit cycle on the watch task, so cycles for a
//! repository never overlap.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::debounce::Debouncer;
use crate::error::MonitorError;
use crate::monitor::{MonitorContext, RepositoryState, WatchedRepository};
use crate::snapshot::GitDirs;

/// Files directly under the git dir whose change means repository state moved
const GIT_DIR_FILES: &[&str] = &["HEAD", "index", "ORIG_HEAD", "MERGE_HEAD"];

/// Lifecycle phase of a [`RepositoryWatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    Starting,
    Watching,
    Stopping,
}

impl fmt::Display for WatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Watching => "watching",
            Self::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}

/// Decides which raw notifications can change a snapshot
///
/// Lock files, objects, logs and FETCH_HEAD are ignored so git's own churn
/// (and our own fetches) do not trigger cycles.
#[derive(Debug, Clone)]
pub struct PathFilter {
    git_dir: PathBuf,
    common_dir: PathBuf,
}

impl PathFilter {
    pub fn new(dirs: &GitDirs) -> Self {
        Self {
            git_dir: dirs.git_dir.clone(),
            common_dir: dirs.common_dir.clone(),
        }
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.ends_with(".lock") {
            return false;
        }
        let parent = path.parent();
        if parent == Some(self.git_dir.as_path()) && GIT_DIR_FILES.contains(&name) {
            return true;
        }
        if parent == Some(self.common_dir.as_path()) && name == "packed-refs" {
            return true;
        }
        path.starts_with(self.common_dir.join("refs"))
    }
}

struct Running {
    state: Arc<RepositoryState>,
    // Dropping the watcher unregisters every watch
    watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

/// Watches one repository and forwards its activity to the context's sink
pub struct RepositoryWatcher {
    repo: WatchedRepository,
    ctx: Arc<MonitorContext>,
    debounce: Duration,
    phase: WatchPhase,
    running: Option<Running>,
}

impl RepositoryWatcher {
    pub fn new(repo: WatchedRepository, ctx: Arc<MonitorContext>, debounce: Duration) -> Self {
        debug!(repository_id = %repo.id, path = %repo.path.display(), ?debounce, "RepositoryWatcher::new: called");
        Self {
            repo,
            ctx,
            debounce,
            phase: WatchPhase::Idle,
            running: None,
        }
    }

    pub fn repository(&self) -> &WatchedRepository {
        &self.repo
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    /// Shared state while watching
    pub fn state(&self) -> Option<&Arc<RepositoryState>> {
        self.running.as_ref().map(|r| &r.state)
    }

    /// Register the watch and seed the baseline
    ///
    /// Fails only when the path is not a repository or the watch cannot be
    /// registered; a failed seed read is logged and retried by the next cycle.
    pub async fn start(&mut self) -> Result<Arc<RepositoryState>, MonitorError> {
        debug!(repository_id = %self.repo.id, phase = %self.phase, "RepositoryWatcher::start: called");
        if let Some(running) = &self.running {
            debug!("RepositoryWatcher::start: already watching");
            return Ok(running.state.clone());
        }
        self.phase = WatchPhase::Starting;

        let started = self.start_inner().await;
        match started {
            Ok(running) => {
                let state = running.state.clone();
                self.running = Some(running);
                self.phase = WatchPhase::Watching;
                info!(repository_id = %self.repo.id, path = %self.repo.path.display(), "Watching repository");
                Ok(state)
            }
            Err(e) => {
                warn!(repository_id = %self.repo.id, error = %e, "Failed to start watching");
                self.phase = WatchPhase::Idle;
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<Running, MonitorError> {
        let dirs = self
            .ctx
            .reader
            .git_dirs(&self.repo.path)
            .await
            .map_err(|source| MonitorError::NotARepository {
                path: self.repo.path.clone(),
                source,
            })?;
        let dirs = canonical_dirs(dirs).await;
        debug!(git_dir = %dirs.git_dir.display(), common_dir = %dirs.common_dir.display(), "RepositoryWatcher::start: resolved metadata dirs");

        let (tx, rx) = mpsc::unbounded_channel();
        // Registered before seeding so nothing between the two is missed
        let watcher = register(&dirs, PathFilter::new(&dirs), tx)?;

        let state = Arc::new(RepositoryState::new(self.repo.clone()));
        state.seed(&self.ctx).await;

        let task = tokio::spawn(run_loop(state.clone(), self.ctx.clone(), rx, self.debounce));
        Ok(Running {
            state,
            watcher,
            task,
        })
    }

    /// Unregister the watch and discard the baseline
    ///
    /// Pending debounce fires are dropped and in-flight reads are swallowed.
    pub async fn stop(&mut self) {
        debug!(repository_id = %self.repo.id, phase = %self.phase, "RepositoryWatcher::stop: called");
        let Some(running) = self.running.take() else {
            self.phase = WatchPhase::Idle;
            return;
        };
        self.phase = WatchPhase::Stopping;

        running.state.shutdown().await;
        drop(running.watcher);
        if let Err(e) = running.task.await {
            warn!(repository_id = %self.repo.id, error = %e, "Watch task ended abnormally");
        }

        self.phase = WatchPhase::Idle;
        info!(repository_id = %self.repo.id, "Stopped watching repository");
    }
}

impl Drop for RepositoryWatcher {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.state.cancel_token().cancel();
        }
    }
}

/// Resolve symlinks so notification paths match the filter
async fn canonical_dirs(dirs: GitDirs) -> GitDirs {
    GitDirs {
        git_dir: canonical(dirs.git_dir).await,
        common_dir: canonical(dirs.common_dir).await,
    }
}

async fn canonical(path: PathBuf) -> PathBuf {
    match tokio::fs::canonicalize(&path).await {
        Ok(resolved) => resolved,
        Err(_) => path,
    }
}

fn register(
    dirs: &GitDirs,
    filter: PathFilter,
    tx: mpsc::UnboundedSender<()>,
) -> Result<RecommendedWatcher, MonitorError> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            if event.paths.iter().any(|p| filter.is_relevant(p)) {
                let _ = tx.send(());
            }
        }
        Err(e) => warn!(error = %e, "Filesystem watch error"),
    })
    .map_err(|source| MonitorError::WatchRegistrationFailed {
        path: dirs.git_dir.clone(),
        source,
    })?;

    let mut targets = vec![(dirs.git_dir.clone(), RecursiveMode::NonRecursive)];
    if dirs.common_dir != dirs.git_dir {
        targets.push((dirs.common_dir.clone(), RecursiveMode::NonRecursive));
    }
    targets.push((dirs.common_dir.join("refs"), RecursiveMode::Recursive));

    for (path, mode) in targets {
        debug!(path = %path.display(), ?mode, "register: adding watch");
        watcher
            .watch(&path, mode)
            .map_err(|source| MonitorError::WatchRegistrationFailed { path, source })?;
    }
    Ok(watcher)
}

/// Debounce notifications and run cycles until cancelled
pub(crate) async fn run_loop(
    state: Arc<RepositoryState>,
    ctx: Arc<MonitorContext>,
    mut rx: mpsc::UnboundedReceiver<()>,
    window: Duration,
) {
    debug!(repository_id = %state.id(), "run_loop: started");
    let cancel = state.cancel_token();
    let mut debouncer = Debouncer::new(window);

    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(()) => debouncer.record(Instant::now()),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                let absorbed = debouncer.pending();
                if debouncer.poll(Instant::now()) {
                    debug!(
                        repository_id = %state.id(),
                        absorbed,
                        window = ?debouncer.window(),
                        "run_loop: quiet period reached"
                    );
                    loop {
                        state.watch_cycle(&ctx).await;
                        // Changes made while the cycle ran are re-evaluated without a new window
                        let arrived = drain(&mut rx);
                        if arrived == 0 || cancel.is_cancelled() {
                            break;
                        }
                        debug!(repository_id = %state.id(), arrived, "run_loop: notified during cycle, running again");
                    }
                }
            }
        }
    }

    if debouncer.is_pending() {
        debug!(repository_id = %state.id(), dropped = debouncer.pending(), "run_loop: pending fire dropped");
    }
    debouncer.cancel();
    debug!(repository_id = %state.id(), "run_loop: exited");
}

/// Take every queued notification; returns how many there were
fn drain(rx: &mut mpsc::UnboundedReceiver<()>) -> usize {
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    count
}
