//! Per-repository shared state and the collaborators every cycle needs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::{ActivityClassifier, ActivityDetails, ActivityEvent, GitInspector};
use crate::config::GitConfig;
use crate::git::CommandRunner;
use crate::sink::ActivitySink;
use crate::snapshot::{RepositorySnapshot, StateReader};
use crate::store::SnapshotStore;

fn default_enabled() -> bool {
    true
}

/// A repository the engine is asked to monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedRepository {
    pub id: String,
    pub project_id: String,
    pub path: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl WatchedRepository {
    /// New enabled repository with a fresh id
    pub fn new(project_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            project_id: project_id.into(),
            path: path.into(),
            enabled: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Everything a cycle mutates, guarded by one lock per repository
#[derive(Debug, Default)]
pub(crate) struct Baseline {
    pub snapshot: Option<RepositorySnapshot>,
    pub last_successful_poll: Option<DateTime<Utc>>,
    /// Cleared by shutdown; nothing is emitted once false
    pub active: bool,
}

/// Shared state for one running repository watch
///
/// The watch cycle and the remote poll both take `baseline` for their whole
/// read-classify-replace sequence, so they never overlap for one repository
/// while unrelated repositories proceed independently.
pub struct RepositoryState {
    repo: WatchedRepository,
    pub(crate) baseline: Mutex<Baseline>,
    pub(crate) cancel: CancellationToken,
}

impl RepositoryState {
    pub fn new(repo: WatchedRepository) -> Self {
        debug!(repository_id = %repo.id, "RepositoryState::new: called");
        Self {
            repo,
            baseline: Mutex::new(Baseline {
                active: true,
                ..Baseline::default()
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn repository(&self) -> &WatchedRepository {
        &self.repo
    }

    pub fn id(&self) -> &str {
        &self.repo.id
    }

    pub fn path(&self) -> &Path {
        &self.repo.path
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Copy of the current baseline
    pub async fn baseline(&self) -> Option<RepositorySnapshot> {
        self.baseline.lock().await.snapshot.clone()
    }

    pub async fn last_successful_poll(&self) -> Option<DateTime<Utc>> {
        self.baseline.lock().await.last_successful_poll
    }

    /// Cancel in-flight work and discard the baseline
    ///
    /// Waits for a running cycle to observe the cancellation; once this
    /// returns nothing more is emitted for this repository.
    pub async fn shutdown(&self) {
        debug!(repository_id = %self.repo.id, "RepositoryState::shutdown: called");
        self.cancel.cancel();
        let mut baseline = self.baseline.lock().await;
        baseline.active = false;
        baseline.snapshot = None;
        debug!(repository_id = %self.repo.id, "RepositoryState::shutdown: baseline discarded");
    }
}

/// Collaborators shared by every watcher and poll of a coordinator
pub struct MonitorContext {
    pub reader: StateReader,
    pub classifier: ActivityClassifier,
    pub sink: Arc<dyn ActivitySink>,
    pub store: Option<Arc<dyn SnapshotStore>>,
}

impl MonitorContext {
    pub fn new(reader: StateReader, classifier: ActivityClassifier, sink: Arc<dyn ActivitySink>) -> Self {
        Self {
            reader,
            classifier,
            sink,
            store: None,
        }
    }

    /// Reader and classifier over one runner, as the binary wires them
    pub fn from_runner(runner: Arc<dyn CommandRunner>, config: &GitConfig, sink: Arc<dyn ActivitySink>) -> Self {
        let reader = StateReader::new(runner.clone(), config);
        let inspector = GitInspector::new(runner, config.command_timeout());
        Self::new(reader, ActivityClassifier::new(Arc::new(inspector)), sink)
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub(crate) fn emit(&self, repo: &WatchedRepository, details: ActivityDetails) {
        self.sink
            .emit(ActivityEvent::new(repo.project_id.as_str(), repo.id.as_str(), details));
    }

    /// Persist the new baseline; failures only cost crash recovery
    pub(crate) async fn record(&self, repo: &WatchedRepository, snapshot: &RepositorySnapshot) {
        if let Some(store) = &self.store
            && let Err(e) = store.record_snapshot(&repo.id, snapshot).await
        {
            warn!(repository_id = %repo.id, error = %e, "Failed to record snapshot");
        }
    }
}
