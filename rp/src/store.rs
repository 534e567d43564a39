//! Persistence for watched repositories and last known good snapshots
//!
//! Layout under the store directory:
//!
//! ```text
//! repositories.json          watched repository list
//! snapshots/<id>.json        last snapshot that classified successfully
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::MonitorError;
use crate::monitor::WatchedRepository;
use crate::snapshot::RepositorySnapshot;

/// What the engine needs from storage
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Every repository that should be watched at startup
    async fn load_watched_repositories(&self) -> Result<Vec<WatchedRepository>, MonitorError>;

    /// Remember the snapshot a repository last classified against
    async fn record_snapshot(&self, repository_id: &str, snapshot: &RepositorySnapshot) -> Result<(), MonitorError>;
}

/// JSON-file store
pub struct JsonStore {
    store_path: PathBuf,
}

fn store_err(context: &str, e: impl std::fmt::Display) -> MonitorError {
    MonitorError::Store(format!("{}: {}", context, e))
}

impl JsonStore {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        let path = store_path.into();
        debug!(?path, "JsonStore::new: called");
        Self { store_path: path }
    }

    pub fn path(&self) -> &Path {
        &self.store_path
    }

    fn repositories_file(&self) -> PathBuf {
        self.store_path.join("repositories.json")
    }

    fn snapshot_file(&self, repository_id: &str) -> Result<PathBuf, MonitorError> {
        let valid = !repository_id.is_empty()
            && repository_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(MonitorError::Store(format!("invalid repository id '{}'", repository_id)));
        }
        Ok(self.store_path.join("snapshots").join(format!("{}.json", repository_id)))
    }

    /// Replace `path` with `content` via a temp file and rename
    async fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), MonitorError> {
        debug!(?path, "JsonStore::write_atomic: called");
        let dir = path.parent().unwrap_or(&self.store_path);
        fs::create_dir_all(dir)
            .await
            .map_err(|e| store_err("create store directory", e))?;

        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| store_err("create temp file", e))?;
        file.write_all(content).await.map_err(|e| store_err("write temp file", e))?;
        file.sync_all().await.map_err(|e| store_err("sync temp file", e))?;
        drop(file);

        fs::rename(&tmp, path).await.map_err(|e| store_err("replace file", e))?;
        Ok(())
    }

    /// Overwrite the watched repository list
    pub async fn save_watched_repositories(&self, repositories: &[WatchedRepository]) -> Result<(), MonitorError> {
        debug!(count = repositories.len(), "JsonStore::save_watched_repositories: called");
        let content = serde_json::to_vec_pretty(repositories).map_err(|e| store_err("serialize repositories", e))?;
        self.write_atomic(&self.repositories_file(), &content).await
    }

    /// Last recorded snapshot, if any
    pub async fn load_snapshot(&self, repository_id: &str) -> Result<Option<RepositorySnapshot>, MonitorError> {
        debug!(%repository_id, "JsonStore::load_snapshot: called");
        let path = self.snapshot_file(repository_id)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            debug!("JsonStore::load_snapshot: no snapshot on disk");
            return Ok(None);
        }
        let content = fs::read(&path).await.map_err(|e| store_err("read snapshot", e))?;
        let snapshot = serde_json::from_slice(&content).map_err(|e| store_err("parse snapshot", e))?;
        Ok(Some(snapshot))
    }

    /// Drop the recorded snapshot of a removed repository
    pub async fn forget_snapshot(&self, repository_id: &str) -> Result<(), MonitorError> {
        debug!(%repository_id, "JsonStore::forget_snapshot: called");
        let path = self.snapshot_file(repository_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err("remove snapshot", e)),
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonStore {
    async fn load_watched_repositories(&self) -> Result<Vec<WatchedRepository>, MonitorError> {
        debug!("JsonStore::load_watched_repositories: called");
        let path = self.repositories_file();
        if !fs::try_exists(&path).await.unwrap_or(false) {
            debug!("JsonStore::load_watched_repositories: no repositories file");
            return Ok(vec![]);
        }
        let content = fs::read(&path).await.map_err(|e| store_err("read repositories", e))?;
        let repositories: Vec<WatchedRepository> =
            serde_json::from_slice(&content).map_err(|e| store_err("parse repositories", e))?;
        debug!(count = repositories.len(), "JsonStore::load_watched_repositories: loaded");
        Ok(repositories)
    }

    async fn record_snapshot(&self, repository_id: &str, snapshot: &RepositorySnapshot) -> Result<(), MonitorError> {
        debug!(%repository_id, head = %snapshot.head_commit, "JsonStore::record_snapshot: called");
        let path = self.snapshot_file(repository_id)?;
        let content = serde_json::to_vec_pretty(snapshot).map_err(|e| store_err("serialize snapshot", e))?;
        self.write_atomic(&path, &content).await
    }
}
