//! repopulse configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Accepted debounce window, in milliseconds
pub const DEBOUNCE_RANGE_MS: std::ops::RangeInclusive<u64> = 50..=5000;

/// Main repopulse configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Git subprocess configuration
    pub git: GitConfig,

    /// Filesystem watch configuration
    pub watcher: WatcherConfig,

    /// Remote polling configuration
    pub coordinator: CoordinatorConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.git.command_timeout_ms == 0 || self.git.liveness_timeout_ms == 0 || self.git.fetch_timeout_ms == 0 {
            return Err(eyre::eyre!("git timeouts must be non-zero"));
        }
        if !DEBOUNCE_RANGE_MS.contains(&self.watcher.debounce_ms) {
            return Err(eyre::eyre!(
                "watcher.debounce-ms must be between {} and {}, got {}",
                DEBOUNCE_RANGE_MS.start(),
                DEBOUNCE_RANGE_MS.end(),
                self.watcher.debounce_ms
            ));
        }
        if self.watcher.event_buffer == 0 {
            return Err(eyre::eyre!("watcher.event-buffer must be non-zero"));
        }
        if self.coordinator.poll_interval_secs == 0 {
            return Err(eyre::eyre!("coordinator.poll-interval-secs must be non-zero"));
        }
        if self.coordinator.poll_concurrency == 0 {
            return Err(eyre::eyre!("coordinator.poll-concurrency must be non-zero"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    /// `./.repopulse.yml`, then `<config_dir>/repopulse/repopulse.yml`
    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".repopulse.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("repopulse").join("repopulse.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Git subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Git executable
    pub program: PathBuf,

    /// Timeout for one-shot reads in milliseconds
    #[serde(rename = "command-timeout-ms")]
    pub command_timeout_ms: u64,

    /// Timeout for liveness checks (is this a repository) in milliseconds
    #[serde(rename = "liveness-timeout-ms")]
    pub liveness_timeout_ms: u64,

    /// Timeout for a network fetch in milliseconds
    #[serde(rename = "fetch-timeout-ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
            command_timeout_ms: 30_000,
            liveness_timeout_ms: 5_000,
            fetch_timeout_ms: 60_000,
        }
    }
}

impl GitConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Filesystem watch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Quiet period before a burst of notifications triggers a read
    #[serde(rename = "debounce-ms")]
    pub debounce_ms: u64,

    /// Capacity of the event channel handed to consumers
    #[serde(rename = "event-buffer")]
    pub event_buffer: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            event_buffer: 1024,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Remote polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Seconds between remote polls
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// Repositories fetched at once within one poll
    #[serde(rename = "poll-concurrency")]
    pub poll_concurrency: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 120,
            poll_concurrency: 4,
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the repository list and snapshots
    #[serde(rename = "store-dir")]
    pub store_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // ~/.local/share/repopulse on Linux
        let store_dir = dirs::data_dir()
            .map(|d| d.join("repopulse"))
            .unwrap_or_else(|| PathBuf::from(".repopulse"));
        Self { store_dir }
    }
}
