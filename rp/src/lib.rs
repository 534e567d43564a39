//! repopulse - git repository activity monitoring
//!
//! Watches local git repositories and turns what happens in them into a
//! stream of typed activity events: commits, merges, branch switches and
//! creation, working-tree edits, remote updates and pushes.
//!
//! # Modules
//!
//! - [`git`] - git subprocess runner and output parsers
//! - [`snapshot`] - repository snapshots and the reader that takes them
//! - [`activity`] - activity events and the snapshot-diff classifier
//! - [`watcher`] - per-repository filesystem watch with debounce
//! - [`coordinator`] - per-project watchers plus remote polling
//! - [`sink`] / [`store`] - where events and snapshots go
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod activity;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod git;
pub mod monitor;
pub mod sink;
pub mod snapshot;
pub mod store;
pub mod watcher;

// Re-export commonly used types
pub use activity::{ActivityClassifier, ActivityDetails, ActivityEvent, ActivityKind, BranchScope, DiffStat};
pub use config::Config;
pub use coordinator::{CoordinatorSettings, PollSummary, ProjectCoordinator, RepositoryStatus, StartSummary};
pub use error::MonitorError;
pub use git::{CommandRunner, GitError, GitRunner};
pub use monitor::{MonitorContext, PollOutcome, RepositoryState, WatchedRepository};
pub use sink::{ActivitySink, ChannelSink, EventBus};
pub use snapshot::{Branch, RepositorySnapshot, StateReader};
pub use store::{JsonStore, SnapshotStore};
pub use watcher::{RepositoryWatcher, WatchPhase};
