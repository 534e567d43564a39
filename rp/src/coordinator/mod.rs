//! Per-project coordination of watchers and remote polling

mod project;

pub use project::{CoordinatorSettings, PollSummary, ProjectCoordinator, RepositoryStatus, StartSummary};
