//! Per-repository monitoring state shared by the watcher and the coordinator

mod cycle;
mod state;

pub use cycle::PollOutcome;
pub use state::{MonitorContext, RepositoryState, WatchedRepository};
