//! Repository snapshots and the reader that produces them

mod reader;
mod types;

#[cfg(test)]
pub use reader::fixtures;
pub use reader::{GitDirs, StateReader};
pub use types::{Branch, DETACHED_SENTINEL, RepositorySnapshot, StatusEntry, WorkingTreeSummary};
