//! Filesystem watching with debounce

mod debounce;
mod repository;

pub use debounce::Debouncer;
pub use repository::{PathFilter, RepositoryWatcher, WatchPhase};
