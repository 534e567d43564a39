//! Git subprocess plumbing
//!
//! All repository state is read by shelling out to `git` with plain argument
//! vectors. Nothing here parses git's on-disk storage directly.

mod error;
pub mod parse;
pub mod runner;

pub use error::GitError;
pub use runner::{CommandRunner, GitRunner, render_command, validate_invocation};
