//! Activity events and the classifier that produces them

mod classifier;
pub mod inspector;
mod types;

pub use classifier::{ActivityClassifier, ClassifyContext, ClassifyMode};
pub use inspector::{CommitInfo, CommitInspector, GitInspector, PUSH_REFLOG_SUBJECT, ReflogEntry};
pub use types::{ActivityDetails, ActivityEvent, ActivityKind, BranchScope, DiffStat};
