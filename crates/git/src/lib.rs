mod cli;
mod status;

pub use cli::{is_nothing_to_commit, CommitOutcome, GitCli, GitCliError};
pub use status::changed_paths;

use serde::{Deserialize, Serialize};

/// Local branch names in listing order, plus the checked-out branch.
///
/// `current` is the empty string when detection fails (detached HEAD), so
/// callers can apply their own default-to-first-branch fallback without
/// handling a null case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSet {
    pub names: Vec<String>,
    pub current: String,
}

/// Commits unique to HEAD (`ahead`) and unique to its upstream (`behind`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub ahead: usize,
    pub behind: usize,
}
