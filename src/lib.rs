//! git-quick - Lightning-fast git workflows
//!
//! Four small commands built on one library:
//!
//! - `git-quick` stages and commits with a generated conventional message,
//!   then pushes
//! - `git-sync-all` brings every local branch up to date with its upstream
//!   without losing uncommitted work
//! - `git-story` renders commit history as markdown
//! - `git-time` tracks time spent per branch
//!
//! ## Modules
//!
//! - [`inspector`]: Read-only view of a repository (changes, branches, history)
//! - [`commit`]: Commit message generation, AI-backed with a heuristic fallback
//! - [`sync`]: The multi-branch sync engine
//! - [`time`]: Append-only time log and idle detection
//! - [`config`]: Configuration management and parsing

pub mod ai;
pub mod cli;
pub mod commit;
pub mod config;
pub mod error;
pub mod git;
pub mod inspector;
pub mod lock;
pub mod quick;
pub mod story;
pub mod sync;
pub mod time;

pub use commit::{CommitMessage, CommitMessageGenerator, CommitType, ConventionalType};
pub use config::Config;
pub use error::{GitQuickError, Result};
pub use git::GitClient;
pub use inspector::{BranchState, ChangeSet, FileChange, RepositoryInspector};
pub use quick::{QuickCommit, QuickOptions, QuickOutcome};
pub use story::{Story, StoryBuilder};
pub use sync::{BranchSyncEngine, SyncOptions, SyncOutcome, SyncReport, SyncResult};
pub use time::{TimeEntry, TimeTracker};
