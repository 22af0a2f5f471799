//! Error taxonomy shared by the inspector, sync engine and time tracker.
//!
//! Command entry points wrap these in `anyhow` with context; library code
//! returns them directly so callers can match on the recoverable variants
//! (`NoChanges`, `AlreadyTracking`, `NotTracking`, `RepositoryBusy`).

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitQuickError {
    /// The working directory is not inside a git work tree.
    #[error("Not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    /// `git` could not be spawned.
    #[error("Git executable not found in PATH. Install git: https://git-scm.com/downloads")]
    GitNotFound,

    /// Nothing to commit (or nothing staged when a staged diff was requested).
    #[error("No changes to commit")]
    NoChanges,

    /// Another sync-all run holds the repository lock.
    #[error("Repository is busy: sync already running (pid {pid}, since {since})")]
    RepositoryBusy { pid: u32, since: DateTime<Utc> },

    #[error("Already tracking time on '{branch}' since {since}")]
    AlreadyTracking { branch: String, since: DateTime<Utc> },

    #[error("Not tracking time (run `git-time start` first)")]
    NotTracking,

    #[error("Network operation timed out after {}s: git {command}", .timeout.as_secs())]
    NetworkTimeout { command: String, timeout: Duration },

    #[error("Merge conflict while integrating '{0}'")]
    MergeConflict(String),

    /// A git invocation exited unsuccessfully.
    #[error("git {command} failed: {stderr}")]
    GitCommand { command: String, stderr: String },

    /// The AI capability could not produce a usable summary.
    #[error("AI provider unavailable: {0}")]
    AiUnavailable(String),

    #[error("Corrupt state file {}: {reason}", .path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GitQuickError {
    /// Failures talking to a remote that may pass on a second attempt:
    /// timeouts and transport errors, never a rejected or malformed command.
    pub fn is_retryable_fetch_error(&self) -> bool {
        match self {
            GitQuickError::NetworkTimeout { .. } => true,
            GitQuickError::GitCommand { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                TRANSIENT_TRANSPORT_ERRORS
                    .iter()
                    .any(|needle| stderr.contains(needle))
            }
            _ => false,
        }
    }
}

/// Lowercased stderr fragments git prints when the transport drops
const TRANSIENT_TRANSPORT_ERRORS: &[&str] = &[
    "could not resolve host",
    "connection timed out",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "operation timed out",
    "the remote end hung up",
    "early eof",
    "unable to access",
    "ssh: connect to host",
];

pub type Result<T, E = GitQuickError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_fetch_errors() {
        let timeout = GitQuickError::NetworkTimeout {
            command: "fetch origin".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(timeout.is_retryable_fetch_error());

        let dropped = GitQuickError::GitCommand {
            command: "fetch --quiet origin".to_string(),
            stderr: "fatal: unable to access 'https://example.com/repo.git/': Could not resolve host: example.com".to_string(),
        };
        assert!(dropped.is_retryable_fetch_error());

        let hung_up = GitQuickError::GitCommand {
            command: "fetch --quiet origin".to_string(),
            stderr: "fatal: The remote end hung up unexpectedly".to_string(),
        };
        assert!(hung_up.is_retryable_fetch_error());
    }

    #[test]
    fn test_local_failures_are_not_retried() {
        let missing = GitQuickError::GitCommand {
            command: "fetch --quiet dead".to_string(),
            stderr: "fatal: '/tmp/gone.git' does not appear to be a git repository".to_string(),
        };
        assert!(!missing.is_retryable_fetch_error());

        let bad_ref = GitQuickError::GitCommand {
            command: "fetch --quiet origin nope".to_string(),
            stderr: "fatal: couldn't find remote ref nope".to_string(),
        };
        assert!(!bad_ref.is_retryable_fetch_error());

        assert!(!GitQuickError::NoChanges.is_retryable_fetch_error());
        assert!(!GitQuickError::MergeConflict("main".into()).is_retryable_fetch_error());
    }

    #[test]
    fn test_timeout_message() {
        let err = GitQuickError::NetworkTimeout {
            command: "fetch origin".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "Network operation timed out after 30s: git fetch origin"
        );
    }
}
