use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{GitQuickError, Result};

/// Thin async wrapper around the `git` executable.
///
/// Every command runs with `current_dir` set to the repository, a C locale so
/// output can be parsed, and terminal prompts disabled so a credential prompt
/// can never block a run. Network commands are additionally bounded by
/// `network_timeout`; the child is killed when the timeout fires.
#[derive(Debug, Clone)]
pub struct GitClient {
    workdir: PathBuf,
    network_timeout: Duration,
}

/// Raw result of a git invocation
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// Trimmed stdout, `None` when the command failed or printed nothing
    pub fn value(&self) -> Option<String> {
        let out = self.stdout.trim();
        if self.success && !out.is_empty() {
            Some(out.to_string())
        } else {
            None
        }
    }
}

/// Result of merging an upstream into the checked-out branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Conflict { files: Vec<String> },
}

impl GitClient {
    /// Create a new Git client rooted at `workdir`
    pub fn new(workdir: impl Into<PathBuf>, network_timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            network_timeout,
        }
    }

    fn command(&self, args: &[&str]) -> AsyncCommand {
        let mut cmd = AsyncCommand::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl-C reaches only git-quick, which
        // decides when it is safe to stop
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Run git and return its output whatever the exit status
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        debug!("git {}", args.join(" "));

        let output = self.command(args).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitQuickError::GitNotFound
            } else {
                GitQuickError::Io(e)
            }
        })?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run git and fail with `GitCommand` on a non-zero exit
    pub async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.success {
            return Err(command_error(args, &output));
        }
        Ok(output.stdout)
    }

    /// Run a git command that talks to a remote, bounded by the network timeout
    pub async fn run_network(&self, args: &[&str]) -> Result<String> {
        match timeout(self.network_timeout, self.run_checked(args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "git {} timed out after {}s",
                    args.join(" "),
                    self.network_timeout.as_secs()
                );
                Err(GitQuickError::NetworkTimeout {
                    command: args.join(" "),
                    timeout: self.network_timeout,
                })
            }
        }
    }

    /// Resolve a revision to a full sha, `None` if it does not exist
    pub async fn rev_parse(&self, rev: &str) -> Result<Option<String>> {
        let output = self
            .run(&["rev-parse", "--verify", "--quiet", &format!("{}^{{commit}}", rev)])
            .await?;
        Ok(output.value())
    }

    // Mutating operations. Only the sync engine and the quick-commit workflow
    // call these.

    /// Stash all local edits including untracked files.
    ///
    /// Returns the stash commit sha, or `None` when there was nothing to stash.
    pub async fn stash_push(&self, message: &str) -> Result<Option<String>> {
        let before = self.stash_head().await?;
        self.run_checked(&["stash", "push", "--include-untracked", "-m", message])
            .await?;
        let after = self.stash_head().await?;

        if after.is_some() && after != before {
            info!("Stashed local changes as {}", short_sha(after.as_deref().unwrap_or("")));
            Ok(after)
        } else {
            Ok(None)
        }
    }

    async fn stash_head(&self) -> Result<Option<String>> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", "refs/stash"]).await?;
        Ok(output.value())
    }

    /// Find the `stash@{n}` selector of a recorded stash sha
    pub async fn stash_selector(&self, sha: &str) -> Result<Option<String>> {
        let list = self.run_checked(&["stash", "list", "--format=%H"]).await?;
        Ok(list
            .lines()
            .position(|line| line.trim() == sha)
            .map(|index| format!("stash@{{{}}}", index)))
    }

    /// Pop the stash identified by `sha`, restoring index state when possible.
    ///
    /// On failure the working tree is reset to HEAD and the stash is left in
    /// place, so the caller can report it rather than lose it.
    pub async fn stash_pop(&self, sha: &str) -> Result<()> {
        let selector = self.stash_selector(sha).await?.ok_or_else(|| GitQuickError::GitCommand {
            command: "stash pop".to_string(),
            stderr: format!("stash {} no longer exists", short_sha(sha)),
        })?;

        let with_index = self.run(&["stash", "pop", "--index", &selector]).await?;
        if with_index.success {
            return Ok(());
        }

        // --index refuses when staged hunks cannot be reapplied; the tree is
        // untouched in that case so a plain pop is still safe to try
        if self.is_clean().await? {
            debug!("stash pop --index refused, retrying without --index");
            let plain = self.run(&["stash", "pop", &selector]).await?;
            if plain.success {
                return Ok(());
            }
            self.reset_hard().await?;
            return Err(command_error(&["stash", "pop", &selector], &plain));
        }

        self.reset_hard().await?;
        Err(command_error(&["stash", "pop", "--index", &selector], &with_index))
    }

    pub async fn is_clean(&self) -> Result<bool> {
        let status = self.run_checked(&["status", "--porcelain"]).await?;
        Ok(status.trim().is_empty())
    }

    pub async fn reset_hard(&self) -> Result<()> {
        self.run_checked(&["reset", "--hard", "--quiet", "HEAD"]).await?;
        Ok(())
    }

    /// Unstage everything, keeping the working tree
    pub async fn reset_index(&self) -> Result<()> {
        self.run_checked(&["reset", "--quiet"]).await?;
        Ok(())
    }

    pub async fn checkout(&self, rev: &str) -> Result<()> {
        self.run_checked(&["checkout", "--quiet", rev]).await?;
        Ok(())
    }

    /// Fetch one remote
    pub async fn fetch_remote(&self, remote: &str) -> Result<()> {
        self.run_network(&["fetch", "--quiet", remote]).await?;
        Ok(())
    }

    /// Fetch a single branch into its remote-tracking ref
    pub async fn fetch_branch(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, remote);
        self.run_network(&["fetch", "--quiet", remote, &refspec]).await?;
        Ok(())
    }

    /// Current sha of a branch on the remote, `None` if the branch is gone
    pub async fn ls_remote_branch(&self, remote: &str, branch: &str) -> Result<Option<String>> {
        let refname = format!("refs/heads/{}", branch);
        let out = self
            .run_network(&["ls-remote", "--heads", remote, &refname])
            .await?;
        Ok(out
            .lines()
            .find(|line| line.ends_with(&refname))
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_string))
    }

    /// Fast-forward the checked-out branch
    pub async fn merge_ff_only(&self, upstream: &str) -> Result<()> {
        self.run_checked(&["merge", "--ff-only", "--quiet", upstream])
            .await?;
        Ok(())
    }

    /// Move a branch that is not checked out, guarded by its expected old value
    pub async fn update_branch_ref(&self, branch: &str, new: &str, old: &str) -> Result<()> {
        let refname = format!("refs/heads/{}", branch);
        self.run_checked(&[
            "update-ref",
            "-m",
            "git-quick sync: fast-forward",
            &refname,
            new,
            old,
        ])
        .await?;
        Ok(())
    }

    /// Merge `upstream` into the checked-out branch.
    ///
    /// Conflicts are reported as `MergeOutcome::Conflict`; the merge is left
    /// in progress for the caller to abort.
    pub async fn merge(&self, upstream: &str) -> Result<MergeOutcome> {
        let output = self.run(&["merge", "--no-edit", "--quiet", upstream]).await?;
        if output.success {
            return Ok(MergeOutcome::Merged);
        }

        let files = self.unmerged_files().await?;
        if !files.is_empty() || self.merge_in_progress().await? {
            return Ok(MergeOutcome::Conflict { files });
        }

        Err(command_error(&["merge", "--no-edit", upstream], &output))
    }

    pub async fn unmerged_files(&self) -> Result<Vec<String>> {
        let out = self
            .run_checked(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub async fn merge_in_progress(&self) -> Result<bool> {
        Ok(self.rev_parse("MERGE_HEAD").await?.is_some())
    }

    pub async fn merge_abort(&self) -> Result<()> {
        if self.merge_in_progress().await? {
            self.run_checked(&["merge", "--abort"]).await?;
        } else {
            self.reset_hard().await?;
        }
        Ok(())
    }

    /// Remove remote-tracking refs whose remote branch is gone.
    ///
    /// Returns the pruned ref names.
    pub async fn prune_remote(&self, remote: &str) -> Result<Vec<String>> {
        let out = self.run_network(&["remote", "prune", remote]).await?;
        Ok(parse_pruned_refs(&out))
    }

    pub async fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "--all"]).await?;
        Ok(())
    }

    /// Create a commit from the index and return its sha
    pub async fn commit(&self, message: &str) -> Result<String> {
        self.run_checked(&["commit", "--quiet", "-m", message]).await?;
        self.rev_parse("HEAD")
            .await?
            .ok_or_else(|| GitQuickError::GitCommand {
                command: "commit".to_string(),
                stderr: "HEAD missing after commit".to_string(),
            })
    }

    /// Push a branch, setting its upstream when it has none yet
    pub async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<()> {
        let mut args = vec!["push", "--quiet"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.push(remote);
        args.push(branch);
        self.run_network(&args).await?;
        Ok(())
    }
}

/// Verify that a usable git executable is on PATH and return its version line
pub async fn ensure_git_available() -> Result<String> {
    let output = AsyncCommand::new("git")
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|_| GitQuickError::GitNotFound)?;

    if !output.status.success() {
        return Err(GitQuickError::GitNotFound);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn command_error(args: &[&str], output: &GitOutput) -> GitQuickError {
    let stderr = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    };
    GitQuickError::GitCommand {
        command: args.join(" "),
        stderr,
    }
}

pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

// " * [pruned] origin/feature" (older git prints "[would prune]" for --dry-run)
fn parse_pruned_refs(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("* [pruned] "))
        .map(|name| name.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pruned_refs() {
        let output = "Pruning origin\nURL: /tmp/remote.git\n * [pruned] origin/old-feature\n * [pruned] origin/hotfix/1\n";
        assert_eq!(
            parse_pruned_refs(output),
            vec!["origin/old-feature".to_string(), "origin/hotfix/1".to_string()]
        );
        assert!(parse_pruned_refs("").is_empty());
    }

    #[test]
    fn test_short_sha() {
        assert_eq!(short_sha("0123456789abcdef"), "0123456");
        assert_eq!(short_sha("abc"), "abc");
    }

    #[test]
    fn test_output_value() {
        let ok = GitOutput {
            success: true,
            stdout: "  main\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(ok.value().as_deref(), Some("main"));

        let failed = GitOutput {
            success: false,
            stdout: "main".to_string(),
            stderr: "fatal".to_string(),
        };
        assert!(failed.value().is_none());
    }

    #[test]
    fn test_command_error_prefers_stderr() {
        let output = GitOutput {
            success: false,
            stdout: "partial".to_string(),
            stderr: "fatal: bad revision\n".to_string(),
        };
        match command_error(&["log", "nope"], &output) {
            GitQuickError::GitCommand { command, stderr } => {
                assert_eq!(command, "log nope");
                assert_eq!(stderr, "fatal: bad revision");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_git_runs_in_its_own_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::new(dir.path(), Duration::from_secs(5));
        // Shell aliases run as children of git and inherit its group
        let output = client
            .run_checked(&["-c", "alias.pgrp=!cut -d' ' -f5 /proc/$$/stat", "pgrp"])
            .await
            .unwrap();
        let group: i32 = output.trim().parse().unwrap();
        assert_ne!(group, nix::unistd::getpgrp().as_raw());
    }

    #[tokio::test]
    async fn test_git_available() {
        let version = ensure_git_available().await.expect("git should be installed");
        assert!(version.starts_with("git version"));
    }
}
