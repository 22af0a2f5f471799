//! Sync Engine - brings every local branch up to date with its upstream
//!
//! Branches are processed one at a time while holding the repository lock.
//! Each branch runs through fetch, compare and integrate; local edits are
//! stashed only when the working tree is actually needed and are always
//! restored (or left in the stash and reported) before the next branch.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{GitQuickError, Result};
use crate::git::{short_sha, MergeOutcome};
use crate::inspector::{BranchState, HeadRef, RepositoryInspector};
use crate::lock::RepoLock;

/// Terminal state of one branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOutcome {
    Synced,
    SkippedDirty,
    Conflict,
    UpToDate,
    Failed,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Synced => "synced",
            SyncOutcome::SkippedDirty => "skipped-dirty",
            SyncOutcome::Conflict => "conflict",
            SyncOutcome::UpToDate => "up-to-date",
            SyncOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub branch: String,
    pub outcome: SyncOutcome,
    pub detail: String,
}

impl SyncResult {
    pub fn new(branch: impl Into<String>, outcome: SyncOutcome, detail: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            outcome,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.branch, self.outcome)?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

/// Results from a complete sync-all run, in processing order
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub results: Vec<SyncResult>,
    /// Remote-tracking refs removed by the prune step
    pub pruned: Vec<String>,
    /// Stopped early by an interrupt
    pub cancelled: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl SyncReport {
    pub fn count(&self, outcome: SyncOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(SyncOutcome::Failed) > 0
    }

    pub fn result(&self, branch: &str) -> Option<&SyncResult> {
        self.results.iter().find(|r| r.branch == branch)
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} branches: {} synced, {} up-to-date, {} skipped-dirty, {} conflict, {} failed in {:.2}s",
            self.results.len(),
            self.count(SyncOutcome::Synced),
            self.count(SyncOutcome::UpToDate),
            self.count(SyncOutcome::SkippedDirty),
            self.count(SyncOutcome::Conflict),
            self.count(SyncOutcome::Failed),
            self.duration.as_secs_f64()
        );
        if !self.pruned.is_empty() {
            summary.push_str(&format!(", pruned {}", self.pruned.join(", ")));
        }
        if self.cancelled {
            summary.push_str(" (interrupted)");
        }
        summary
    }
}

/// Resolved knobs for one run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub auto_stash: bool,
    pub prune: bool,
    pub fetch_all: bool,
    /// Processed first, in this order
    pub priority: Vec<String>,
    /// Restrict the run to these branches; empty means all local branches
    pub branches: Vec<String>,
    pub retry_backoff: Duration,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_stash: config.sync.auto_stash,
            prune: config.sync.prune,
            fetch_all: config.sync.fetch_all,
            priority: config.sync.priority.clone(),
            branches: Vec::new(),
            retry_backoff: config.retry_backoff(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-run bookkeeping
#[derive(Default)]
struct RunState {
    /// Memoised `fetch_all` results per remote
    fetched: HashMap<String, std::result::Result<(), String>>,
}

/// Order the branch set: lexicographic, then priority names moved to the
/// front. Returns the branches to process and the requested names that do not
/// exist locally.
pub fn order_branches(
    local: &[String],
    requested: &[String],
    priority: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut selected: Vec<String> = if requested.is_empty() {
        local.to_vec()
    } else {
        requested
            .iter()
            .filter(|name| local.contains(name))
            .cloned()
            .collect()
    };
    selected.sort();
    selected.dedup();

    let mut missing: Vec<String> = requested
        .iter()
        .filter(|name| !local.contains(name))
        .cloned()
        .collect();
    missing.dedup();

    let mut ordered = Vec::with_capacity(selected.len());
    for name in priority {
        if let Some(pos) = selected.iter().position(|b| b == name) {
            ordered.push(selected.remove(pos));
        }
    }
    ordered.extend(selected);

    (ordered, missing)
}

/// The sync-all engine
pub struct BranchSyncEngine {
    inspector: RepositoryInspector,
    options: SyncOptions,
    cancel: Arc<AtomicBool>,
}

impl BranchSyncEngine {
    pub fn new(inspector: RepositoryInspector, options: SyncOptions) -> Self {
        Self {
            inspector,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag stops the run at the next branch boundary
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run a complete sync pass over the selected branches
    pub async fn run(&self) -> Result<SyncReport> {
        let start_time = Instant::now();

        let git_dir = self.inspector.git_dir().await?;
        let lock = RepoLock::acquire(&git_dir)?;

        let original = self.inspector.head_ref().await?;
        let local = self.inspector.list_branches().await?;
        let (branches, missing) = order_branches(&local, &self.options.branches, &self.options.priority);

        info!("Syncing {} branches", branches.len());

        let mut run = RunState::default();
        let mut results = Vec::with_capacity(branches.len() + missing.len());
        let mut cancelled = false;

        for branch in &branches {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Interrupted, stopping before '{}'", branch);
                cancelled = true;
                break;
            }

            let result = match self.sync_branch(branch, &original, &mut run).await {
                Ok(result) => result,
                Err(e) => SyncResult::new(branch, SyncOutcome::Failed, e.to_string()),
            };

            match result.outcome {
                SyncOutcome::Failed => error!("{}", result),
                SyncOutcome::Conflict | SyncOutcome::SkippedDirty => warn!("{}", result),
                _ => info!("{}", result),
            }
            results.push(result);
        }

        for name in missing {
            results.push(SyncResult::new(name, SyncOutcome::Failed, "no such local branch"));
        }

        if let Err(e) = self.restore_head(&original).await {
            error!(
                "Could not return to '{}': {}",
                original.checkout_target(),
                e
            );
        }

        let pruned = if self.options.prune && !cancelled {
            self.prune(&run).await
        } else {
            Vec::new()
        };

        lock.release()?;

        let report = SyncReport {
            results,
            pruned,
            cancelled,
            duration: start_time.elapsed(),
        };
        info!("{}", report.summary());

        Ok(report)
    }

    async fn sync_branch(
        &self,
        name: &str,
        original: &HeadRef,
        run: &mut RunState,
    ) -> Result<SyncResult> {
        let state = self.inspector.branch_state(name).await?;
        debug!("Branch state before sync: {:?}", state);

        if state.dirty && !self.options.auto_stash {
            return Ok(SyncResult::new(
                name,
                SyncOutcome::SkippedDirty,
                "uncommitted changes and auto_stash is off",
            ));
        }

        let (remote, remote_branch) = match (&state.remote, &state.remote_branch) {
            (Some(remote), Some(branch)) => (remote.clone(), branch.clone()),
            _ => return Ok(SyncResult::new(name, SyncOutcome::UpToDate, "no upstream")),
        };

        // "." tracks another local branch, nothing to fetch
        if remote != "." {
            if let Err(e) = self.fetch(&remote, &remote_branch, run).await {
                return Ok(SyncResult::new(
                    name,
                    SyncOutcome::Failed,
                    format!("fetch from {} failed: {}", remote, e),
                ));
            }
        }

        // Fetch invalidated the earlier snapshot
        let state = self.inspector.branch_state(name).await?;
        let upstream = match &state.upstream {
            Some(upstream) => upstream.clone(),
            None => {
                return Ok(SyncResult::new(
                    name,
                    SyncOutcome::UpToDate,
                    "upstream branch is gone",
                ))
            }
        };

        if state.behind == 0 {
            let detail = if state.ahead > 0 {
                format!("ahead of {} by {}", upstream, state.ahead)
            } else {
                String::new()
            };
            return Ok(SyncResult::new(name, SyncOutcome::UpToDate, detail));
        }

        self.integrate(&state, &upstream, original).await
    }

    async fn integrate(
        &self,
        state: &BranchState,
        upstream: &str,
        original: &HeadRef,
    ) -> Result<SyncResult> {
        let git = self.inspector.git();
        let name = state.name.as_str();

        let local = git
            .rev_parse(&format!("refs/heads/{}", name))
            .await?
            .ok_or_else(|| missing_ref(name))?;
        let target = git
            .rev_parse(upstream)
            .await?
            .ok_or_else(|| missing_ref(upstream))?;

        if state.ahead == 0 && !state.is_current {
            git.update_branch_ref(name, &target, &local).await?;
            return Ok(SyncResult::new(
                name,
                SyncOutcome::Synced,
                format!("fast-forwarded {} commit(s) to {}", state.behind, short_sha(&target)),
            ));
        }

        // From here on the working tree is needed
        let dirty = self.inspector.is_dirty().await?;
        if dirty && !self.options.auto_stash {
            return Ok(SyncResult::new(
                name,
                SyncOutcome::SkippedDirty,
                "working tree has uncommitted changes and auto_stash is off",
            ));
        }

        let stash = if dirty {
            git.stash_push(&format!("git-quick sync-all: {}", name)).await?
        } else {
            None
        };

        let outcome = self.integrate_in_worktree(state, upstream, &target).await;

        if let Err(e) = self.leave_worktree(state, original).await {
            let kept = match &stash {
                Some(sha) => format!(", local changes kept in stash {}", short_sha(sha)),
                None => String::new(),
            };
            return Ok(SyncResult::new(
                name,
                SyncOutcome::Failed,
                format!("could not return to {}: {}{}", original.checkout_target(), e, kept),
            ));
        }

        if let Some(sha) = &stash {
            if let Err(e) = git.stash_pop(sha).await {
                return Ok(SyncResult::new(
                    name,
                    SyncOutcome::Failed,
                    format!(
                        "could not restore local changes, kept in stash {}: {}",
                        short_sha(sha),
                        e
                    ),
                ));
            }
            debug!("Restored stashed changes {}", short_sha(sha));
        }

        outcome
    }

    async fn integrate_in_worktree(
        &self,
        state: &BranchState,
        upstream: &str,
        target: &str,
    ) -> Result<SyncResult> {
        let git = self.inspector.git();
        let name = state.name.as_str();

        if !state.is_current {
            git.checkout(name).await?;
        }

        if state.ahead == 0 {
            git.merge_ff_only(upstream).await?;
            return Ok(SyncResult::new(
                name,
                SyncOutcome::Synced,
                format!("fast-forwarded {} commit(s) to {}", state.behind, short_sha(target)),
            ));
        }

        match git.merge(upstream).await? {
            MergeOutcome::Merged => Ok(SyncResult::new(
                name,
                SyncOutcome::Synced,
                format!("merged {} commit(s) from {}", state.behind, upstream),
            )),
            MergeOutcome::Conflict { files } => {
                git.merge_abort().await?;
                let mut detail = GitQuickError::MergeConflict(upstream.to_string()).to_string();
                if !files.is_empty() {
                    detail.push_str(&format!(": {}", files.join(", ")));
                }
                Ok(SyncResult::new(name, SyncOutcome::Conflict, detail))
            }
        }
    }

    /// Abort any half-done merge and go back to the original HEAD
    async fn leave_worktree(&self, state: &BranchState, original: &HeadRef) -> Result<()> {
        let git = self.inspector.git();
        if git.merge_in_progress().await? {
            git.merge_abort().await?;
        }
        if !state.is_current {
            git.checkout(original.checkout_target()).await?;
        }
        Ok(())
    }

    async fn restore_head(&self, original: &HeadRef) -> Result<()> {
        let current = self.inspector.head_ref().await?;
        if current != *original {
            warn!(
                "HEAD moved to '{}', switching back to '{}'",
                current.checkout_target(),
                original.checkout_target()
            );
            self.inspector
                .git()
                .checkout(original.checkout_target())
                .await?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        remote: &str,
        branch: &str,
        run: &mut RunState,
    ) -> std::result::Result<(), String> {
        let git = self.inspector.git();

        if self.options.fetch_all {
            if let Some(result) = run.fetched.get(remote) {
                return result.clone();
            }
            let result = self
                .with_retry(&format!("fetch {}", remote), || git.fetch_remote(remote))
                .await
                .map_err(|e| e.to_string());
            run.fetched.insert(remote.to_string(), result.clone());
            return result;
        }

        self.with_retry(&format!("fetch {} {}", remote, branch), || {
            self.fetch_if_changed(remote, branch)
        })
        .await
        .map_err(|e| e.to_string())
    }

    /// Check the remote ref with ls-remote and fetch only when it moved
    async fn fetch_if_changed(&self, remote: &str, branch: &str) -> Result<()> {
        let git = self.inspector.git();
        let remote_sha = git.ls_remote_branch(remote, branch).await?;
        let tracking = git
            .rev_parse(&format!("refs/remotes/{}/{}", remote, branch))
            .await?;

        match remote_sha {
            Some(sha) if tracking.as_deref() != Some(sha.as_str()) => {
                git.fetch_branch(remote, branch).await
            }
            Some(_) => {
                debug!("{}/{} unchanged, skipping fetch", remote, branch);
                Ok(())
            }
            None => {
                debug!("{} has no branch {}", remote, branch);
                Ok(())
            }
        }
    }

    /// Timeouts and dropped transports get exactly one retry after the
    /// configured backoff
    async fn with_retry<F, Fut>(&self, what: &str, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match op().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable_fetch_error() => {
                warn!(
                    "{} failed ({}), retrying in {}ms",
                    what,
                    e,
                    self.options.retry_backoff.as_millis()
                );
                tokio::time::sleep(self.options.retry_backoff).await;
                op().await
            }
            Err(e) => Err(e),
        }
    }

    /// Prune stale remote-tracking refs on every reachable remote
    async fn prune(&self, run: &RunState) -> Vec<String> {
        let remotes = match self.inspector.remotes().await {
            Ok(remotes) => remotes,
            Err(e) => {
                warn!("Could not list remotes for pruning: {}", e);
                return Vec::new();
            }
        };

        let mut pruned = Vec::new();
        for remote in remotes {
            if matches!(run.fetched.get(&remote), Some(Err(_))) {
                debug!("Skipping prune of unreachable remote {}", remote);
                continue;
            }
            match self.inspector.git().prune_remote(&remote).await {
                Ok(refs) => {
                    for r in &refs {
                        info!("Pruned {}", r);
                    }
                    pruned.extend(refs);
                }
                Err(e) => warn!("Failed to prune {}: {}", remote, e),
            }
        }
        pruned
    }
}

fn missing_ref(name: &str) -> GitQuickError {
    GitQuickError::GitCommand {
        command: format!("rev-parse {}", name),
        stderr: "reference does not exist".to_string(),
    }
}
