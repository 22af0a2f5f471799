//! Read-only view of a repository: change sets, branches and tracking status.
//!
//! Nothing in this module mutates the repository, so it can be called freely
//! by the commit generator and the sync engine.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::debug;

use crate::error::{GitQuickError, Result};
use crate::git::GitClient;

/// Kind of change recorded for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    fn from_status(status: &str) -> Self {
        match status.chars().next() {
            Some('A') | Some('C') => ChangeKind::Added,
            Some('D') => ChangeKind::Deleted,
            Some('R') => ChangeKind::Renamed,
            _ => ChangeKind::Modified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One changed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    /// Previous path for renames
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    /// `+N -M`, `binary` or `new file`
    pub hunk_summary: String,
    pub insertions: u32,
    pub deletions: u32,
}

impl FileChange {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            old_path: None,
            kind,
            hunk_summary: String::new(),
            insertions: 0,
            deletions: 0,
        }
    }

    pub fn with_stats(mut self, insertions: u32, deletions: u32) -> Self {
        self.insertions = insertions;
        self.deletions = deletions;
        self.hunk_summary = format!("+{} -{}", insertions, deletions);
        self
    }
}

/// Snapshot of the changes about to be committed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    pub files: Vec<FileChange>,
    /// Raw unified diff
    pub diff: String,
}

impl ChangeSet {
    pub fn new(files: Vec<FileChange>, diff: impl Into<String>) -> Self {
        Self {
            files,
            diff: diff.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn insertions(&self) -> u32 {
        self.files.iter().map(|f| f.insertions).sum()
    }

    pub fn deletions(&self) -> u32 {
        self.files.iter().map(|f| f.deletions).sum()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }
}

/// Tracking status of one local branch.
///
/// Stale as soon as any mutating git operation runs; recapture instead of
/// reusing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchState {
    pub name: String,
    pub has_local_commits: bool,
    pub has_upstream: bool,
    pub ahead: u32,
    pub behind: u32,
    /// Checked out with uncommitted (tracked or untracked) edits
    pub dirty: bool,
    pub is_current: bool,
    /// Remote-tracking ref, e.g. `origin/main`, when it exists locally
    pub upstream: Option<String>,
    /// `branch.<name>.remote`
    pub remote: Option<String>,
    /// Branch name on the remote, from `branch.<name>.merge`
    pub remote_branch: Option<String>,
}

/// What HEAD points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadRef {
    Branch(String),
    Detached(String),
}

impl HeadRef {
    /// Argument that checks this HEAD out again
    pub fn checkout_target(&self) -> &str {
        match self {
            HeadRef::Branch(name) => name,
            HeadRef::Detached(sha) => sha,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            HeadRef::Branch(name) => Some(name),
            HeadRef::Detached(_) => None,
        }
    }
}

/// A commit as shown in stories
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub sha: String,
    pub author: String,
    pub date: DateTime<FixedOffset>,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct RepositoryInspector {
    git: GitClient,
    root: PathBuf,
}

impl RepositoryInspector {
    /// Open the repository containing `path`.
    ///
    /// Fails with `GitNotFound` when git is missing and `NotARepository` when
    /// `path` is not inside a work tree.
    pub async fn open(path: &Path, network_timeout: Duration) -> Result<Self> {
        if !path.is_dir() {
            return Err(GitQuickError::NotARepository(path.to_path_buf()));
        }

        let client = GitClient::new(path, network_timeout);
        let output = client.run(&["rev-parse", "--show-toplevel"]).await?;
        let root = output
            .value()
            .map(PathBuf::from)
            .ok_or_else(|| GitQuickError::NotARepository(path.to_path_buf()))?;

        debug!("Opened repository at {}", root.display());

        Ok(Self {
            git: GitClient::new(&root, network_timeout),
            root,
        })
    }

    pub fn git(&self) -> &GitClient {
        &self.git
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capture the staged (or, with `staged = false`, unstaged + untracked)
    /// changes. An empty result is `NoChanges`.
    pub async fn capture_change_set(&self, staged: bool) -> Result<ChangeSet> {
        let mut base: Vec<&str> = vec!["-c", "core.quotePath=false", "diff"];
        if staged {
            base.push("--cached");
        }
        base.push("-M");

        let mut name_status_args = base.clone();
        name_status_args.push("--name-status");
        let mut numstat_args = base.clone();
        numstat_args.push("--numstat");

        let name_status = self.git.run_checked(&name_status_args).await?;
        let numstat = self.git.run_checked(&numstat_args).await?;
        let mut diff = self.git.run_checked(&base).await?;

        let stats = parse_numstat(&numstat);
        let mut files: Vec<FileChange> = parse_name_status(&name_status)
            .into_iter()
            .map(|mut change| {
                match stats.get(&change.path) {
                    Some(Some((ins, del))) => change = change.with_stats(*ins, *del),
                    Some(None) => change.hunk_summary = "binary".to_string(),
                    None => change.hunk_summary = "+0 -0".to_string(),
                }
                change
            })
            .collect();

        if !staged {
            for path in self.untracked_files().await? {
                let mut change = FileChange::new(&path, ChangeKind::Added);
                change.hunk_summary = "new file".to_string();
                diff.push_str(&format!("new file: {}\n", path));
                files.push(change);
            }
        }

        if files.is_empty() {
            return Err(GitQuickError::NoChanges);
        }

        Ok(ChangeSet::new(files, diff))
    }

    pub async fn untracked_files(&self) -> Result<Vec<String>> {
        let out = self
            .git
            .run_checked(&[
                "-c",
                "core.quotePath=false",
                "ls-files",
                "--others",
                "--exclude-standard",
            ])
            .await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    /// Whether anything is staged
    pub async fn has_staged_changes(&self) -> Result<bool> {
        let output = self.git.run(&["diff", "--cached", "--quiet"]).await?;
        Ok(!output.success)
    }

    /// Local branch names, lexicographically sorted
    pub async fn list_branches(&self) -> Result<Vec<String>> {
        let out = self
            .git
            .run_checked(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])
            .await?;
        let mut branches: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        branches.sort();
        Ok(branches)
    }

    pub async fn current_branch(&self) -> Result<Option<String>> {
        let output = self.git.run(&["symbolic-ref", "--quiet", "--short", "HEAD"]).await?;
        Ok(output.value())
    }

    pub async fn head_ref(&self) -> Result<HeadRef> {
        if let Some(branch) = self.current_branch().await? {
            return Ok(HeadRef::Branch(branch));
        }
        let sha = self
            .git
            .rev_parse("HEAD")
            .await?
            .ok_or_else(|| GitQuickError::GitCommand {
                command: "rev-parse HEAD".to_string(),
                stderr: "HEAD does not point at a commit".to_string(),
            })?;
        Ok(HeadRef::Detached(sha))
    }

    /// Uncommitted changes to tracked files or untracked files present
    pub async fn is_dirty(&self) -> Result<bool> {
        Ok(!self.git.is_clean().await?)
    }

    pub async fn branch_state(&self, name: &str) -> Result<BranchState> {
        let is_current = self.current_branch().await?.as_deref() == Some(name);

        let remote = self.config_value(&format!("branch.{}.remote", name)).await?;
        let remote_branch = self
            .config_value(&format!("branch.{}.merge", name))
            .await?
            .map(|merge| merge.trim_start_matches("refs/heads/").to_string());

        let upstream = self
            .git
            .run(&[
                "rev-parse",
                "--abbrev-ref",
                "--symbolic-full-name",
                &format!("{}@{{upstream}}", name),
            ])
            .await?
            .value();

        let (ahead, behind) = match &upstream {
            Some(upstream) => {
                let counts = self
                    .git
                    .run_checked(&[
                        "rev-list",
                        "--left-right",
                        "--count",
                        &format!("refs/heads/{}...{}", name, upstream),
                    ])
                    .await?;
                parse_left_right(&counts)
            }
            None => (0, 0),
        };

        let dirty = is_current && self.is_dirty().await?;

        Ok(BranchState {
            name: name.to_string(),
            has_local_commits: ahead > 0,
            has_upstream: upstream.is_some(),
            ahead,
            behind,
            dirty,
            is_current,
            upstream,
            remote,
            remote_branch,
        })
    }

    async fn config_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.git.run(&["config", "--get", key]).await?.value())
    }

    pub async fn remotes(&self) -> Result<Vec<String>> {
        let out = self.git.run_checked(&["remote"]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    /// Absolute path of the git directory
    pub async fn git_dir(&self) -> Result<PathBuf> {
        let out = self.git.run_checked(&["rev-parse", "--absolute-git-dir"]).await?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Most recent tag reachable from HEAD
    pub async fn latest_tag(&self) -> Result<Option<String>> {
        Ok(self
            .git
            .run(&["describe", "--tags", "--abbrev=0"])
            .await?
            .value())
    }

    /// Non-merge commits in `range` (or all of HEAD), newest first
    pub async fn log(&self, range: Option<&str>, max: usize) -> Result<Vec<CommitSummary>> {
        if self.git.rev_parse("HEAD").await?.is_none() {
            return Ok(Vec::new());
        }

        let limit = format!("--max-count={}", max);
        let mut args = vec![
            "log",
            "--no-merges",
            "--format=%H%x1f%an%x1f%aI%x1f%s",
            limit.as_str(),
        ];
        if let Some(range) = range {
            args.push(range);
        }
        args.push("--");

        let out = self.git.run_checked(&args).await?;
        Ok(out.lines().filter_map(parse_log_line).collect())
    }
}

fn parse_name_status(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let status = parts.next()?.trim();
            let first = parts.next()?;
            let kind = ChangeKind::from_status(status);
            let change = match (kind, parts.next()) {
                (ChangeKind::Renamed, Some(new_path)) | (ChangeKind::Added, Some(new_path)) => {
                    let mut change = FileChange::new(new_path, kind);
                    change.old_path = Some(first.to_string());
                    change
                }
                _ => FileChange::new(first, kind),
            };
            Some(change)
        })
        .collect()
}

/// Map path → (insertions, deletions); `None` for binary files
fn parse_numstat(output: &str) -> HashMap<String, Option<(u32, u32)>> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let ins = parts.next()?;
            let del = parts.next()?;
            let path = resolve_rename_path(parts.next()?);
            let stats = match (ins.parse::<u32>(), del.parse::<u32>()) {
                (Ok(i), Ok(d)) => Some((i, d)),
                _ => None,
            };
            Some((path, stats))
        })
        .collect()
}

/// numstat prints renames as `old => new` or `dir/{old => new}/file`
fn resolve_rename_path(path: &str) -> String {
    if let (Some(open), Some(close)) = (path.find('{'), path.find('}')) {
        if open < close {
            let inner = &path[open + 1..close];
            if let Some((_, new)) = inner.split_once(" => ") {
                let joined = format!("{}{}{}", &path[..open], new, &path[close + 1..]);
                return joined.replace("//", "/");
            }
        }
    }
    match path.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => path.to_string(),
    }
}

fn parse_left_right(counts: &str) -> (u32, u32) {
    let mut parts = counts.split_whitespace();
    let ahead = parts.next().and_then(|n| n.parse().ok()).unwrap_or(0);
    let behind = parts.next().and_then(|n| n.parse().ok()).unwrap_or(0);
    (ahead, behind)
}

fn parse_log_line(line: &str) -> Option<CommitSummary> {
    let mut parts = line.split('\x1f');
    let sha = parts.next()?.to_string();
    let author = parts.next()?.to_string();
    let date = DateTime::parse_from_rfc3339(parts.next()?).ok()?;
    let subject = parts.next().unwrap_or("").to_string();
    Some(CommitSummary {
        sha,
        author,
        date,
        subject,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_status() {
        let output = "A\ttests/new_test.rs\nM\tsrc/lib.rs\nD\told.txt\nR087\tsrc/a.rs\tsrc/b.rs\n";
        let changes = parse_name_status(output);

        assert_eq!(changes.len(), 4);
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[0].path, "tests/new_test.rs");
        assert_eq!(changes[1].kind, ChangeKind::Modified);
        assert_eq!(changes[2].kind, ChangeKind::Deleted);
        assert_eq!(changes[3].kind, ChangeKind::Renamed);
        assert_eq!(changes[3].path, "src/b.rs");
        assert_eq!(changes[3].old_path.as_deref(), Some("src/a.rs"));
    }

    #[test]
    fn test_parse_numstat() {
        let output = "10\t2\tsrc/lib.rs\n-\t-\tassets/logo.png\n3\t0\tsrc/{a.rs => b.rs}\n";
        let stats = parse_numstat(output);

        assert_eq!(stats.get("src/lib.rs"), Some(&Some((10, 2))));
        assert_eq!(stats.get("assets/logo.png"), Some(&None));
        assert_eq!(stats.get("src/b.rs"), Some(&Some((3, 0))));
    }

    #[test]
    fn test_resolve_rename_path() {
        assert_eq!(resolve_rename_path("a.txt => b.txt"), "b.txt");
        assert_eq!(resolve_rename_path("src/{old => new}/mod.rs"), "src/new/mod.rs");
        assert_eq!(resolve_rename_path("src/{ => nested}/mod.rs"), "src/nested/mod.rs");
        assert_eq!(resolve_rename_path("plain.rs"), "plain.rs");
    }

    #[test]
    fn test_parse_left_right() {
        assert_eq!(parse_left_right("2\t5\n"), (2, 5));
        assert_eq!(parse_left_right(""), (0, 0));
    }

    #[test]
    fn test_parse_log_line() {
        let line = "abc123\x1fAda\x1f2025-01-02T03:04:05+01:00\x1ffeat: add parser";
        let commit = parse_log_line(line).unwrap();
        assert_eq!(commit.sha, "abc123");
        assert_eq!(commit.author, "Ada");
        assert_eq!(commit.subject, "feat: add parser");
        assert_eq!(commit.date.format("%Y-%m-%d").to_string(), "2025-01-02");

        assert!(parse_log_line("garbage").is_none());
    }

    #[test]
    fn test_change_set_totals() {
        let set = ChangeSet::new(
            vec![
                FileChange::new("a.rs", ChangeKind::Modified).with_stats(5, 1),
                FileChange::new("b.rs", ChangeKind::Added).with_stats(7, 0),
            ],
            "",
        );
        assert_eq!(set.insertions(), 12);
        assert_eq!(set.deletions(), 1);
        assert_eq!(set.paths(), vec!["a.rs", "b.rs"]);
        assert_eq!(set.files[0].hunk_summary, "+5 -1");
    }

    #[test]
    fn test_head_ref_checkout_target() {
        assert_eq!(HeadRef::Branch("main".into()).checkout_target(), "main");
        assert_eq!(HeadRef::Detached("abc".into()).checkout_target(), "abc");
        assert_eq!(HeadRef::Detached("abc".into()).branch(), None);
    }

    #[tokio::test]
    async fn test_open_outside_repository() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = RepositoryInspector::open(dir.path(), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(GitQuickError::NotARepository(_))));
    }
}
