//! Common test utilities: throwaway repositories wired to a bare remote

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use git_quick::RepositoryInspector;
use tempfile::TempDir;

pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

static PEERS: AtomicUsize = AtomicUsize::new(0);

/// Run git in `dir`, panicking with its stderr on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to execute git");

    assert!(
        output.status.success(),
        "git {} failed in {}: {}",
        args.join(" "),
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// Write `content` to `file`, stage and commit it
pub fn commit_file(dir: &Path, file: &str, content: &str, message: &str) -> String {
    write_file(dir, file, content);
    git(dir, &["add", file]);
    git(dir, &["commit", "--quiet", "-m", message]);
    rev(dir, "HEAD")
}

pub fn write_file(dir: &Path, file: &str, content: &str) {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    std::fs::write(path, content).expect("Failed to write file");
}

pub fn read_file(dir: &Path, file: &str) -> String {
    std::fs::read_to_string(dir.join(file)).expect("Failed to read file")
}

pub fn rev(dir: &Path, rev: &str) -> String {
    git(dir, &["rev-parse", rev])
}

pub fn current_branch(dir: &Path) -> String {
    git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

pub fn stash_count(dir: &Path) -> usize {
    git(dir, &["stash", "list"]).lines().filter(|l| !l.is_empty()).count()
}

/// A bare `remote.git` plus a working clone `work` with `main` pushed
pub struct GitFixture {
    pub dir: TempDir,
    pub remote: PathBuf,
    pub work: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let remote = dir.path().join("remote.git");
        let work = dir.path().join("work");

        std::fs::create_dir_all(&remote).expect("Failed to create remote dir");
        git(&remote, &["init", "--quiet", "--bare", "--initial-branch=main"]);

        std::fs::create_dir_all(&work).expect("Failed to create work dir");
        git(&work, &["init", "--quiet", "--initial-branch=main"]);
        configure_identity(&work);
        commit_file(&work, "README.md", "# fixture\n", "Initial commit");
        git(&work, &["remote", "add", "origin", remote.to_str().expect("utf-8 path")]);
        git(&work, &["push", "--quiet", "-u", "origin", "main"]);

        Self { dir, remote, work }
    }

    /// Another clone of the remote, standing in for a teammate
    pub fn peer(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        git(
            self.dir.path(),
            &["clone", "--quiet", self.remote.to_str().expect("utf-8 path"), name],
        );
        configure_identity(&path);
        path
    }

    /// Create `branch` in the work clone from main and publish it
    pub fn publish_branch(&self, branch: &str) {
        git(&self.work, &["branch", branch, "main"]);
        git(&self.work, &["push", "--quiet", "-u", "origin", branch]);
    }

    /// Commit on `branch` from a fresh peer clone and push it
    pub fn push_upstream(&self, branch: &str, file: &str, content: &str, message: &str) -> String {
        let name = format!("peer-{}", PEERS.fetch_add(1, Ordering::SeqCst));
        let peer = self.peer(&name);
        git(&peer, &["checkout", "--quiet", branch]);
        let sha = commit_file(&peer, file, content, message);
        git(&peer, &["push", "--quiet", "origin", branch]);
        sha
    }

    pub async fn inspector(&self) -> RepositoryInspector {
        RepositoryInspector::open(&self.work, NETWORK_TIMEOUT)
            .await
            .expect("Failed to open fixture repository")
    }

    /// A config file keeping all state inside the fixture
    pub fn config_file(&self, extra: &str) -> PathBuf {
        let data_dir = self.dir.path().join("time-data");
        let path = self.dir.path().join("config.toml");
        let content = format!(
            "[time]\nauto_track = false\ndata_dir = \"{}\"\n\n[sync]\nretry_backoff_ms = 0\n\n{}\n",
            data_dir.display(),
            extra
        );
        std::fs::write(&path, content).expect("Failed to write test config");
        path
    }
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
