//! Local time tracking keyed to repository activity.
//!
//! Two files live under `data_dir`:
//!
//! - `entries.jsonl`: append-only log. Starting a session appends an open
//!   entry; closing it appends the same entry again with its end time. When
//!   reading, the last line for a given (start, branch) wins, so a crash
//!   leaves exactly one open entry behind.
//! - `active.json`: single-slot marker for the open session, created
//!   exclusively so only one session can be open at a time.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GitQuickError, Result};
use crate::inspector::RepositoryInspector;

const ENTRIES_FILE: &str = "entries.jsonl";
const ACTIVE_FILE: &str = "active.json";

/// One tracked session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub start: DateTime<Utc>,
    /// Absent while the session is open
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub idle_seconds: u64,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl TimeEntry {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// `end - start - idle`, with open entries measured up to `now`
    pub fn active_seconds(&self, now: DateTime<Utc>) -> u64 {
        let end = self.end.unwrap_or(now);
        let elapsed = (end - self.start).num_seconds().max(0) as u64;
        elapsed.saturating_sub(self.idle_seconds)
    }
}

/// Contents of the single-slot marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub branch: String,
    pub start: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl ActiveSession {
    fn to_entry(&self) -> TimeEntry {
        TimeEntry {
            start: self.start,
            end: None,
            idle_seconds: 0,
            branch: self.branch.clone(),
            repository: self.repository.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub branch: Option<String>,
    /// Repository root; sessions recorded elsewhere never match
    pub repository: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl ReportFilter {
    fn matches(&self, entry: &TimeEntry) -> bool {
        self.branch.as_ref().map_or(true, |b| &entry.branch == b)
            && self
                .repository
                .as_ref()
                .map_or(true, |r| entry.repository.as_ref() == Some(r))
            && self.since.map_or(true, |since| entry.start >= since)
    }
}

#[derive(Debug, Clone)]
pub struct TimeTracker {
    data_dir: PathBuf,
    idle_threshold: Duration,
    /// Start sessions on activity rather than only on explicit `start`
    auto_track: bool,
}

impl TimeTracker {
    pub fn new(data_dir: impl Into<PathBuf>, idle_threshold: Duration, auto_track: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            idle_threshold,
            auto_track,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.data_dir(), config.idle_threshold(), config.time.auto_track)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn entries_path(&self) -> PathBuf {
        self.data_dir.join(ENTRIES_FILE)
    }

    fn active_path(&self) -> PathBuf {
        self.data_dir.join(ACTIVE_FILE)
    }

    pub fn start(&self, branch: &str, repository: Option<String>) -> Result<ActiveSession> {
        self.start_at(branch, repository, Utc::now())
    }

    /// Open a session. Fails with `AlreadyTracking` while another is open.
    pub fn start_at(
        &self,
        branch: &str,
        repository: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ActiveSession> {
        fs::create_dir_all(&self.data_dir)?;
        self.check_idle_at(now)?;

        let session = ActiveSession {
            branch: branch.to_string(),
            start: now,
            last_activity: now,
            repository,
        };

        let path = self.active_path();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(to_json(&path, &session)?.as_bytes())?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = self.read_marker()?;
                return Err(match existing {
                    Some(open) => GitQuickError::AlreadyTracking {
                        branch: open.branch,
                        since: open.start,
                    },
                    None => GitQuickError::AlreadyTracking {
                        branch: branch.to_string(),
                        since: now,
                    },
                });
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.append(&session.to_entry()) {
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        info!("Started tracking time on '{}'", branch);
        Ok(session)
    }

    pub fn stop(&self) -> Result<TimeEntry> {
        self.stop_at(Utc::now())
    }

    /// Close the open session. Fails with `NotTracking` if there is none.
    pub fn stop_at(&self, now: DateTime<Utc>) -> Result<TimeEntry> {
        let session = self.read_marker()?.ok_or(GitQuickError::NotTracking)?;
        let entry = self.close(&session, now)?;
        info!(
            "Stopped tracking '{}' after {}",
            entry.branch,
            format_duration(entry.active_seconds(now))
        );
        Ok(entry)
    }

    pub fn status(&self) -> Result<Option<ActiveSession>> {
        self.status_at(Utc::now())
    }

    /// The open session, after applying the idle check
    pub fn status_at(&self, now: DateTime<Utc>) -> Result<Option<ActiveSession>> {
        self.check_idle_at(now)?;
        self.read_marker()
    }

    pub fn touch(&self) -> Result<Option<TimeEntry>> {
        self.touch_at(Utc::now())
    }

    /// Record activity on the open session.
    ///
    /// Returns the closed entry when the session had already gone idle; it is
    /// not reopened.
    pub fn touch_at(&self, now: DateTime<Utc>) -> Result<Option<TimeEntry>> {
        if let Some(closed) = self.check_idle_at(now)? {
            return Ok(Some(closed));
        }
        if let Some(mut session) = self.read_marker()? {
            session.last_activity = now;
            self.write_marker(&session)?;
        }
        Ok(None)
    }

    pub fn check_idle(&self) -> Result<Option<TimeEntry>> {
        self.check_idle_at(Utc::now())
    }

    /// Close the open session if it has been idle longer than the threshold
    pub fn check_idle_at(&self, now: DateTime<Utc>) -> Result<Option<TimeEntry>> {
        let Some(session) = self.read_marker()? else {
            return Ok(None);
        };

        let gap = (now - session.last_activity).num_seconds().max(0) as u64;
        if gap <= self.idle_threshold.as_secs() {
            return Ok(None);
        }

        let entry = self.close(&session, now)?;
        info!(
            "Closed idle session on '{}' after {}s without activity",
            entry.branch, gap
        );
        Ok(Some(entry))
    }

    pub fn record_activity(&self, branch: &str, repository: Option<String>) -> Result<()> {
        self.record_activity_at(branch, repository, Utc::now())
    }

    /// Activity seen by a command or the watcher. Touches the open session,
    /// switching sessions when the branch changed; with auto-tracking on, a
    /// session is started when none is open.
    pub fn record_activity_at(
        &self,
        branch: &str,
        repository: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check_idle_at(now)?;

        match self.read_marker()? {
            Some(session) if session.branch == branch => {
                self.touch_at(now)?;
            }
            Some(session) => {
                debug!("Branch changed from '{}' to '{}'", session.branch, branch);
                self.close(&session, now)?;
                self.start_at(branch, repository, now)?;
            }
            None if self.auto_track => {
                self.start_at(branch, repository, now)?;
            }
            None => {}
        }
        Ok(())
    }

    /// Entries matching `filter`, oldest first
    pub fn report(&self, filter: &ReportFilter) -> Result<Vec<TimeEntry>> {
        Ok(self
            .read_entries()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect())
    }

    /// Poll repository activity until `shutdown` resolves, then close the
    /// open session.
    pub async fn watch<F>(
        &self,
        inspector: &RepositoryInspector,
        poll_interval: Duration,
        shutdown: F,
    ) -> Result<Option<TimeEntry>>
    where
        F: Future<Output = ()>,
    {
        let git_dir = inspector.git_dir().await?;
        let repository = Some(inspector.root().display().to_string());

        let branch = current_branch_label(inspector).await?;
        self.record_activity(&branch, repository.clone())?;
        let mut last_seen = activity_stamp(&git_dir);

        let mut ticker = interval(poll_interval);
        ticker.tick().await;
        tokio::pin!(shutdown);

        info!("Watching {} every {}s", inspector.root().display(), poll_interval.as_secs());

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown requested, leaving watch loop");
                    break;
                }
                _ = ticker.tick() => {
                    let stamp = activity_stamp(&git_dir);
                    if stamp != last_seen {
                        last_seen = stamp;
                        let branch = current_branch_label(inspector).await?;
                        self.record_activity(&branch, repository.clone())?;
                    } else {
                        self.check_idle()?;
                    }
                }
            }
        }

        match self.stop() {
            Ok(entry) => Ok(Some(entry)),
            Err(GitQuickError::NotTracking) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&self, session: &ActiveSession, now: DateTime<Utc>) -> Result<TimeEntry> {
        let gap = (now - session.last_activity).num_seconds().max(0) as u64;
        let idle_seconds = if gap > self.idle_threshold.as_secs() { gap } else { 0 };

        let entry = TimeEntry {
            start: session.start,
            end: Some(now.max(session.start)),
            idle_seconds,
            branch: session.branch.clone(),
            repository: session.repository.clone(),
        };

        self.append(&entry)?;
        match fs::remove_file(self.active_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(entry)
    }

    fn append(&self, entry: &TimeEntry) -> Result<()> {
        let path = self.entries_path();
        let mut line = to_json(&path, entry)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn read_entries(&self) -> Result<Vec<TimeEntry>> {
        let path = self.entries_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<TimeEntry> = Vec::new();
        let mut index: HashMap<(DateTime<Utc>, String), usize> = HashMap::new();

        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: TimeEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable line {} of {}: {}", number + 1, path.display(), e);
                    continue;
                }
            };

            let key = (entry.start, entry.branch.clone());
            match index.get(&key) {
                Some(&pos) => entries[pos] = entry,
                None => {
                    index.insert(key, entries.len());
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }

    fn read_marker(&self) -> Result<Option<ActiveSession>> {
        let path = self.active_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| GitQuickError::CorruptState {
                path,
                reason: e.to_string(),
            })
    }

    /// Replace the marker contents atomically
    fn write_marker(&self, session: &ActiveSession) -> Result<()> {
        let path = self.active_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, to_json(&path, session)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn to_json<T: Serialize>(path: &Path, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| GitQuickError::CorruptState {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

async fn current_branch_label(inspector: &RepositoryInspector) -> Result<String> {
    Ok(inspector
        .current_branch()
        .await?
        .unwrap_or_else(|| "HEAD".to_string()))
}

/// Latest modification among the files git touches on stage, commit and
/// checkout
fn activity_stamp(git_dir: &Path) -> Option<SystemTime> {
    ["index", "HEAD", "logs/HEAD"]
        .iter()
        .filter_map(|name| fs::metadata(git_dir.join(name)).and_then(|m| m.modified()).ok())
        .max()
}

/// Active seconds per branch, sorted by branch name
pub fn totals(entries: &[TimeEntry], now: DateTime<Utc>) -> BTreeMap<String, u64> {
    let mut totals = BTreeMap::new();
    for entry in entries {
        *totals.entry(entry.branch.clone()).or_insert(0) += entry.active_seconds(now);
    }
    totals
}

/// `1h 05m`, `12m 30s` or `45s`
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
