//! `git-time`: per-branch time tracking.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use super::GlobalArgs;
use crate::config::Config;
use crate::error::GitQuickError;
use crate::inspector::RepositoryInspector;
use crate::time::{format_duration, totals, ReportFilter, TimeTracker};

#[derive(Parser, Debug)]
#[command(name = "git-time")]
#[command(about = "Track time spent per branch")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start tracking the current branch
    Start {
        /// Track this branch instead of the checked-out one
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Stop the running session
    Stop,

    /// Show the running session
    Status,

    /// Follow repository activity until interrupted
    Watch {
        /// Seconds between polls (defaults to time.poll_interval)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Summarize tracked time
    Report {
        /// Include every branch, not just the current one
        #[arg(long)]
        all: bool,

        /// Only sessions started after this point (`2025-03-01`, RFC 3339, or `7d`/`12h`/`30m`)
        #[arg(long)]
        since: Option<String>,
    },
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    super::finish(run(cli).await)
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.global.setup()?;
    let tracker = TimeTracker::from_config(&config);
    debug!("Time data in {}", tracker.data_dir().display());

    match cli.command {
        Commands::Start { branch } => start(&config, &tracker, branch).await,
        Commands::Stop => stop(&tracker),
        Commands::Status => status(&tracker),
        Commands::Watch { interval } => watch(&config, &tracker, interval).await,
        Commands::Report { all, since } => report(&config, &tracker, all, since.as_deref()).await,
    }
}

async fn start(config: &Config, tracker: &TimeTracker, branch: Option<String>) -> Result<ExitCode> {
    let repository = current_repository(config).await;

    let branch = match branch {
        Some(branch) => branch,
        None => {
            let inspector = repository
                .as_ref()
                .ok_or_else(|| anyhow!("Not inside a git repository; pass --branch"))?;
            inspector
                .current_branch()
                .await?
                .ok_or_else(|| anyhow!("HEAD is detached; pass --branch"))?
        }
    };
    let root = repository.map(|r| r.root().display().to_string());

    match tracker.start(&branch, root) {
        Ok(session) => {
            println!(
                "⏱️  Tracking '{}' since {}",
                session.branch,
                session.start.with_timezone(&Local).format("%H:%M")
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ GitQuickError::AlreadyTracking { .. }) => {
            eprintln!("⚠️  {}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

fn stop(tracker: &TimeTracker) -> Result<ExitCode> {
    match tracker.stop() {
        Ok(entry) => {
            let now = Utc::now();
            println!(
                "⏹️  Stopped '{}' after {}",
                entry.branch,
                format_duration(entry.active_seconds(now))
            );
            if entry.idle_seconds > 0 {
                println!("   ({} idle excluded)", format_duration(entry.idle_seconds));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(GitQuickError::NotTracking) => {
            eprintln!("⚠️  {}", GitQuickError::NotTracking);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

fn status(tracker: &TimeTracker) -> Result<ExitCode> {
    let now = Utc::now();
    match tracker.status_at(now)? {
        Some(session) => {
            let elapsed = (now - session.start).num_seconds().max(0) as u64;
            let quiet = (now - session.last_activity).num_seconds().max(0) as u64;
            println!(
                "⏱️  Tracking '{}' for {} (last activity {} ago)",
                session.branch,
                format_duration(elapsed),
                format_duration(quiet)
            );
        }
        None => println!("Not tracking"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn watch(config: &Config, tracker: &TimeTracker, interval: Option<u64>) -> Result<ExitCode> {
    let inspector = super::open_repository(config).await?;
    let poll = Duration::from_secs(interval.unwrap_or(config.time.poll_interval).max(1));

    // Watching is an explicit request to track, whatever auto_track says
    if tracker.status()?.is_none() {
        let branch = inspector
            .current_branch()
            .await?
            .unwrap_or_else(|| "HEAD".to_string());
        tracker.start(&branch, Some(inspector.root().display().to_string()))?;
    }

    println!("👀 Watching {} (Ctrl-C to stop)", inspector.root().display());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match tracker.watch(&inspector, poll, shutdown).await? {
        Some(entry) => println!(
            "⏹️  Stopped '{}' after {}",
            entry.branch,
            format_duration(entry.active_seconds(Utc::now()))
        ),
        None => println!("⏹️  Stopped"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn report(
    config: &Config,
    tracker: &TimeTracker,
    all: bool,
    since: Option<&str>,
) -> Result<ExitCode> {
    let now = Utc::now();
    let since = since.map(|s| parse_since(s, now)).transpose()?;

    let (branch, repository) = if all {
        (None, None)
    } else {
        match current_repository(config).await {
            Some(inspector) => (
                inspector.current_branch().await?,
                Some(inspector.root().display().to_string()),
            ),
            None => (None, None),
        }
    };

    let filter = ReportFilter {
        branch: branch.clone(),
        repository,
        since,
    };
    let entries = tracker.report(&filter)?;

    match &branch {
        Some(branch) => println!("📊 Time on '{}'", branch),
        None => println!("📊 Time on all branches"),
    }

    if entries.is_empty() {
        println!("   No sessions recorded");
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    for entry in &entries {
        let start = entry.start.with_timezone(&Local);
        let marker = if entry.is_open() { "  (running)" } else { "" };
        println!(
            "  {}  {:<24} {:>8}{}",
            start.format("%Y-%m-%d %H:%M"),
            entry.branch,
            format_duration(entry.active_seconds(now)),
            marker
        );
    }

    let per_branch = totals(&entries, now);
    println!();
    for (branch, seconds) in &per_branch {
        println!("  {:<41} {:>8}", branch, format_duration(*seconds));
    }
    let total: u64 = per_branch.values().sum();
    println!("  {:<41} {:>8}", "Total", format_duration(total));

    Ok(ExitCode::SUCCESS)
}

/// Repository for the current directory, if there is one
async fn current_repository(config: &Config) -> Option<RepositoryInspector> {
    match super::open_repository(config).await {
        Ok(inspector) => Some(inspector),
        Err(e) => {
            debug!("No repository context: {:#}", e);
            None
        }
    }
}

/// Accept a calendar date (local midnight), an RFC 3339 timestamp, or a
/// relative `<n>d`, `<n>h`, `<n>m` offset from `now`
fn parse_since(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .context("Invalid date")?;
        return Local
            .from_local_datetime(&midnight)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| anyhow!("Date {} does not exist in the local timezone", raw));
    }

    let Some((split, _)) = raw.char_indices().last() else {
        bail!("--since needs a value");
    };
    let (amount, unit) = raw.split_at(split);
    let amount: i64 = match amount.parse() {
        Ok(amount) if amount >= 0 => amount,
        _ => bail!("Cannot parse --since '{}'", raw),
    };
    let offset = match unit {
        "d" => chrono::Duration::days(amount),
        "h" => chrono::Duration::hours(amount),
        "m" => chrono::Duration::minutes(amount),
        _ => bail!("Cannot parse --since '{}'", raw),
    };
    Ok(now - offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_report_flags() {
        let cli = Cli::try_parse_from(["git-time", "report", "--all", "--since", "7d"]).unwrap();
        match cli.command {
            Commands::Report { all, since } => {
                assert!(all);
                assert_eq!(since.as_deref(), Some("7d"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_since_relative() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(
            parse_since("7d", now).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap()
        );
        assert_eq!(
            parse_since("90m", now).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_since_rfc3339() {
        let now = Utc::now();
        assert_eq!(
            parse_since("2025-03-01T08:00:00+01:00", now).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_since_date_is_local_midnight() {
        let parsed = parse_since("2025-03-01", Utc::now()).unwrap();
        let local = parsed.with_timezone(&Local);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2025-03-01 00:00");
    }

    #[test]
    fn test_parse_since_rejects_garbage() {
        let now = Utc::now();
        assert!(parse_since("yesterday", now).is_err());
        assert!(parse_since("5w", now).is_err());
        assert!(parse_since("", now).is_err());
    }
}
