//! `git-sync-all`: bring every local branch up to date.

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use super::GlobalArgs;
use crate::sync::{BranchSyncEngine, SyncOutcome, SyncOptions, SyncReport};

#[derive(Parser, Debug)]
#[command(name = "git-sync-all")]
#[command(about = "Fetch and integrate upstream changes into every local branch")]
#[command(version)]
pub struct Cli {
    /// Only sync these branches (default: all local branches)
    branches: Vec<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Keep stale remote-tracking refs
    #[arg(long)]
    no_prune: bool,

    /// Skip branches that need the working tree instead of stashing edits
    #[arg(long)]
    no_stash: bool,

    #[command(flatten)]
    global: GlobalArgs,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    super::finish(run(cli).await)
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.global.setup()?;
    let inspector = super::open_repository(&config).await?;
    super::record_activity(&config, &inspector).await;

    let mut options = SyncOptions::from_config(&config);
    options.branches = cli.branches.clone();
    if cli.no_prune {
        options.prune = false;
    }
    if cli.no_stash {
        options.auto_stash = false;
    }

    let engine = BranchSyncEngine::new(inspector, options);

    // First Ctrl-C finishes the current branch and stops; the lock guard and
    // head restore run on the normal path.
    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current branch");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let report = engine.run().await?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", json);
    } else {
        print_report(&report);
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_report(report: &SyncReport) {
    for result in &report.results {
        println!("{} {}", icon(result.outcome), result);
    }
    if report.results.is_empty() {
        println!("No branches to sync");
    }
    println!();
    println!("{}", report.summary());
}

fn icon(outcome: SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Synced => "✅",
        SyncOutcome::UpToDate => "✔️ ",
        SyncOutcome::SkippedDirty => "⏭️ ",
        SyncOutcome::Conflict => "⚠️ ",
        SyncOutcome::Failed => "❌",
    }
}
