//! Shared plumbing for the four binaries: flags, logging, configuration and
//! repository discovery.

pub mod quick;
pub mod story;
pub mod sync;
pub mod time;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::git::ensure_git_available;
use crate::inspector::RepositoryInspector;
use crate::time::TimeTracker;

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Configuration file path (defaults to ~/.gitquick/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Resolve configuration and start logging
    pub fn setup(&self) -> Result<Config> {
        let config = load_config(self.config.as_deref())?;
        init_logging(self.verbose, &config.logging.level);
        debug!("git-quick v{}", env!("CARGO_PKG_VERSION"));
        Ok(config)
    }

    /// The file `config` subcommands read and write
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Config::default_config_path(),
        }
    }
}

/// Initialize logging on stderr so command output on stdout stays clean
pub fn init_logging(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init();
}

/// Load configuration from specified path or default location
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::resolve(path).context("Failed to load configuration")
}

/// Open the repository containing the current directory
pub async fn open_repository(config: &Config) -> Result<RepositoryInspector> {
    ensure_git_available().await?;
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let inspector = RepositoryInspector::open(&cwd, config.network_timeout()).await?;
    Ok(inspector)
}

/// Feed command activity into the time tracker when auto-tracking is on.
/// Problems here never fail the command.
pub async fn record_activity(config: &Config, inspector: &RepositoryInspector) {
    if !config.time.auto_track {
        return;
    }

    let branch = match inspector.current_branch().await {
        Ok(Some(branch)) => branch,
        Ok(None) => return,
        Err(e) => {
            warn!("Time tracking skipped: {}", e);
            return;
        }
    };

    let tracker = TimeTracker::from_config(config);
    let repository = Some(inspector.root().display().to_string());
    if let Err(e) = tracker.record_activity(&branch, repository) {
        warn!("Time tracking skipped: {}", e);
    }
}

/// Print a terminal error and turn the result into an exit code
pub fn finish(result: Result<ExitCode>) -> ExitCode {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
