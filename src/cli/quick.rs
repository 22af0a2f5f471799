//! `git-quick`: commit and push in one step.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use super::GlobalArgs;
use crate::commit::CommitMessageGenerator;
use crate::config::Config;
use crate::error::GitQuickError;
use crate::git::short_sha;
use crate::quick::{QuickCommit, QuickOptions, QuickOutcome};

#[derive(Parser, Debug)]
#[command(name = "git-quick")]
#[command(about = "Stage, commit and push with a generated commit message")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Commit without pushing
    #[arg(long)]
    no_push: bool,

    /// Print the message that would be used and stop
    #[arg(long)]
    dry_run: bool,

    /// Skip the AI provider and use heuristic messages
    #[arg(long)]
    no_ai: bool,

    /// Use this commit message instead of generating one
    #[arg(short, long)]
    message: Option<String>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect or edit the configuration file
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the configuration file location
    Path,
    /// Write a default configuration file
    Init,
    /// Set a value, e.g. `quick.auto_push false`
    Set { key: String, value: String },
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    super::finish(run(cli).await)
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    if let Some(Commands::Config { config_command }) = &cli.command {
        return handle_config_command(&cli.global, config_command);
    }

    let config = cli.global.setup()?;
    let inspector = super::open_repository(&config).await?;
    super::record_activity(&config, &inspector).await;

    let options = QuickOptions::resolve(
        &config.quick,
        cli.no_push,
        cli.dry_run,
        cli.no_ai,
        cli.message.clone(),
    );
    let generator = if options.use_ai {
        CommitMessageGenerator::from_config(&config)
    } else {
        CommitMessageGenerator::heuristic()
    };
    if options.use_ai && !generator.has_ai() {
        debug!("No AI provider configured, using heuristic messages");
    }

    let outcome = match QuickCommit::new(&inspector, &generator).run(&options).await {
        Ok(outcome) => outcome,
        Err(GitQuickError::NoChanges) => {
            println!("✨ Nothing to commit, working tree clean");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    };

    match outcome {
        QuickOutcome::DryRun { message } => {
            println!("🔍 Dry run, commit message would be:");
            println!();
            println!("{}", message);
            Ok(ExitCode::SUCCESS)
        }
        QuickOutcome::Committed {
            sha,
            message,
            branch,
            pushed,
            push_error,
        } => {
            let header = message.lines().next().unwrap_or_default();
            println!("✅ [{}] {}", short_sha(&sha), header);

            let branch = branch.unwrap_or_else(|| "HEAD".to_string());
            if pushed {
                println!("🚀 Pushed {}", branch);
            } else if !options.push {
                info!("Push disabled, commit stays local");
            }

            match push_error {
                Some(error) => {
                    eprintln!("❌ Push of {} failed: {}", branch, error);
                    eprintln!("   The commit was created locally.");
                    Ok(ExitCode::FAILURE)
                }
                None => Ok(ExitCode::SUCCESS),
            }
        }
    }
}

fn handle_config_command(global: &GlobalArgs, command: &ConfigCommands) -> Result<ExitCode> {
    let path = global.config_path()?;

    match command {
        ConfigCommands::Show => {
            let config = global.setup()?;
            let content =
                toml::to_string_pretty(&redacted(config)).context("Failed to serialize configuration")?;
            println!("# {}", path.display());
            print!("{}", content);
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Init => {
            if Config::init_file(&path)? {
                println!("✅ Created {}", path.display());
            } else {
                println!("⚠️  {} already exists, left untouched", path.display());
            }
        }
        ConfigCommands::Set { key, value } => {
            Config::set_value(&path, key, value)?;
            println!("✅ {} = {}", key, value);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Credentials are never printed
fn redacted(mut config: Config) -> Config {
    let hide = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some("<redacted>".to_string());
        }
    };
    hide(&mut config.ai.openai_api_key);
    hide(&mut config.ai.anthropic_api_key);
    config
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
    fn test_parse_flags() {
        let cli = Cli::try_parse_from(["git-quick", "--no-push", "-m", "fix: typo"]).unwrap();
        assert!(cli.no_push);
        assert!(!cli.dry_run);
        assert_eq!(cli.message.as_deref(), Some("fix: typo"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_config_set() {
        let cli =
            Cli::try_parse_from(["git-quick", "config", "set", "quick.auto_push", "false"]).unwrap();
        match cli.command {
            Some(Commands::Config {
                config_command: ConfigCommands::Set { key, value },
            }) => {
                assert_eq!(key, "quick.auto_push");
                assert_eq!(value, "false");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_redacted_hides_keys() {
        let mut config = Config::default();
        config.ai.openai_api_key = Some("sk-secret".to_string());
        let config = redacted(config);
        assert_eq!(config.ai.openai_api_key.as_deref(), Some("<redacted>"));
        assert!(config.ai.anthropic_api_key.is_none());
    }
}
