//! Quick commit: stage, generate a message, commit and optionally push.

use tracing::{info, warn};

use crate::commit::CommitMessageGenerator;
use crate::config::{EmojiStyle, QuickConfig};
use crate::error::Result;
use crate::inspector::RepositoryInspector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickOptions {
    /// Push after committing
    pub push: bool,
    /// Print the message without committing
    pub dry_run: bool,
    /// Use the configured AI provider when available
    pub use_ai: bool,
    /// Commit with this message instead of generating one
    pub message: Option<String>,
    pub emoji_style: EmojiStyle,
    pub conventional: bool,
}

impl QuickOptions {
    /// Combine the configuration with command-line flags.
    ///
    /// Push happens when `auto_push` is on and `--no-push` was not given.
    pub fn resolve(
        config: &QuickConfig,
        no_push: bool,
        dry_run: bool,
        no_ai: bool,
        message: Option<String>,
    ) -> Self {
        Self {
            push: config.auto_push && !no_push,
            dry_run,
            use_ai: !no_ai && config.ai_provider.is_some(),
            message,
            emoji_style: config.emoji_style,
            conventional: config.conventional_commits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickOutcome {
    /// Nothing was committed
    DryRun { message: String },
    Committed {
        sha: String,
        message: String,
        branch: Option<String>,
        pushed: bool,
        /// Why the push step failed; the commit itself stands
        push_error: Option<String>,
    },
}

pub struct QuickCommit<'a> {
    inspector: &'a RepositoryInspector,
    generator: &'a CommitMessageGenerator,
}

impl<'a> QuickCommit<'a> {
    pub fn new(inspector: &'a RepositoryInspector, generator: &'a CommitMessageGenerator) -> Self {
        Self {
            inspector,
            generator,
        }
    }

    /// Run the workflow. Staged changes are committed as they are; with an
    /// empty index everything in the working tree is staged first.
    ///
    /// Fails with `NoChanges` when there is nothing to commit.
    pub async fn run(&self, options: &QuickOptions) -> Result<QuickOutcome> {
        let git = self.inspector.git();
        let has_staged = self.inspector.has_staged_changes().await?;

        let changes = if options.dry_run {
            self.inspector.capture_change_set(has_staged).await?
        } else {
            if !has_staged {
                // Refuse early so an empty tree doesn't get a no-op `add`
                self.inspector.capture_change_set(false).await?;
                git.add_all().await?;
            }
            self.inspector.capture_change_set(true).await?
        };

        info!("Committing {} changed file(s)", changes.len());

        let message = match &options.message {
            Some(message) => message.clone(),
            None if options.use_ai => self
                .generator
                .generate(&changes, options.emoji_style, options.conventional)
                .await
                .to_string(),
            None => CommitMessageGenerator::generate_heuristic(
                &changes,
                options.emoji_style,
                options.conventional,
            )
            .to_string(),
        };

        if options.dry_run {
            return Ok(QuickOutcome::DryRun { message });
        }

        let sha = match git.commit(&message).await {
            Ok(sha) => sha,
            Err(e) => {
                if !has_staged {
                    // Leave the index as we found it
                    if let Err(reset) = git.reset_index().await {
                        warn!("Could not unstage changes after failed commit: {}", reset);
                    }
                }
                return Err(e);
            }
        };
        let branch = self.inspector.current_branch().await?;

        let (pushed, push_error) = if options.push {
            match self.push(branch.as_deref()).await {
                Ok(()) => (true, None),
                Err(e) => {
                    warn!("Push failed: {}", e);
                    (false, Some(e))
                }
            }
        } else {
            (false, None)
        };

        Ok(QuickOutcome::Committed {
            sha,
            message,
            branch,
            pushed,
            push_error,
        })
    }

    async fn push(&self, branch: Option<&str>) -> std::result::Result<(), String> {
        let branch = branch.ok_or_else(|| "HEAD is detached, nothing to push".to_string())?;
        let state = self
            .inspector
            .branch_state(branch)
            .await
            .map_err(|e| e.to_string())?;

        let remote = match state.remote.filter(|r| r != ".") {
            Some(remote) => remote,
            None => {
                let remotes = self.inspector.remotes().await.map_err(|e| e.to_string())?;
                if remotes.iter().any(|r| r == "origin") {
                    "origin".to_string()
                } else {
                    remotes
                        .into_iter()
                        .next()
                        .ok_or_else(|| "no remote configured".to_string())?
                }
            }
        };

        self.inspector
            .git()
            .push(&remote, branch, !state.has_upstream)
            .await
            .map_err(|e| e.to_string())?;

        info!("Pushed {} to {}", branch, remote);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiProvider;

    #[test]
    fn test_push_resolution() {
        let config = QuickConfig::default();
        assert!(QuickOptions::resolve(&config, false, false, false, None).push);
        assert!(!QuickOptions::resolve(&config, true, false, false, None).push);

        let no_auto = QuickConfig {
            auto_push: false,
            ..QuickConfig::default()
        };
        assert!(!QuickOptions::resolve(&no_auto, false, false, false, None).push);
        assert!(!QuickOptions::resolve(&no_auto, true, false, false, None).push);
    }

    #[test]
    fn test_ai_resolution() {
        let heuristic = QuickConfig::default();
        assert!(!QuickOptions::resolve(&heuristic, false, false, false, None).use_ai);

        let ollama = QuickConfig {
            ai_provider: Some(AiProvider::Ollama),
            ..QuickConfig::default()
        };
        assert!(QuickOptions::resolve(&ollama, false, false, false, None).use_ai);
        assert!(!QuickOptions::resolve(&ollama, false, false, true, None).use_ai);
    }
}
