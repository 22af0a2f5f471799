//! Optional AI summarizers for commit messages.
//!
//! Providers only see the diff and the list of changed files. Whatever they
//! return is treated as a suggestion; the commit generator validates it.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{AiProvider, Config};
use crate::error::GitQuickError;
use crate::inspector::FileChange;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

/// Summary suggested by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// First line of the reply, possibly with a `type(scope):` prefix
    pub subject: String,
    pub body: Option<String>,
}

/// Something that can summarize a diff into a commit message
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, diff: &str, files: &[FileChange]) -> Result<Summary, GitQuickError>;

    /// Provider name used in log lines
    fn name(&self) -> String;
}

pub(crate) const SYSTEM_PROMPT: &str = "You write git commit messages. \
Reply with a conventional commit header on the first line in the form \
`type(scope): subject` where type is one of feat, fix, docs, style, refactor, \
test, chore, perf. Keep the subject under 72 characters, imperative mood, \
no trailing period. Optionally add a blank line and a short body. \
Reply with the commit message only.";

/// User prompt: changed files followed by the (already truncated) diff
pub(crate) fn build_user_prompt(diff: &str, files: &[FileChange]) -> String {
    let mut prompt = String::from("Changed files:\n");
    for file in files {
        prompt.push_str(&format!("- {} {}", file.kind, file.path));
        if !file.hunk_summary.is_empty() {
            prompt.push_str(&format!(" ({})", file.hunk_summary));
        }
        prompt.push('\n');
    }
    prompt.push_str("\nDiff:\n");
    prompt.push_str(diff);
    prompt
}

/// Split a raw model reply into subject and body.
///
/// Code fences and blank leading lines are ignored.
pub(crate) fn parse_reply(text: &str) -> Result<Summary, GitQuickError> {
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();

    let start = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .ok_or_else(|| GitQuickError::AiUnavailable("empty reply".to_string()))?;

    let subject = lines[start].trim().to_string();
    let body = lines[start + 1..].join("\n").trim().to_string();

    Ok(Summary {
        subject,
        body: (!body.is_empty()).then_some(body),
    })
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, GitQuickError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GitQuickError::AiUnavailable(format!("failed to build HTTP client: {}", e)))
}

/// Build the summarizer selected in the configuration.
///
/// Returns `None` when no provider is configured or the provider lacks
/// credentials; callers then use the heuristic generator.
pub fn from_config(config: &Config) -> Option<Box<dyn Summarizer>> {
    let provider = config.quick.ai_provider?;
    let model = config.ai_model()?;
    let timeout = config.ai_timeout();

    let summarizer: Result<Box<dyn Summarizer>, GitQuickError> = match provider {
        AiProvider::Ollama => {
            OpenAiClient::ollama(model, &config.ai.ollama_host, timeout).map(|c| Box::new(c) as Box<dyn Summarizer>)
        }
        AiProvider::OpenAi => match &config.ai.openai_api_key {
            Some(key) => OpenAiClient::openai(model, key.clone(), timeout).map(|c| Box::new(c) as Box<dyn Summarizer>),
            None => Err(GitQuickError::AiUnavailable(
                "OPENAI_API_KEY is not set".to_string(),
            )),
        },
        AiProvider::Anthropic => match &config.ai.anthropic_api_key {
            Some(key) => {
                AnthropicClient::new(model, key.clone(), timeout).map(|c| Box::new(c) as Box<dyn Summarizer>)
            }
            None => Err(GitQuickError::AiUnavailable(
                "ANTHROPIC_API_KEY is not set".to_string(),
            )),
        },
    };

    match summarizer {
        Ok(summarizer) => {
            debug!("Using {} for commit messages", summarizer.name());
            Some(summarizer)
        }
        Err(e) => {
            warn!("{}, falling back to heuristic commit messages", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::ChangeKind;

    #[test]
    fn test_parse_reply_subject_and_body() {
        let summary = parse_reply("feat(cli): add flag\n\nLonger explanation.\nSecond line.\n").unwrap();
        assert_eq!(summary.subject, "feat(cli): add flag");
        assert_eq!(
            summary.body.as_deref(),
            Some("Longer explanation.\nSecond line.")
        );
    }

    #[test]
    fn test_parse_reply_strips_fences() {
        let summary = parse_reply("```\nfix: handle empty diff\n```\n").unwrap();
        assert_eq!(summary.subject, "fix: handle empty diff");
        assert!(summary.body.is_none());
    }

    #[test]
    fn test_parse_reply_empty() {
        assert!(matches!(
            parse_reply("  \n\n```\n```"),
            Err(GitQuickError::AiUnavailable(_))
        ));
    }

    #[test]
    fn test_user_prompt_lists_files() {
        let files = vec![FileChange::new("src/a.rs", ChangeKind::Modified).with_stats(3, 1)];
        let prompt = build_user_prompt("+x\n", &files);
        assert!(prompt.contains("- modified src/a.rs (+3 -1)"));
        assert!(prompt.ends_with("Diff:\n+x\n"));
    }

    #[test]
    fn test_from_config_without_provider() {
        assert!(from_config(&Config::default()).is_none());
    }

    #[test]
    fn test_from_config_missing_key() {
        let mut config = Config::default();
        config.quick.ai_provider = Some(AiProvider::Anthropic);
        config.ai.anthropic_api_key = None;
        assert!(from_config(&config).is_none());
    }

    #[test]
    fn test_from_config_ollama_needs_no_key() {
        let mut config = Config::default();
        config.quick.ai_provider = Some(AiProvider::Ollama);
        let summarizer = from_config(&config).unwrap();
        assert_eq!(summarizer.name(), "Ollama (llama3.2)");
    }
}
