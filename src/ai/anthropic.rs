//! Anthropic messages API client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{build_user_prompt, http_client, parse_reply, Summarizer, Summary, SYSTEM_PROMPT};
use crate::error::GitQuickError;
use crate::inspector::FileChange;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 512;

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<Content>,
}

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(model: String, api_key: String, timeout: Duration) -> Result<Self, GitQuickError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model,
            base_url: ANTHROPIC_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Summarizer for AnthropicClient {
    async fn summarize(&self, diff: &str, files: &[FileChange]) -> Result<Summary, GitQuickError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: build_user_prompt(diff, files),
            }],
        };

        let url = self.api_url();
        info!(url = %url, model = %self.model, "Requesting commit summary");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| GitQuickError::AiUnavailable(format!("{}: {}", self.name(), e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitQuickError::AiUnavailable(format!(
                "{} returned HTTP {}: {}",
                self.name(),
                status,
                text
            )));
        }

        let body: MessagesResponse = response.json().await.map_err(|e| {
            GitQuickError::AiUnavailable(format!("{} sent an invalid response: {}", self.name(), e))
        })?;

        let text = body
            .content
            .into_iter()
            .find(|c| c.content_type == "text")
            .map(|c| c.text)
            .ok_or_else(|| {
                GitQuickError::AiUnavailable(format!("{} sent no text content", self.name()))
            })?;

        debug!(response_len = text.len(), "Received commit summary");
        parse_reply(&text)
    }

    fn name(&self) -> String {
        format!("Anthropic ({})", self.model)
    }
}
