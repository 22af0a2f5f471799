//! OpenAI-compatible chat completions client (OpenAI and Ollama)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{build_user_prompt, http_client, parse_reply, Summarizer, Summary, SYSTEM_PROMPT};
use crate::error::GitQuickError;
use crate::inspector::FileChange;

const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Serialize, Debug)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize, Debug)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

pub struct OpenAiClient {
    client: Client,
    /// Absent for Ollama
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GitQuickError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model,
            base_url: base_url.into(),
        })
    }

    pub fn openai(model: String, api_key: String, timeout: Duration) -> Result<Self, GitQuickError> {
        Self::new(model, Some(api_key), OPENAI_BASE_URL, timeout)
    }

    pub fn ollama(model: String, host: &str, timeout: Duration) -> Result<Self, GitQuickError> {
        Self::new(model, None, host, timeout)
    }

    fn api_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn is_ollama(&self) -> bool {
        self.api_key.is_none()
    }
}

#[async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(&self, diff: &str, files: &[FileChange]) -> Result<Summary, GitQuickError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: build_user_prompt(diff, files),
                },
            ],
            temperature: 0.1,
            stream: false,
        };

        let url = self.api_url();
        info!(url = %url, model = %self.model, "Requesting commit summary");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
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

        let body: ChatResponse = response.json().await.map_err(|e| {
            GitQuickError::AiUnavailable(format!("{} sent an invalid response: {}", self.name(), e))
        })?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| GitQuickError::AiUnavailable(format!("{} sent no choices", self.name())))?;

        debug!(response_len = content.len(), "Received commit summary");
        parse_reply(&content)
    }

    fn name(&self) -> String {
        let provider = if self.is_ollama() { "Ollama" } else { "OpenAI" };
        format!("{} ({})", provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::ChangeKind;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn files() -> Vec<FileChange> {
        vec![FileChange::new("src/lib.rs", ChangeKind::Modified).with_stats(1, 1)]
    }

    #[test]
    fn test_api_url_trailing_slash() {
        let client =
            OpenAiClient::ollama("llama3.2".into(), "http://localhost:11434/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.api_url(), "http://localhost:11434/v1/chat/completions");
        assert!(client.is_ollama());
    }

    #[test]
    fn test_openai_defaults() {
        let client =
            OpenAiClient::openai("gpt-4o-mini".into(), "sk-test".into(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.api_url(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(client.name(), "OpenAI (gpt-4o-mini)");
    }

    #[tokio::test]
    async fn test_summarize_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "fix(lib): correct offset\n\nOff by one."}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new(
            "gpt-4o-mini".into(),
            Some("sk-test".into()),
            server.uri(),
            Duration::from_secs(5),
        )
        .unwrap();

        let summary = client.summarize("-a\n+b\n", &files()).await.unwrap();
        assert_eq!(summary.subject, "fix(lib): correct offset");
        assert_eq!(summary.body.as_deref(), Some("Off by one."));
    }

    #[tokio::test]
    async fn test_summarize_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client =
            OpenAiClient::ollama("llama3.2".into(), &server.uri(), Duration::from_secs(5)).unwrap();

        let err = client.summarize("", &files()).await.unwrap_err();
        assert!(matches!(err, GitQuickError::AiUnavailable(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_summarize_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client =
            OpenAiClient::ollama("llama3.2".into(), &server.uri(), Duration::from_secs(5)).unwrap();

        assert!(client.summarize("", &files()).await.is_err());
    }
}
