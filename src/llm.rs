use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bot::CompletionInvoker;
use crate::config::{AiProvider, Config, ConfigError};
use crate::error::EventError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation in chat-completion format. `content` is
/// never empty: the conversation builder drops blank messages before they
/// reach this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat-completions endpoint. Both
/// supported providers speak the same wire format; they differ only in
/// credentials, base URL, default model, and extra headers.
#[derive(Debug)]
pub struct LlmClient {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    extra_headers: Vec<(&'static str, String)>,
}

impl LlmClient {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        match config.provider {
            AiProvider::Openai => {
                let api_key =
                    config
                        .openai_api_key
                        .clone()
                        .ok_or(ConfigError::MissingProviderKey {
                            key: "OPENAI_API_KEY",
                            provider: config.provider,
                        })?;
                Ok(Self {
                    client: reqwest::Client::new(),
                    model: config
                        .openai_model
                        .clone()
                        .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                    base_url: "https://api.openai.com/v1".to_string(),
                    api_key,
                    extra_headers: Vec::new(),
                })
            }
            AiProvider::Openrouter => {
                let api_key =
                    config
                        .openrouter_api_key
                        .clone()
                        .ok_or(ConfigError::MissingProviderKey {
                            key: "OPENROUTER_API_KEY",
                            provider: config.provider,
                        })?;
                let mut extra_headers = Vec::new();
                if let Some(referer) = &config.openrouter_referer {
                    extra_headers.push(("HTTP-Referer", referer.clone()));
                }
                if let Some(title) = &config.openrouter_title {
                    extra_headers.push(("X-Title", title.clone()));
                }
                Ok(Self {
                    client: reqwest::Client::new(),
                    model: config
                        .openrouter_model
                        .clone()
                        .unwrap_or_else(|| "openrouter/auto".to_string()),
                    base_url: config
                        .openrouter_base_url
                        .clone()
                        .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
                    api_key,
                    extra_headers,
                })
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a reply for the given conversation.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, EventError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("Sending completion request to {}", url);

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request);
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value.as_str());
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EventError::Api {
                endpoint: "chat/completions",
                detail: format!("{}: {}", status, body),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(EventError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionInvoker for LlmClient {
    async fn invoke_completion(&self, messages: &[ChatMessage]) -> Result<String, EventError> {
        self.complete(messages).await
    }
}
