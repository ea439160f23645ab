//! Language-model adapters.
//!
//! A [`LanguageModel`] turns an ordered list of chat messages into one
//! completion. The HTTP adapters reuse the embedding module's
//! retry-with-backoff helper.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::post_with_retry;
use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    fn temperature(&self) -> f32;
    fn max_tokens(&self) -> u32;
    /// `false` when every call is guaranteed to fail.
    fn is_configured(&self) -> bool {
        true
    }
    async fn generate(&self, messages: &[ChatMessage]) -> crate::error::Result<String>;
}

// ============ Disabled Model ============

pub struct DisabledModel {
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl DisabledModel {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn temperature(&self) -> f32 {
        self.temperature
    }
    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
    fn is_configured(&self) -> bool {
        false
    }
    async fn generate(&self, _messages: &[ChatMessage]) -> crate::error::Result<String> {
        Err(CoreError::language_model("language model is disabled"))
    }
}

// ============ OpenAI Chat ============

/// Chat model behind `POST /v1/chat/completions`.
pub struct OpenAIChat {
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn temperature(&self) -> f32 {
        self.temperature
    }
    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
    async fn generate(&self, messages: &[ChatMessage]) -> crate::error::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let request = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let json = post_with_retry("OpenAI", request, self.max_retries)
            .await
            .map_err(|e| CoreError::language_model(e.to_string()))?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| CoreError::language_model("response missing choices[0].message.content"))
    }
}

// ============ Ollama Chat ============

/// Chat model behind a local Ollama instance's `POST /api/chat`.
pub struct OllamaChat {
    model: String,
    temperature: f32,
    max_tokens: u32,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn temperature(&self) -> f32 {
        self.temperature
    }
    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
    async fn generate(&self, messages: &[ChatMessage]) -> crate::error::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let request = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body);

        let json = post_with_retry("Ollama", request, self.max_retries)
            .await
            .map_err(|e| CoreError::language_model(e.to_string()))?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| CoreError::language_model("response missing message.content"))
    }
}

/// Create the configured [`LanguageModel`].
///
/// A configured `openai` provider without `OPENAI_API_KEY` is an error
/// here, so misconfiguration surfaces at startup.
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel::new(config))),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_model_reports_unconfigured() {
        let model = create_language_model(&LlmConfig::default()).unwrap();
        assert!(!model.is_configured());
        assert_eq!(model.model_name(), "gpt-3.5-turbo");
        let err = model.generate(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert_eq!(err.category(), "language model failed");
    }

    #[test]
    fn test_ollama_model_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            model: "llama3".to_string(),
            ..LlmConfig::default()
        };
        let model = create_language_model(&config).unwrap();
        assert!(model.is_configured());
        assert_eq!(model.max_tokens(), 4000);
    }

    #[test]
    fn test_chat_message_serializes_role_and_content() {
        let json = serde_json::to_value(ChatMessage::system("be brief")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "be brief"}));
    }
}
