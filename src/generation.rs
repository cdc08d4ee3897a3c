//! Generation collaborators.
//!
//! The orchestrator only sees the [`Generator`] capability:
//! `generate(messages, params) -> text`. Two implementations ship:
//!
//! - **[`ChatCompletionsGenerator`]**: Mistral or any OpenAI-compatible
//!   `POST /chat/completions` endpoint, with retry on 429/5xx.
//! - **[`StubGenerator`]**: deterministic, offline, used in tests and when no
//!   API key is configured.
//!
//! Failures are classified into [`GenerationError`] variants so the caller
//! can tell a transient upstream hiccup from a permanent rejection or a
//! malformed response.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use ragdesk_core::error::GenerationError;
use ragdesk_core::models::{Message, Role};

use crate::config::GenerationConfig;

pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MISTRAL_MODEL: &str = "mistral-large-latest";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Sampling knobs sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Short provider label for logs and `/health`.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;
}

// ============ Chat Completions ============

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

pub struct ChatCompletionsGenerator {
    label: String,
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChatCompletionsGenerator {
    pub fn new(
        label: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        max_retries: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            label: label.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            max_retries,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Transient(format!("request timed out: {}", e))
                } else {
                    GenerationError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("{} API error {}: {}", self.label, status, body);
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(GenerationError::Transient(msg))
            } else {
                Err(GenerationError::Permanent(msg))
            };
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        parse_chat_response(&json)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Malformed("missing choices[0].message.content".to_string()))
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let mut last_err = GenerationError::Transient("no attempt made".to_string());
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }
            match self.send_once(&request).await {
                Ok(text) => {
                    debug!(provider = %self.label, chars = text.len(), attempt, "generation succeeded");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() => {
                    warn!(provider = %self.label, attempt, error = %e, "generation failed, retrying");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

// ============ Stub ============

/// Reply used by [`StubGenerator`] when the prompt carries no documents.
pub const STUB_NO_CONTEXT: &str =
    "I don't have enough information in the provided documents to answer that question.";

/// Deterministic offline generator.
///
/// Answers by quoting the first context document in the last user message
/// (`[Document 1: name]` followed by its text), or with [`STUB_NO_CONTEXT`]
/// when there is none. A fixed reply can be set with
/// [`StubGenerator::with_reply`].
#[derive(Debug, Clone, Default)]
pub struct StubGenerator {
    reply: Option<String>,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }
}

#[async_trait]
impl Generator for StubGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        if let Some(reply) = &self.reply {
            return Ok(reply.clone());
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let mut lines = prompt.lines();
        while let Some(line) = lines.next() {
            if let Some(rest) = line.strip_prefix("[Document 1: ") {
                let filename = rest.trim_end_matches(']');
                let first = lines.next().unwrap_or_default().trim();
                let quote: String = first.chars().take(160).collect();
                return Ok(format!("According to Document 1 ({}): {}", filename, quote));
            }
        }
        Ok(STUB_NO_CONTEXT.to_string())
    }
}

/// Create the [`Generator`] named by `generation.provider`.
///
/// A real provider without its API key falls back to [`StubGenerator`] with
/// a warning, so a fresh install can still ingest and search.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    let (label, key_var, default_url, default_model) = match config.provider.as_str() {
        "stub" => return Ok(Arc::new(StubGenerator::new())),
        "mistral" => ("mistral", "MISTRAL_API_KEY", MISTRAL_BASE_URL, DEFAULT_MISTRAL_MODEL),
        "openai" => ("openai", "OPENAI_API_KEY", OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    };

    let Ok(api_key) = std::env::var(key_var) else {
        warn!(provider = label, "{} not set, answers will come from the stub generator", key_var);
        return Ok(Arc::new(StubGenerator::new()));
    };

    Ok(Arc::new(ChatCompletionsGenerator::new(
        label,
        config.url.clone().unwrap_or_else(|| default_url.to_string()),
        config
            .model
            .clone()
            .unwrap_or_else(|| default_model.to_string()),
        api_key,
        config.max_retries,
        config.timeout(),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_quotes_first_document() {
        let messages = vec![
            Message::system("Answer only from context."),
            Message::user(
                "Context Documents:\n[Document 1: esg.txt]\nEmissions fell by 30%.\n\nQuestion: What happened?",
            ),
        ];
        let reply = StubGenerator::new()
            .generate(&messages, &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "According to Document 1 (esg.txt): Emissions fell by 30%.");
    }

    #[tokio::test]
    async fn test_stub_without_context() {
        let messages = vec![Message::user("Question: anything?")];
        let reply = StubGenerator::new()
            .generate(&messages, &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(reply, STUB_NO_CONTEXT);
    }

    #[tokio::test]
    async fn test_stub_fixed_reply() {
        let reply = StubGenerator::with_reply("fixed")
            .generate(&[], &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "fixed");
    }

    #[test]
    fn test_parse_chat_response() {
        let ok = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello"}}]
        });
        assert_eq!(parse_chat_response(&ok).unwrap(), "Hello");

        let bad = serde_json::json!({"choices": []});
        assert!(matches!(
            parse_chat_response(&bad),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn test_request_serializes_roles() {
        let content = "hi".to_string();
        let req = ChatRequest {
            model: "m",
            messages: vec![WireMessage {
                role: Role::System.as_str(),
                content: &content,
            }],
            temperature: 0.5,
            max_tokens: 10,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["max_tokens"], 10);
    }

    #[test]
    fn test_create_stub_generator() {
        let mut config = GenerationConfig::default();
        config.provider = "stub".to_string();
        assert_eq!(create_generator(&config).unwrap().name(), "stub");
        config.provider = "bard".to_string();
        assert!(create_generator(&config).is_err());
    }
}
