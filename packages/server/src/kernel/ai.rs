//! Chat-completions client for OpenAI-compatible APIs.
//!
//! One implementation serves both the primary provider (OpenAI) and the
//! fallback provider (OpenRouter); they differ only in base URL, key, model
//! and price.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::{BaseContentProvider, Completion, CompletionRequest};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChoiceRaw>,
    #[serde(default)]
    usage: Option<UsageRaw>,
}

#[derive(Deserialize)]
struct ChoiceRaw {
    message: MessageRaw,
}

#[derive(Deserialize)]
struct MessageRaw {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageRaw {
    #[serde(default)]
    total_tokens: u64,
}

/// OpenAI-compatible chat-completions provider.
pub struct ChatCompletionsProvider {
    name: String,
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    /// USD per 1,000 tokens, used for cost accounting.
    price_per_1k_tokens: f64,
}

impl ChatCompletionsProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            name: name.into(),
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            price_per_1k_tokens: 0.0,
        })
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::new("openai", OPENAI_BASE_URL, api_key, model)
    }

    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::new("openrouter", OPENROUTER_BASE_URL, api_key, model)
    }

    pub fn with_price_per_1k_tokens(mut self, price: f64) -> Self {
        self.price_per_1k_tokens = price;
        self
    }
}

#[async_trait]
impl BaseContentProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let start = std::time::Instant::now();

        let body = ChatBody {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = %self.name, error = %e, "completion request failed");
                anyhow!("{} request failed: {}", self.name, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status = %status, error = %error_text, "completion API error");
            return Err(anyhow!("{} returned status {}", self.name, status));
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .with_context(|| format!("{} returned an unreadable response", self.name))?;

        let text = raw
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("{} returned no choices", self.name))?;
        let tokens_used = raw.usage.map(|u| u.total_tokens).unwrap_or_default();

        debug!(
            provider = %self.name,
            model = %self.model,
            tokens_used,
            duration_ms = start.elapsed().as_millis() as u64,
            "completion finished"
        );

        Ok(Completion {
            text,
            tokens_used,
            cost: tokens_used as f64 / 1000.0 * self.price_per_1k_tokens,
            provider: self.name.clone(),
        })
    }
}
