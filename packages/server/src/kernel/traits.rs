// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Stage logic lives in domains/generation and calls through these traits.
//
// Naming convention: Base* for trait names (e.g., BaseContentProvider)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Content Provider Trait (Infrastructure - Generic LLM capabilities)
// =============================================================================

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: None,
            temperature: 0.7,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Text returned by a provider, with its accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
    pub cost: f64,
    /// Name of the provider that produced the text.
    pub provider: String,
}

#[async_trait]
pub trait BaseContentProvider: Send + Sync {
    /// Stable provider name used in stage metadata and warnings.
    fn name(&self) -> &str;

    /// Complete a prompt (returns raw text plus usage)
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}
