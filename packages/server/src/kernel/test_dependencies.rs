// TestDependencies - mock implementations for testing
//
// Provides mock content providers that can be injected into ServerDeps for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BaseContentProvider, Completion, CompletionRequest};

// =============================================================================
// Mock Content Provider
// =============================================================================

/// Default reply: long enough to pass every stage's length validation.
pub const MOCK_CONTENT: &str = "# Mock Title\n\nMock content provider response. \
This paragraph stands in for generated text and is intentionally long enough to \
satisfy the minimum length checks applied to drafts, outlines and polished content. \
It mentions the topic, the keywords and a few supporting points so downstream \
stages have something to work with.";

#[derive(Debug, Clone)]
enum MockResponse {
    Text(String),
    Error(String),
    Slow(Duration, String),
}

pub struct MockContentProvider {
    name: String,
    responses: Arc<Mutex<Vec<MockResponse>>>,
    fallback: Arc<Mutex<Option<MockResponse>>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
    tokens_per_call: u64,
}

impl MockContentProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Arc::new(Mutex::new(Vec::new())),
            fallback: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
            tokens_per_call: 100,
        }
    }

    /// Add a text response to the queue
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockResponse::Text(response.into()));
        self
    }

    /// Queue a provider error
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockResponse::Error(message.into()));
        self
    }

    /// Queue a response delivered after `delay`
    pub fn with_slow_response(self, delay: Duration, response: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockResponse::Slow(delay, response.into()));
        self
    }

    /// Fail every call once the queue is empty
    pub fn failing(self, message: impl Into<String>) -> Self {
        *self.fallback.lock().unwrap() = Some(MockResponse::Error(message.into()));
        self
    }

    /// Answer every call with `text` once the queue is empty
    pub fn always(self, text: impl Into<String>) -> Self {
        *self.fallback.lock().unwrap() = Some(MockResponse::Text(text.into()));
        self
    }

    /// Get all requests that were sent to the provider
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a prompt containing the given text was sent
    pub fn was_called_with(&self, text: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.prompt.contains(text))
    }

    /// Get the number of times the provider was called
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BaseContentProvider for MockContentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        // Record the call
        self.calls.lock().unwrap().push(request.clone());

        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                self.fallback.lock().unwrap().clone()
            } else {
                Some(responses.remove(0))
            }
        };

        let text = match next {
            None => MOCK_CONTENT.to_string(),
            Some(MockResponse::Text(text)) => text,
            Some(MockResponse::Error(message)) => return Err(anyhow!(message)),
            Some(MockResponse::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                text
            }
        };

        Ok(Completion {
            text,
            tokens_used: self.tokens_per_call,
            cost: 0.001,
            provider: self.name.clone(),
        })
    }
}
