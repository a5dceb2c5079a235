//! Scripted stage handlers and request fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use generation_core::domains::generation::GenerationRequest;
use generation_core::domains::pipeline::{
    ContextSlot, PipelineStage, StageContext, StageError, StageHandler, StageKind, StageMetadata,
    StageOutput,
};
use serde_json::json;
use tokio::sync::Notify;

/// Body long enough to read as a finished article.
pub const ARTICLE: &str = "# Scripted Article\n\nThis article was produced by a scripted stage. \
It exists so the job result carries a title, a body and a meta description.";

enum Behavior {
    Write(ContextSlot, String),
    Fail(StageError),
    /// Wait for the gate, then write.
    Gated(Arc<Notify>, ContextSlot, String),
    Sleep(Duration),
}

/// Stage handler with a fixed behaviour that counts its executions.
pub struct ScriptedStage {
    behavior: Behavior,
    applies: bool,
    runs: AtomicUsize,
}

impl ScriptedStage {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            applies: true,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn writes(slot: ContextSlot, text: &str) -> Arc<Self> {
        Self::new(Behavior::Write(slot, text.to_string()))
    }

    pub fn fails(error: StageError) -> Arc<Self> {
        Self::new(Behavior::Fail(error))
    }

    pub fn gated(gate: Arc<Notify>, slot: ContextSlot, text: &str) -> Arc<Self> {
        Self::new(Behavior::Gated(gate, slot, text.to_string()))
    }

    pub fn sleeps(duration: Duration) -> Arc<Self> {
        Self::new(Behavior::Sleep(duration))
    }

    /// A stage whose request flag is off.
    pub fn skipped(slot: ContextSlot) -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Write(slot, "never written".to_string()),
            applies: false,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageHandler for ScriptedStage {
    fn applies_to(&self, _request: &GenerationRequest) -> bool {
        self.applies
    }

    async fn execute(&self, _context: &StageContext) -> Result<StageOutput, StageError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let metadata = StageMetadata {
            tokens_used: 10,
            cost: 0.01,
            provider_used: Some("scripted".to_string()),
            warnings: vec![],
        };

        match &self.behavior {
            Behavior::Write(slot, text) => Ok(StageOutput::new(metadata).write(*slot, json!(text))),
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Gated(gate, slot, text) => {
                gate.notified().await;
                Ok(StageOutput::new(metadata).write(*slot, json!(text)))
            }
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(StageOutput::new(metadata))
            }
        }
    }
}

pub fn required(kind: StageKind, handler: &Arc<ScriptedStage>) -> PipelineStage {
    PipelineStage::required(kind, handler.clone())
}

pub fn optional(kind: StageKind, handler: &Arc<ScriptedStage>) -> PipelineStage {
    PipelineStage::optional(kind, handler.clone())
}

/// Three stages ending in a finished article.
pub fn happy_stages() -> Vec<PipelineStage> {
    vec![
        required(
            StageKind::KeywordAnalysis,
            &ScriptedStage::writes(ContextSlot::KeywordData, "keywords"),
        ),
        required(
            StageKind::StructurePlanning,
            &ScriptedStage::writes(ContextSlot::Outline, "outline"),
        ),
        required(
            StageKind::DraftGeneration,
            &ScriptedStage::writes(ContextSlot::Draft, ARTICLE),
        ),
    ]
}

pub fn sync_request(topic: &str) -> GenerationRequest {
    GenerationRequest::new(topic).with_keywords(["rust", "async"])
}

pub fn async_request(topic: &str) -> GenerationRequest {
    sync_request(topic).asynchronous()
}
