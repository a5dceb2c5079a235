//! Stage handler contract.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provider_gateway::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::context::{ContextSlot, StageContext};
use crate::domains::generation::GenerationRequest;

/// Every stage the pipeline knows, in canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    KeywordAnalysis,
    CompetitorAnalysis,
    IntentAnalysis,
    StructurePlanning,
    Research,
    DraftGeneration,
    Enhancement,
    SeoPolish,
    CitationGeneration,
    ImageGeneration,
}

impl StageKind {
    pub const CANONICAL: [StageKind; 10] = [
        StageKind::KeywordAnalysis,
        StageKind::CompetitorAnalysis,
        StageKind::IntentAnalysis,
        StageKind::StructurePlanning,
        StageKind::Research,
        StageKind::DraftGeneration,
        StageKind::Enhancement,
        StageKind::SeoPolish,
        StageKind::CitationGeneration,
        StageKind::ImageGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::KeywordAnalysis => "keyword_analysis",
            StageKind::CompetitorAnalysis => "competitor_analysis",
            StageKind::IntentAnalysis => "intent_analysis",
            StageKind::StructurePlanning => "structure_planning",
            StageKind::Research => "research",
            StageKind::DraftGeneration => "draft_generation",
            StageKind::Enhancement => "enhancement",
            StageKind::SeoPolish => "seo_polish",
            StageKind::CitationGeneration => "citation_generation",
            StageKind::ImageGeneration => "image_generation",
        }
    }

    /// Human-readable status line shown while the stage runs.
    pub fn status_line(&self) -> &'static str {
        match self {
            StageKind::KeywordAnalysis => "Analyzing keywords",
            StageKind::CompetitorAnalysis => "Analyzing competitors",
            StageKind::IntentAnalysis => "Analyzing search intent",
            StageKind::StructurePlanning => "Planning structure",
            StageKind::Research => "Researching sources",
            StageKind::DraftGeneration => "Writing draft",
            StageKind::Enhancement => "Enhancing draft",
            StageKind::SeoPolish => "Polishing for search",
            StageKind::CitationGeneration => "Generating citations",
            StageKind::ImageGeneration => "Generating images",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRequirement {
    /// Failure aborts the run.
    Required,
    /// Failure becomes a warning; the run continues.
    Optional,
}

/// Accounting reported by one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetadata {
    pub tokens_used: u64,
    pub cost: f64,
    pub provider_used: Option<String>,
    pub warnings: Vec<String>,
}

impl StageMetadata {
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            provider_used: Some(provider.into()),
            ..Default::default()
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Slots a stage wants appended, plus its metadata.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub writes: Vec<(ContextSlot, Value)>,
    pub metadata: StageMetadata,
}

impl StageOutput {
    pub fn new(metadata: StageMetadata) -> Self {
        Self {
            writes: Vec::new(),
            metadata,
        }
    }

    pub fn write(mut self, slot: ContextSlot, value: Value) -> Self {
        self.writes.push((slot, value));
        self
    }
}

/// Classified stage failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// A provider refused access. Carries the normalized reason.
    #[error("{0}")]
    Denied(String),

    #[error("{0}")]
    Unavailable(String),

    /// Every content provider returned output that failed validation.
    #[error("output rejected: {0}")]
    Validation(String),

    #[error("missing input {0}")]
    MissingInput(ContextSlot),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

impl From<GatewayError> for StageError {
    fn from(err: GatewayError) -> Self {
        match &err {
            GatewayError::Denied { .. } => StageError::Denied(err.reason()),
            GatewayError::Unavailable { .. } => StageError::Unavailable(err.reason()),
            _ => StageError::Failed(err.reason()),
        }
    }
}

/// One unit of pipeline work.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Whether this stage runs for `request`. Skipped stages are excluded
    /// from `total_stages` and emit no progress.
    fn applies_to(&self, request: &GenerationRequest) -> bool {
        let _ = request;
        true
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError>;
}

/// A handler bound to its position and policy in a pipeline.
#[derive(Clone)]
pub struct PipelineStage {
    pub kind: StageKind,
    pub requirement: StageRequirement,
    pub handler: Arc<dyn StageHandler>,
    pub timeout: Duration,
    /// Relative expected duration, used by weighted progress.
    pub weight: u32,
}

impl PipelineStage {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

    pub fn required(kind: StageKind, handler: Arc<dyn StageHandler>) -> Self {
        Self::new(kind, StageRequirement::Required, handler)
    }

    pub fn optional(kind: StageKind, handler: Arc<dyn StageHandler>) -> Self {
        Self::new(kind, StageRequirement::Optional, handler)
    }

    fn new(kind: StageKind, requirement: StageRequirement, handler: Arc<dyn StageHandler>) -> Self {
        Self {
            kind,
            requirement,
            handler,
            timeout: Self::DEFAULT_TIMEOUT,
            weight: 1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn is_required(&self) -> bool {
        self.requirement == StageRequirement::Required
    }
}

impl fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStage")
            .field("kind", &self.kind)
            .field("requirement", &self.requirement)
            .field("timeout", &self.timeout)
            .field("weight", &self.weight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_matches_enum_order() {
        let mut sorted = StageKind::CANONICAL;
        sorted.sort();
        assert_eq!(sorted, StageKind::CANONICAL);
    }

    #[test]
    fn gateway_denial_keeps_normalized_reason() {
        let err: StageError = GatewayError::Denied {
            operation: "search_volume".into(),
            candidate: "/v3/x".into(),
            reason: "provider status 40204 {raw}".into(),
        }
        .into();

        match err {
            StageError::Denied(reason) => {
                assert!(reason.contains("denied"));
                assert!(!reason.contains("raw"));
            }
            other => panic!("expected denied, got {other:?}"),
        }
    }
}
