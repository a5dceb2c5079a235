//! The content generation pipeline as deployed.

use std::sync::Arc;
use std::time::Duration;

use crate::domains::generation::stages::{
    CitationGenerationStage, CompetitorAnalysisStage, ContentWriter, DraftGenerationStage,
    EnhancementStage, ImageGenerationStage, IntentAnalysisStage, KeywordAnalysisStage,
    ResearchStage, SeoPolishStage, StructurePlanningStage,
};
use crate::domains::pipeline::{Orchestrator, PipelineStage, ProgressPolicy, StageKind};
use crate::kernel::ServerDeps;

/// Knobs for [`default_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Timeout for stages backed by a content provider.
    pub stage_timeout: Duration,
    /// Timeout for stages backed by the keyword / SERP gateway.
    pub data_stage_timeout: Duration,
    pub policy: ProgressPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_timeout: PipelineStage::DEFAULT_TIMEOUT,
            data_stage_timeout: Duration::from_secs(90),
            policy: ProgressPolicy::Equal,
        }
    }
}

/// Build the ten-stage pipeline in canonical order.
pub fn default_pipeline(deps: &ServerDeps, settings: &PipelineSettings) -> Orchestrator {
    let writer = ContentWriter::new(deps.primary_ai.clone(), deps.fallback_ai.clone());
    let gateway = deps.gateway.clone();
    let data = settings.data_stage_timeout;
    let writing = settings.stage_timeout;

    let stages = vec![
        PipelineStage::required(
            StageKind::KeywordAnalysis,
            Arc::new(KeywordAnalysisStage::new(gateway.clone())),
        )
        .with_timeout(data),
        PipelineStage::optional(
            StageKind::CompetitorAnalysis,
            Arc::new(CompetitorAnalysisStage::new(gateway.clone())),
        )
        .with_timeout(data),
        PipelineStage::optional(
            StageKind::IntentAnalysis,
            Arc::new(IntentAnalysisStage::new(writer.clone())),
        )
        .with_timeout(writing),
        PipelineStage::required(
            StageKind::StructurePlanning,
            Arc::new(StructurePlanningStage::new(writer.clone())),
        )
        .with_timeout(writing),
        PipelineStage::optional(StageKind::Research, Arc::new(ResearchStage::new(gateway)))
            .with_timeout(data),
        PipelineStage::required(
            StageKind::DraftGeneration,
            Arc::new(DraftGenerationStage::new(writer.clone())),
        )
        .with_timeout(writing)
        .with_weight(4),
        PipelineStage::optional(
            StageKind::Enhancement,
            Arc::new(EnhancementStage::new(writer.clone())),
        )
        .with_timeout(writing)
        .with_weight(2),
        PipelineStage::optional(StageKind::SeoPolish, Arc::new(SeoPolishStage::new(writer.clone())))
            .with_timeout(writing)
            .with_weight(2),
        PipelineStage::optional(
            StageKind::CitationGeneration,
            Arc::new(CitationGenerationStage::new()),
        ),
        PipelineStage::optional(
            StageKind::ImageGeneration,
            Arc::new(ImageGenerationStage::new(writer)),
        )
        .with_timeout(writing)
        .with_weight(2),
    ];

    Orchestrator::new(stages).with_policy(settings.policy)
}
