//! Stages backed by a content provider.
//!
//! Every call goes through [`ContentWriter`]: the primary provider first, and
//! if it errors or its output fails validation, one retry against the
//! secondary provider before the stage fails.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::domains::generation::GenerationRequest;
use crate::domains::pipeline::{
    ContextSlot, StageContext, StageError, StageHandler, StageKind, StageMetadata, StageOutput,
};
use crate::kernel::{BaseContentProvider, CompletionRequest};

/// Accepted output length, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBounds {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl OutputBounds {
    pub const fn new(min_chars: usize, max_chars: usize) -> Self {
        Self { min_chars, max_chars }
    }

    pub fn check(&self, text: &str) -> Result<(), String> {
        let len = text.chars().count();
        if text.trim().is_empty() {
            Err("was empty".to_string())
        } else if len < self.min_chars {
            Err(format!("was too short ({len} < {} chars)", self.min_chars))
        } else if len > self.max_chars {
            Err(format!("was too long ({len} > {} chars)", self.max_chars))
        } else {
            Ok(())
        }
    }

    /// Bounds for a rewrite of `source`: it may not shrink below half.
    fn rewrite_of(source: &str, base: OutputBounds) -> Self {
        let floor = source.chars().count() / 2;
        Self::new(base.min_chars.max(floor), base.max_chars)
    }
}

enum AttemptError {
    Provider(String),
    Rejected(String),
}

impl AttemptError {
    fn message(&self) -> &str {
        match self {
            AttemptError::Provider(m) | AttemptError::Rejected(m) => m,
        }
    }
}

/// Primary provider with a single fallback.
#[derive(Clone)]
pub struct ContentWriter {
    primary: Arc<dyn BaseContentProvider>,
    secondary: Option<Arc<dyn BaseContentProvider>>,
}

impl ContentWriter {
    pub fn new(
        primary: Arc<dyn BaseContentProvider>,
        secondary: Option<Arc<dyn BaseContentProvider>>,
    ) -> Self {
        Self { primary, secondary }
    }

    pub async fn write(
        &self,
        stage: StageKind,
        request: &CompletionRequest,
        bounds: OutputBounds,
    ) -> Result<(String, StageMetadata), StageError> {
        let mut metadata = StageMetadata::default();

        let first = match attempt(self.primary.as_ref(), request, bounds, &mut metadata).await {
            Ok(text) => return Ok((text, metadata)),
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(classify(&first, None));
        };

        warn!(
            stage = %stage,
            primary = self.primary.name(),
            secondary = secondary.name(),
            error = first.message(),
            "primary content provider failed, retrying on secondary"
        );
        metadata.warn(format!(
            "{}; used fallback provider {}",
            first.message(),
            secondary.name()
        ));

        match attempt(secondary.as_ref(), request, bounds, &mut metadata).await {
            Ok(text) => Ok((text, metadata)),
            Err(second) => Err(classify(&first, Some(&second))),
        }
    }
}

async fn attempt(
    provider: &dyn BaseContentProvider,
    request: &CompletionRequest,
    bounds: OutputBounds,
    metadata: &mut StageMetadata,
) -> Result<String, AttemptError> {
    let completion = provider
        .complete(request)
        .await
        .map_err(|e| AttemptError::Provider(format!("{} failed: {}", provider.name(), e)))?;

    metadata.tokens_used += completion.tokens_used;
    metadata.cost += completion.cost;

    let text = completion.text.trim().to_string();
    bounds
        .check(&text)
        .map_err(|reason| AttemptError::Rejected(format!("{} output {}", provider.name(), reason)))?;

    metadata.provider_used = Some(completion.provider);
    Ok(text)
}

fn classify(first: &AttemptError, second: Option<&AttemptError>) -> StageError {
    let last = second.unwrap_or(first);
    let message = match second {
        Some(second) => format!("{}; {}", first.message(), second.message()),
        None => first.message().to_string(),
    };
    match last {
        AttemptError::Rejected(_) => StageError::Validation(message),
        AttemptError::Provider(_) => StageError::Unavailable(message),
    }
}

// =============================================================================
// Prompt helpers
// =============================================================================

const SYSTEM_PROMPT: &str = "You are an experienced content strategist and writer.";

fn brief(request: &GenerationRequest) -> String {
    let (min_words, max_words) = request.length.word_range();
    format!(
        "Topic: {}\nKeywords: {}\nContent type: {}\nTone: {}\nTarget length: {}-{} words\nLanguage: {}",
        request.topic,
        request.seed_keywords().join(", "),
        request.content_type,
        request.tone,
        min_words,
        max_words,
        request.language_code,
    )
}

fn competitor_titles(context: &StageContext) -> Vec<String> {
    context
        .get(ContextSlot::CompetitorData)
        .and_then(|data| data.get("competitors"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.get("title").or_else(|| c.get("domain")))
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn research_notes(context: &StageContext) -> String {
    context
        .get(ContextSlot::Research)
        .and_then(|data| data.get("sources"))
        .and_then(Value::as_array)
        .map(|sources| {
            sources
                .iter()
                .map(|s| {
                    format!(
                        "- {} ({}): {}",
                        s["title"].as_str().unwrap_or("untitled"),
                        s["url"].as_str().unwrap_or(""),
                        s["snippet"].as_str().unwrap_or("")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

// =============================================================================
// Intent analysis
// =============================================================================

pub struct IntentAnalysisStage {
    writer: ContentWriter,
}

impl IntentAnalysisStage {
    const BOUNDS: OutputBounds = OutputBounds::new(10, 2_000);

    pub fn new(writer: ContentWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl StageHandler for IntentAnalysisStage {
    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let request = context.request();
        let prompt = format!(
            "{}\nRanking pages: {}\n\nDescribe the dominant search intent and what readers expect to find.",
            brief(request),
            competitor_titles(context).join("; "),
        );

        let (intent, metadata) = self
            .writer
            .write(
                StageKind::IntentAnalysis,
                &CompletionRequest::new(SYSTEM_PROMPT, prompt).with_max_tokens(400),
                Self::BOUNDS,
            )
            .await?;

        Ok(StageOutput::new(metadata).write(ContextSlot::Intent, json!(intent)))
    }
}

// =============================================================================
// Structure planning
// =============================================================================

pub struct StructurePlanningStage {
    writer: ContentWriter,
}

impl StructurePlanningStage {
    const BOUNDS: OutputBounds = OutputBounds::new(40, 6_000);

    pub fn new(writer: ContentWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl StageHandler for StructurePlanningStage {
    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let request = context.request();
        let prompt = format!(
            "{}\nSearch intent: {}\nCompeting titles: {}\n\nProduce a section outline with headings and the word budget for each section.",
            brief(request),
            context.text(ContextSlot::Intent).unwrap_or("unknown"),
            competitor_titles(context).join("; "),
        );

        let (outline, metadata) = self
            .writer
            .write(
                StageKind::StructurePlanning,
                &CompletionRequest::new(SYSTEM_PROMPT, prompt).with_max_tokens(1_000),
                Self::BOUNDS,
            )
            .await?;

        Ok(StageOutput::new(metadata).write(ContextSlot::Outline, json!(outline)))
    }
}

// =============================================================================
// Draft generation
// =============================================================================

pub struct DraftGenerationStage {
    writer: ContentWriter,
}

impl DraftGenerationStage {
    const BOUNDS: OutputBounds = OutputBounds::new(200, 60_000);

    pub fn new(writer: ContentWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl StageHandler for DraftGenerationStage {
    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let request = context.request();
        let outline = context
            .text(ContextSlot::Outline)
            .ok_or(StageError::MissingInput(ContextSlot::Outline))?;
        let (_, max_words) = request.length.word_range();

        let prompt = format!(
            "{}\n\nOutline:\n{}\n\nResearch notes:\n{}\n\nWrite the full piece in Markdown, starting with a '# ' title.",
            brief(request),
            outline,
            research_notes(context),
        );

        let (draft, metadata) = self
            .writer
            .write(
                StageKind::DraftGeneration,
                &CompletionRequest::new(SYSTEM_PROMPT, prompt).with_max_tokens(max_words * 2),
                Self::BOUNDS,
            )
            .await?;

        Ok(StageOutput::new(metadata).write(ContextSlot::Draft, json!(draft)))
    }
}

// =============================================================================
// Enhancement
// =============================================================================

pub struct EnhancementStage {
    writer: ContentWriter,
}

impl EnhancementStage {
    const BOUNDS: OutputBounds = OutputBounds::new(200, 60_000);

    pub fn new(writer: ContentWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl StageHandler for EnhancementStage {
    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let draft = context
            .text(ContextSlot::Draft)
            .ok_or(StageError::MissingInput(ContextSlot::Draft))?;
        let (_, max_words) = context.request().length.word_range();

        let prompt = format!(
            "Tone: {}\n\nImprove clarity, flow and examples in the draft below. Keep its structure and Markdown.\n\n{}",
            context.request().tone,
            draft,
        );

        let (enhanced, metadata) = self
            .writer
            .write(
                StageKind::Enhancement,
                &CompletionRequest::new(SYSTEM_PROMPT, prompt).with_max_tokens(max_words * 2),
                OutputBounds::rewrite_of(draft, Self::BOUNDS),
            )
            .await?;

        Ok(StageOutput::new(metadata).write(ContextSlot::EnhancedDraft, json!(enhanced)))
    }
}

// =============================================================================
// SEO polish
// =============================================================================

pub struct SeoPolishStage {
    writer: ContentWriter,
}

impl SeoPolishStage {
    const BOUNDS: OutputBounds = OutputBounds::new(200, 60_000);

    pub fn new(writer: ContentWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl StageHandler for SeoPolishStage {
    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let source = context
            .best_content()
            .ok_or(StageError::MissingInput(ContextSlot::Draft))?;
        let request = context.request();
        let (_, max_words) = request.length.word_range();

        let prompt = format!(
            "Primary keyword: {}\nSecondary keywords: {}\n\nPolish the article below for search: headings, keyword placement, internal structure. Return the full Markdown.\n\n{}",
            request.primary_keyword(),
            request.seed_keywords().join(", "),
            source,
        );

        let (polished, metadata) = self
            .writer
            .write(
                StageKind::SeoPolish,
                &CompletionRequest::new(SYSTEM_PROMPT, prompt).with_max_tokens(max_words * 2),
                OutputBounds::rewrite_of(source, Self::BOUNDS),
            )
            .await?;

        Ok(StageOutput::new(metadata).write(ContextSlot::FinalContent, json!(polished)))
    }
}
