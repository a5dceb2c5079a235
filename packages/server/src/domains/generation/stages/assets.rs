//! Citation and image stages. Both are opt-in per request.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::writing::{ContentWriter, OutputBounds};
use crate::domains::generation::GenerationRequest;
use crate::domains::pipeline::{
    ContextSlot, StageContext, StageError, StageHandler, StageKind, StageMetadata, StageOutput,
};
use crate::kernel::CompletionRequest;

const MAX_IMAGES: usize = 4;

// =============================================================================
// Citations
// =============================================================================

/// Builds the citation list from research sources. No provider calls.
#[derive(Default)]
pub struct CitationGenerationStage;

impl CitationGenerationStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageHandler for CitationGenerationStage {
    fn applies_to(&self, request: &GenerationRequest) -> bool {
        request.include_citations
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let mut metadata = StageMetadata::default();
        let mut seen = HashSet::new();

        let citations: Vec<Value> = context
            .get(ContextSlot::Research)
            .and_then(|research| research.get("sources"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|source| {
                let url = source.get("url")?.as_str()?;
                seen.insert(url.to_string()).then(|| (url.to_string(), source))
            })
            .enumerate()
            .map(|(i, (url, source))| {
                json!({
                    "index": i + 1,
                    "title": source.get("title").and_then(Value::as_str).unwrap_or(&url),
                    "url": url,
                })
            })
            .collect();

        if citations.is_empty() {
            metadata.warn("no sources available for citations");
        }

        Ok(StageOutput::new(metadata).write(ContextSlot::Citations, json!(citations)))
    }
}

// =============================================================================
// Images
// =============================================================================

/// Asks the content provider for image briefs: one `prompt | alt text` per line.
pub struct ImageGenerationStage {
    writer: ContentWriter,
}

impl ImageGenerationStage {
    const BOUNDS: OutputBounds = OutputBounds::new(10, 4_000);

    pub fn new(writer: ContentWriter) -> Self {
        Self { writer }
    }
}

fn parse_image_briefs(text: &str) -> Vec<Value> {
    text.lines()
        .map(|line| line.trim().trim_start_matches(['-', '*']).trim())
        .filter_map(|line| {
            let (prompt, alt) = line.split_once('|')?;
            let (prompt, alt) = (prompt.trim(), alt.trim());
            (!prompt.is_empty() && !alt.is_empty()).then(|| json!({ "prompt": prompt, "alt_text": alt }))
        })
        .take(MAX_IMAGES)
        .collect()
}

#[async_trait]
impl StageHandler for ImageGenerationStage {
    fn applies_to(&self, request: &GenerationRequest) -> bool {
        request.include_images
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let content = context
            .best_content()
            .ok_or(StageError::MissingInput(ContextSlot::Draft))?;

        let prompt = format!(
            "Suggest up to {MAX_IMAGES} illustrations for the article below. \
             Reply with one line per image formatted as `image prompt | alt text`.\n\n{content}"
        );

        let (text, metadata) = self
            .writer
            .write(
                StageKind::ImageGeneration,
                &CompletionRequest::new("You are an art director.", prompt).with_max_tokens(500),
                Self::BOUNDS,
            )
            .await?;

        let images = parse_image_briefs(&text);
        if images.is_empty() {
            return Err(StageError::Validation(
                "no image briefs in provider output".to_string(),
            ));
        }

        Ok(StageOutput::new(metadata).write(ContextSlot::Images, json!(images)))
    }
}
