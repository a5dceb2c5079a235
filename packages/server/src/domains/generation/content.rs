//! Final result bundle of a completed generation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domains::pipeline::{ContextSlot, PipelineResult, RunTotals, StageRecord};

const META_DESCRIPTION_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub title: String,
    pub content: String,
    pub word_count: usize,
    pub meta_description: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub outline: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub citations: Vec<Value>,
    #[serde(default)]
    pub images: Vec<Value>,
    pub seo_data: Value,
    pub warnings: Vec<String>,
    pub providers_used: Vec<String>,
    pub stages: Vec<StageRecord>,
    pub totals: RunTotals,
}

impl GeneratedContent {
    /// Assemble the caller-visible result from a finalized run.
    pub fn from_run(run: &PipelineResult) -> Self {
        let context = &run.context;
        let request = context.request();
        let content = context.best_content().unwrap_or_default().to_string();

        let title = content
            .lines()
            .find_map(|line| line.trim().strip_prefix("# "))
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| request.topic.clone());

        let array = |slot: ContextSlot| {
            context
                .get(slot)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };

        Self {
            word_count: content.split_whitespace().count(),
            meta_description: meta_description(&content),
            keywords: request.seed_keywords(),
            outline: context.text(ContextSlot::Outline).map(str::to_string),
            intent: context.text(ContextSlot::Intent).map(str::to_string),
            citations: array(ContextSlot::Citations),
            images: array(ContextSlot::Images),
            seo_data: json!({
                "primary_keyword": request.primary_keyword(),
                "keyword_data": context.get(ContextSlot::KeywordData),
                "competitor_data": context.get(ContextSlot::CompetitorData),
            }),
            warnings: run.warnings.clone(),
            providers_used: run.providers_used(),
            stages: run.stages.clone(),
            totals: run.totals.clone(),
            title,
            content,
        }
    }
}

/// First body paragraph, cut at a word boundary to fit a meta description.
fn meta_description(content: &str) -> String {
    let paragraph = content
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .unwrap_or_default();
    let flat = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");

    if flat.chars().count() <= META_DESCRIPTION_CHARS {
        return flat;
    }

    let mut description = String::new();
    for word in flat.split(' ') {
        if description.chars().count() + word.chars().count() + 4 > META_DESCRIPTION_CHARS {
            break;
        }
        if !description.is_empty() {
            description.push(' ');
        }
        description.push_str(word);
    }
    description.push_str("...");
    description
}
