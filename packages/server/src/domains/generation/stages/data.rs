//! Stages backed by the keyword / SERP data provider.
//!
//! Independent lookups inside one stage run concurrently through
//! [`Gateway::call_many`]. Empty results are reduced data, not failures; a
//! denial always surfaces.

use std::sync::Arc;

use async_trait::async_trait;
use provider_gateway::{Gateway, GatewayError, NormalizedResult};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::domains::generation::GenerationRequest;
use crate::domains::pipeline::{
    ContextSlot, StageContext, StageError, StageHandler, StageMetadata, StageOutput,
};

pub const DATA_PROVIDER: &str = "keyword-data";

const MAX_COMPETITORS: usize = 10;
const MAX_SOURCES: usize = 8;

/// Arguments shared by every lookup for `request`.
fn base_arguments(request: &GenerationRequest) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("language_code".into(), json!(request.language_code));
    if let Some(location) = request.location_code {
        arguments.insert("location_code".into(), json!(location));
    }
    arguments
}

fn keyword_arguments(request: &GenerationRequest) -> Value {
    let mut arguments = base_arguments(request);
    arguments.insert("keyword".into(), json!(request.primary_keyword()));
    Value::Object(arguments)
}

/// Copy the listed fields of `item` that are present and non-null.
fn pick(item: &Value, fields: &[&str]) -> Value {
    let picked: Map<String, Value> = fields
        .iter()
        .filter_map(|&field| {
            item.get(field)
                .filter(|v| !v.is_null())
                .map(|v| (field.to_string(), v.clone()))
        })
        .collect();
    Value::Object(picked)
}

/// Treat a transient outage as reduced data; anything else fails the stage.
fn tolerate_unavailable(
    result: Result<NormalizedResult, GatewayError>,
    metadata: &mut StageMetadata,
) -> Result<Option<NormalizedResult>, StageError> {
    match result {
        Ok(result) => Ok(Some(result)),
        Err(e) if e.is_transient() => {
            metadata.warn(e.reason());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Keyword analysis
// =============================================================================

pub struct KeywordAnalysisStage {
    gateway: Arc<Gateway>,
}

impl KeywordAnalysisStage {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl StageHandler for KeywordAnalysisStage {
    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let request = context.request();
        let keywords = request.seed_keywords();

        let mut arguments = base_arguments(request);
        arguments.insert("keywords".into(), json!(keywords));
        let arguments = Value::Object(arguments);

        let operations = ["keyword_overview", "search_volume"];
        let results = self
            .gateway
            .call_many(
                operations
                    .iter()
                    .map(|op| (op.to_string(), arguments.clone()))
                    .collect(),
            )
            .await;

        let mut metadata = StageMetadata::provider(DATA_PROVIDER);
        let mut data = Map::new();
        let mut answered = 0;

        for (operation, result) in operations.iter().zip(results) {
            let items = match tolerate_unavailable(result, &mut metadata)? {
                Some(result) => {
                    answered += 1;
                    if result.is_empty() {
                        metadata.warn(format!("no {operation} data for these keywords"));
                    }
                    debug!(operation, items = result.items.len(), cached = result.from_cache, "keyword lookup");
                    result.items
                }
                None => Vec::new(),
            };
            data.insert(operation.to_string(), Value::Array(items));
        }

        if answered == 0 {
            return Err(StageError::Unavailable(
                "keyword data provider unavailable".to_string(),
            ));
        }

        data.insert("primary_keyword".into(), json!(request.primary_keyword()));
        data.insert("keywords".into(), json!(keywords));

        Ok(StageOutput::new(metadata).write(ContextSlot::KeywordData, Value::Object(data)))
    }
}

// =============================================================================
// Competitor analysis
// =============================================================================

pub struct CompetitorAnalysisStage {
    gateway: Arc<Gateway>,
}

impl CompetitorAnalysisStage {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl StageHandler for CompetitorAnalysisStage {
    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let request = context.request();
        let result = self
            .gateway
            .call("serp_competitors", keyword_arguments(request))
            .await?;

        let mut metadata = StageMetadata::provider(DATA_PROVIDER);
        if result.is_empty() {
            metadata.warn("no competitor data");
        }

        let competitors: Vec<Value> = result
            .items
            .iter()
            .take(MAX_COMPETITORS)
            .map(|item| pick(item, &["domain", "url", "title", "rank_absolute", "avg_position", "etv"]))
            .collect();

        Ok(StageOutput::new(metadata).write(
            ContextSlot::CompetitorData,
            json!({ "competitors": competitors, "source": result.source }),
        ))
    }
}

// =============================================================================
// Research
// =============================================================================

pub struct ResearchStage {
    gateway: Arc<Gateway>,
}

impl ResearchStage {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl StageHandler for ResearchStage {
    fn applies_to(&self, request: &GenerationRequest) -> bool {
        request.include_research
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let result = self
            .gateway
            .call("serp_organic", keyword_arguments(context.request()))
            .await?;

        let mut metadata = StageMetadata::provider(DATA_PROVIDER);

        let sources: Vec<Value> = result
            .items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str).map_or(true, |t| t == "organic"))
            .filter(|item| item.get("url").and_then(Value::as_str).is_some())
            .take(MAX_SOURCES)
            .map(|item| {
                json!({
                    "title": item.get("title").cloned().unwrap_or(Value::Null),
                    "url": item["url"],
                    "snippet": item.get("description").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        if sources.is_empty() {
            metadata.warn("no research sources found");
        }

        Ok(StageOutput::new(metadata).write(ContextSlot::Research, json!({ "sources": sources })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_skips_missing_and_null_fields() {
        let item = json!({"domain": "a.com", "title": null, "extra": 1});
        assert_eq!(pick(&item, &["domain", "title", "url"]), json!({"domain": "a.com"}));
    }

    #[test]
    fn keyword_arguments_include_location_when_set() {
        let mut request = GenerationRequest::new("Rust");
        request.location_code = Some(2840);
        let args = keyword_arguments(&request);
        assert_eq!(args, json!({"keyword": "rust", "language_code": "en", "location_code": 2840}));
    }
}
