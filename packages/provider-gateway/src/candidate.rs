//! Endpoint candidates and the status-code classification table.
//!
//! Fallback behaviour is data, not control flow: each logical operation lists
//! ordered endpoint paths, and each path carries a table mapping provider
//! status codes to a [`StatusClass`]. Adding a provider path is a
//! configuration change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::CacheCategory;
use crate::error::ConfigError;

/// What a provider status code means for the candidate loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Success,
    /// Invalid path or resource not found: try the next candidate.
    NextCandidate,
    /// Valid path, access refused: stop and surface.
    Denied,
    /// Provider-side transient failure: retry this candidate with backoff.
    Transient,
}

/// Provider status code → [`StatusClass`].
///
/// Explicit entries win; anything else falls through to [`default_class`],
/// which understands both HTTP codes and five-digit provider task codes
/// (`20000` ok, `402xx` payment/access, `404xx` not found, `50000` internal).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationTable {
    #[serde(default)]
    pub codes: HashMap<u32, StatusClass>,
}

impl ClassificationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, code: u32, class: StatusClass) -> Self {
        self.codes.insert(code, class);
        self
    }

    pub fn classify(&self, code: u32) -> StatusClass {
        self.codes
            .get(&code)
            .copied()
            .unwrap_or_else(|| default_class(code))
    }
}

pub fn default_class(code: u32) -> StatusClass {
    match code {
        200..=299 | 20000..=20999 => StatusClass::Success,
        401 | 402 | 403 | 40100..=40399 => StatusClass::Denied,
        408 | 429 | 500..=599 | 50000..=50999 => StatusClass::Transient,
        _ => StatusClass::NextCandidate,
    }
}

/// One endpoint path tried for a logical operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCandidate {
    pub path: String,
    #[serde(default)]
    pub classification: ClassificationTable,
}

impl EndpointCandidate {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            classification: ClassificationTable::default(),
        }
    }

    pub fn with_classification(mut self, table: ClassificationTable) -> Self {
        self.classification = table;
        self
    }
}

fn default_items_pointer() -> String {
    "/items".to_string()
}

/// Configuration for one logical operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    pub candidates: Vec<EndpointCandidate>,
    /// Operation to derive the same data from when every candidate misses.
    #[serde(default)]
    pub fallback_operation: Option<String>,
    #[serde(default)]
    pub cache_category: CacheCategory,
    /// JSON pointer to the result list inside a successful response body.
    #[serde(default = "default_items_pointer")]
    pub items_pointer: String,
}

impl OperationSpec {
    pub fn new(name: impl Into<String>, category: CacheCategory) -> Self {
        Self {
            name: name.into(),
            candidates: Vec::new(),
            fallback_operation: None,
            cache_category: category,
            items_pointer: default_items_pointer(),
        }
    }

    pub fn candidate(mut self, candidate: EndpointCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn path(self, path: impl Into<String>) -> Self {
        self.candidate(EndpointCandidate::new(path))
    }

    pub fn fallback(mut self, operation: impl Into<String>) -> Self {
        self.fallback_operation = Some(operation.into());
        self
    }

    pub fn items_at(mut self, pointer: impl Into<String>) -> Self {
        self.items_pointer = pointer.into();
        self
    }
}

/// Immutable table of configured operations.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, OperationSpec>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, spec: OperationSpec) -> Self {
        self.operations.insert(spec.name.clone(), spec);
        self
    }

    /// Parse a JSON array of [`OperationSpec`]s and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let specs: Vec<OperationSpec> = serde_json::from_str(json)?;
        let registry = specs
            .into_iter()
            .fold(Self::new(), |registry, spec| registry.register(spec));
        registry.validate()?;
        Ok(registry)
    }

    /// Every operation has candidates and every fallback resolves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for spec in self.operations.values() {
            if spec.candidates.is_empty() {
                return Err(ConfigError::NoCandidates {
                    operation: spec.name.clone(),
                });
            }
            if let Some(fallback) = &spec.fallback_operation {
                if !self.operations.contains_key(fallback) {
                    return Err(ConfigError::UnknownFallback {
                        operation: spec.name.clone(),
                        fallback: fallback.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Built-in table for the keyword / SERP data provider.
    pub fn seo_defaults() -> Self {
        const TASK_ITEMS: &str = "/tasks/0/result/0/items";
        const TASK_RESULT: &str = "/tasks/0/result";

        Self::new()
            .register(
                OperationSpec::new("keyword_overview", CacheCategory::KeywordMetadata)
                    .path("/v3/dataforseo_labs/google/keyword_overview/live")
                    .path("/v3/dataforseo_labs/keyword_overview/live")
                    .items_at(TASK_ITEMS),
            )
            .register(
                OperationSpec::new("search_volume", CacheCategory::KeywordMetadata)
                    .path("/v3/keywords_data/google_ads/search_volume/live")
                    .path("/v3/keywords_data/google/search_volume/live")
                    .fallback("keyword_mentions")
                    .items_at(TASK_RESULT),
            )
            .register(
                OperationSpec::new("keyword_mentions", CacheCategory::KeywordMetadata)
                    .path("/v3/content_analysis/search/live")
                    .items_at(TASK_ITEMS),
            )
            .register(
                OperationSpec::new("serp_organic", CacheCategory::Serp)
                    .path("/v3/serp/google/organic/live/advanced")
                    .path("/v3/serp/google/organic/live/regular")
                    .items_at(TASK_ITEMS),
            )
            .register(
                OperationSpec::new("serp_competitors", CacheCategory::Serp)
                    .path("/v3/dataforseo_labs/google/serp_competitors/live")
                    .path("/v3/dataforseo_labs/serp_competitors/live")
                    .fallback("serp_organic")
                    .items_at(TASK_ITEMS),
            )
    }
}
