//! The provider gateway: one dispatch loop over configured candidates.
//!
//! # Call flow
//!
//! ```text
//! call(operation, args)
//!     │
//!     ├─► normalize + validate args
//!     ├─► cache hit? ──────────────────────────► return cached result
//!     │
//!     ├─► for candidate in operation.candidates
//!     │       ├─► send (per-call timeout, retry transient with backoff)
//!     │       └─► classify status
//!     │             ├─ success      → items (or empty if malformed) → stop
//!     │             ├─ next         → continue
//!     │             └─ denied       → Err(Denied), nothing cached
//!     │
//!     ├─► exhausted → fallback operation (if configured), same loop
//!     └─► write final result to cache under the original key
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::arguments::normalize_arguments;
use crate::cache::{CacheKey, ResponseCache};
use crate::candidate::{EndpointCandidate, OperationRegistry, OperationSpec, StatusClass};
use crate::error::{GatewayError, Result, TransportError};
use crate::retry::RetryPolicy;
use crate::transport::ProviderTransport;

/// Where a normalized result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// A candidate of the requested operation returned data.
    Provider,
    /// The configured fallback operation returned data.
    Fallback,
    /// No data: every path missed, or the response was malformed.
    Empty,
}

/// Provider data normalized to a list of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub operation: String,
    pub items: Vec<Value>,
    /// Path of the candidate that produced the data, if any.
    pub candidate: Option<String>,
    pub source: ResultSource,
    #[serde(skip)]
    pub from_cache: bool,
}

impl NormalizedResult {
    pub fn empty(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            items: Vec::new(),
            candidate: None,
            source: ResultSource::Empty,
            from_cache: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

enum CandidateOutcome {
    /// Success status. `None` items means the body was malformed.
    Success(Option<Vec<Value>>),
    NotFound,
    Denied(String),
    /// Retries spent on transient failures.
    Exhausted(String),
}

enum ChainOutcome {
    Resolved(NormalizedResult),
    Exhausted {
        saw_miss: bool,
        last_error: Option<String>,
    },
}

/// Uniform client for outbound provider calls.
pub struct Gateway {
    transport: Arc<dyn ProviderTransport>,
    cache: ResponseCache,
    operations: OperationRegistry,
    retry: RetryPolicy,
    /// Operation → index of the last candidate that succeeded.
    preferred: RwLock<HashMap<String, usize>>,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn ProviderTransport>,
        cache: ResponseCache,
        operations: OperationRegistry,
    ) -> Self {
        Self {
            transport,
            cache,
            operations,
            retry: RetryPolicy::default(),
            preferred: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    /// Issue a logical call, transparently handling cache, fallback, and retries.
    pub async fn call(&self, operation: &str, arguments: Value) -> Result<NormalizedResult> {
        let spec = self
            .operations
            .get(operation)
            .ok_or_else(|| GatewayError::UnknownOperation(operation.to_string()))?;
        let arguments = normalize_arguments(operation, arguments)?;
        let key = CacheKey::new(operation, &arguments);

        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_value::<NormalizedResult>(cached) {
                Ok(mut result) => {
                    debug!(operation, key = %key, "cache hit");
                    result.from_cache = true;
                    return Ok(result);
                }
                Err(e) => warn!(operation, error = %e, "discarding undecodable cache entry"),
            }
        }

        let result = self.resolve(spec, &arguments).await?;

        match serde_json::to_value(&result) {
            Ok(value) => self.cache.put(&key, value, spec.cache_category).await,
            Err(e) => warn!(operation, error = %e, "result not cacheable"),
        }
        Ok(result)
    }

    /// Run independent calls concurrently. Results keep the input order.
    pub async fn call_many(&self, calls: Vec<(String, Value)>) -> Vec<Result<NormalizedResult>> {
        let futures = calls
            .into_iter()
            .map(|(operation, arguments)| async move { self.call(&operation, arguments).await });
        futures::future::join_all(futures).await
    }

    async fn resolve(&self, spec: &OperationSpec, arguments: &Value) -> Result<NormalizedResult> {
        let mut visited = vec![spec.name.as_str()];
        let mut current = spec;
        let mut saw_any_miss = false;
        let mut last_error = None;

        loop {
            match self.try_candidates(current, arguments).await? {
                ChainOutcome::Resolved(mut result) => {
                    if current.name != spec.name {
                        result.source = match result.source {
                            ResultSource::Empty => ResultSource::Empty,
                            _ => ResultSource::Fallback,
                        };
                        result.operation = spec.name.clone();
                    }
                    return Ok(result);
                }
                ChainOutcome::Exhausted {
                    saw_miss,
                    last_error: error,
                } => {
                    saw_any_miss |= saw_miss;
                    if error.is_some() {
                        last_error = error;
                    }
                }
            }

            let Some(fallback) = current.fallback_operation.as_deref() else {
                break;
            };
            if visited.contains(&fallback) {
                return Err(GatewayError::FallbackCycle(fallback.to_string()));
            }
            current = self
                .operations
                .get(fallback)
                .ok_or_else(|| GatewayError::UnknownOperation(fallback.to_string()))?;
            visited.push(fallback);
            info!(operation = %spec.name, fallback, "candidates exhausted, trying fallback operation");
        }

        match last_error {
            // Nothing definitive came back anywhere: surface as unavailable, cache nothing.
            Some(last_error) if !saw_any_miss => Err(GatewayError::Unavailable {
                operation: spec.name.clone(),
                last_error,
            }),
            _ => {
                debug!(operation = %spec.name, "no data from any candidate, returning empty result");
                Ok(NormalizedResult::empty(&spec.name))
            }
        }
    }

    async fn try_candidates(&self, spec: &OperationSpec, arguments: &Value) -> Result<ChainOutcome> {
        let mut saw_miss = false;
        let mut last_error = None;

        for index in self.candidate_order(spec) {
            let candidate = &spec.candidates[index];
            match self.attempt_candidate(spec, candidate, arguments).await {
                CandidateOutcome::Success(items) => {
                    self.remember(spec, index);
                    let result = match items {
                        Some(items) => NormalizedResult {
                            operation: spec.name.clone(),
                            items,
                            candidate: Some(candidate.path.clone()),
                            source: ResultSource::Provider,
                            from_cache: false,
                        },
                        None => {
                            warn!(
                                operation = %spec.name,
                                candidate = %candidate.path,
                                pointer = %spec.items_pointer,
                                "malformed response normalized to empty result"
                            );
                            NormalizedResult {
                                candidate: Some(candidate.path.clone()),
                                ..NormalizedResult::empty(&spec.name)
                            }
                        }
                    };
                    return Ok(ChainOutcome::Resolved(result));
                }
                CandidateOutcome::NotFound => {
                    debug!(operation = %spec.name, candidate = %candidate.path, "candidate not found, trying next");
                    saw_miss = true;
                }
                CandidateOutcome::Denied(reason) => {
                    warn!(operation = %spec.name, candidate = %candidate.path, reason = %reason, "provider denied access");
                    return Err(GatewayError::Denied {
                        operation: spec.name.clone(),
                        candidate: candidate.path.clone(),
                        reason,
                    });
                }
                CandidateOutcome::Exhausted(error) => {
                    warn!(operation = %spec.name, candidate = %candidate.path, error = %error, "candidate retries exhausted");
                    last_error = Some(error);
                }
            }
        }

        Ok(ChainOutcome::Exhausted {
            saw_miss,
            last_error,
        })
    }

    async fn attempt_candidate(
        &self,
        spec: &OperationSpec,
        candidate: &EndpointCandidate,
        arguments: &Value,
    ) -> CandidateOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let sent = tokio::time::timeout(
                self.retry.call_timeout,
                self.transport.send(&candidate.path, arguments),
            )
            .await;

            let error = match sent {
                Err(_) => TransportError::Timeout.to_string(),
                Ok(Err(TransportError::Auth(reason))) => return CandidateOutcome::Denied(reason),
                Ok(Err(e)) => e.to_string(),
                Ok(Ok(raw)) => match candidate.classification.classify(raw.status) {
                    StatusClass::Success => {
                        return CandidateOutcome::Success(extract_items(&raw.body, &spec.items_pointer))
                    }
                    StatusClass::NextCandidate => return CandidateOutcome::NotFound,
                    StatusClass::Denied => {
                        return CandidateOutcome::Denied(format!("provider status {}", raw.status))
                    }
                    StatusClass::Transient => format!("provider status {}", raw.status),
                },
            };

            debug!(
                operation = %spec.name,
                candidate = %candidate.path,
                attempt,
                error = %error,
                "transient failure"
            );
            last_error = error;
            if attempt < max_attempts {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
        }

        CandidateOutcome::Exhausted(last_error)
    }

    /// Candidate indices, last-successful first.
    fn candidate_order(&self, spec: &OperationSpec) -> Vec<usize> {
        let preferred = self
            .preferred
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&spec.name)
            .copied()
            .filter(|&index| index < spec.candidates.len());

        let mut order: Vec<usize> = (0..spec.candidates.len()).collect();
        if let Some(index) = preferred {
            order.retain(|&i| i != index);
            order.insert(0, index);
        }
        order
    }

    fn remember(&self, spec: &OperationSpec, index: usize) {
        self.preferred
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(spec.name.clone(), index);
    }
}

/// Items at `pointer`, or `None` when missing, null, or not a list.
fn extract_items(body: &Value, pointer: &str) -> Option<Vec<Value>> {
    match body.pointer(pointer) {
        Some(Value::Array(items)) => Some(items.clone()),
        _ => None,
    }
}
