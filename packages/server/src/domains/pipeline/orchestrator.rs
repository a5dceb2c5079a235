//! Pipeline orchestrator.
//!
//! # Run lifecycle
//!
//! ```text
//! Initialized
//!     │  plan = stages that apply to the request (fixes total_stages)
//!     ▼
//! ┌─► Running(stage) ── emit ProgressUpdate on entry ── sink says Cancelled? ──► Aborted
//! │       │
//! │       ├─ Ok(output)            → append slots, add totals → Completed(stage)
//! │       ├─ Err, optional stage   → warning                  → Completed(stage)
//! │       └─ Err, required stage   ───────────────────────────────────────────► Aborted
//! └───────┘
//!     ▼
//! Finalized
//! ```
//!
//! Stage order and stage numbers depend only on the configured stages and the
//! request, never on provider responses.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::context::StageContext;
use super::progress::{ProgressAck, ProgressPolicy, ProgressSink, ProgressUpdate};
use super::stage::{PipelineStage, StageError, StageKind, StageMetadata};
use crate::domains::generation::GenerationRequest;

/// Running totals across executed stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total_tokens: u64,
    pub total_cost: f64,
    pub generation_time_ms: u64,
}

impl RunTotals {
    fn add(&mut self, metadata: &StageMetadata) {
        self.total_tokens += metadata.tokens_used;
        self.total_cost += metadata.cost;
    }
}

/// Metadata recorded for one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub succeeded: bool,
    pub metadata: StageMetadata,
}

/// Everything a finalized run produced.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub context: StageContext,
    pub progress_updates: Vec<ProgressUpdate>,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<String>,
    pub totals: RunTotals,
}

impl PipelineResult {
    /// Distinct providers that served stages, in first-use order.
    pub fn providers_used(&self) -> Vec<String> {
        let mut providers: Vec<String> = Vec::new();
        for provider in self.stages.iter().filter_map(|s| s.metadata.provider_used.as_ref()) {
            if !providers.contains(provider) {
                providers.push(provider.clone());
            }
        }
        providers
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: StageKind,
        #[source]
        source: StageError,
    },

    #[error("cancelled before stage {stage}")]
    Cancelled { stage: StageKind },
}

impl PipelineError {
    pub fn stage(&self) -> StageKind {
        match self {
            PipelineError::Stage { stage, .. } | PipelineError::Cancelled { stage } => *stage,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }
}

/// An aborted run, with the context accumulated before the abort.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub partial_context: StageContext,
    pub progress_updates: Vec<ProgressUpdate>,
    pub warnings: Vec<String>,
    pub totals: RunTotals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Initialized,
    Running(StageKind),
    Completed(StageKind),
    Finalized,
    Aborted(StageKind),
}

fn advance(state: &mut RunState, next: RunState) {
    trace!(from = ?*state, to = ?next, "pipeline state");
    *state = next;
}

/// Runs a fixed sequence of stages for one request at a time.
pub struct Orchestrator {
    stages: Vec<PipelineStage>,
    policy: ProgressPolicy,
}

impl Orchestrator {
    pub fn new(stages: Vec<PipelineStage>) -> Self {
        Self {
            stages,
            policy: ProgressPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ProgressPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Stages that will execute for `request`, in order.
    pub fn plan(&self, request: &GenerationRequest) -> Vec<&PipelineStage> {
        self.stages
            .iter()
            .filter(|stage| stage.handler.applies_to(request))
            .collect()
    }

    pub async fn run(
        &self,
        request: GenerationRequest,
        sink: &dyn ProgressSink,
    ) -> Result<PipelineResult, PipelineFailure> {
        let started = Instant::now();
        let plan = self.plan(&request);
        let weights: Vec<u32> = plan.iter().map(|stage| stage.weight).collect();
        let total_stages = plan.len() as u32;

        let mut state = RunState::Initialized;
        let mut context = StageContext::new(request);
        let mut progress_updates = Vec::with_capacity(plan.len());
        let mut records = Vec::with_capacity(plan.len());
        let mut warnings = Vec::new();
        let mut totals = RunTotals::default();

        debug!(total_stages, "pipeline initialized");

        for (index, stage) in plan.iter().enumerate() {
            advance(&mut state, RunState::Running(stage.kind));

            let update = ProgressUpdate {
                stage: stage.kind,
                stage_number: index as u32 + 1,
                total_stages,
                progress_percentage: self.policy.percentage(index, &weights),
                status: stage.kind.status_line().to_string(),
                details: None,
                timestamp: chrono::Utc::now(),
            };
            let ack = sink.record(&update).await;
            progress_updates.push(update);

            if ack == ProgressAck::Cancelled {
                info!(stage = %stage.kind, "run cancelled");
                advance(&mut state, RunState::Aborted(stage.kind));
                totals.generation_time_ms = started.elapsed().as_millis() as u64;
                return Err(PipelineFailure {
                    error: PipelineError::Cancelled { stage: stage.kind },
                    partial_context: context,
                    progress_updates,
                    warnings,
                    totals,
                });
            }

            let outcome = match tokio::time::timeout(stage.timeout, stage.handler.execute(&context)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StageError::Timeout(stage.timeout)),
            };

            let outcome = outcome.and_then(|output| {
                context
                    .append_all(output.writes)
                    .map_err(|e| StageError::Failed(e.to_string()))?;
                Ok(output.metadata)
            });

            match outcome {
                Ok(metadata) => {
                    debug!(
                        stage = %stage.kind,
                        tokens = metadata.tokens_used,
                        provider = metadata.provider_used.as_deref().unwrap_or("-"),
                        "stage completed"
                    );
                    totals.add(&metadata);
                    warnings.extend(
                        metadata
                            .warnings
                            .iter()
                            .map(|w| format!("{}: {}", stage.kind, w)),
                    );
                    records.push(StageRecord {
                        stage: stage.kind,
                        succeeded: true,
                        metadata,
                    });
                }
                Err(error) if stage.is_required() => {
                    warn!(stage = %stage.kind, error = %error, "required stage failed");
                    advance(&mut state, RunState::Aborted(stage.kind));
                    totals.generation_time_ms = started.elapsed().as_millis() as u64;
                    return Err(PipelineFailure {
                        error: PipelineError::Stage {
                            stage: stage.kind,
                            source: error,
                        },
                        partial_context: context,
                        progress_updates,
                        warnings,
                        totals,
                    });
                }
                Err(error) => {
                    warn!(stage = %stage.kind, error = %error, "optional stage failed, continuing");
                    warnings.push(format!("{} skipped after failure: {}", stage.kind, error));
                    records.push(StageRecord {
                        stage: stage.kind,
                        succeeded: false,
                        metadata: StageMetadata::default(),
                    });
                }
            }

            advance(&mut state, RunState::Completed(stage.kind));
        }

        advance(&mut state, RunState::Finalized);
        totals.generation_time_ms = started.elapsed().as_millis() as u64;
        debug!(tokens = totals.total_tokens, stages = records.len(), "pipeline finalized");

        Ok(PipelineResult {
            context,
            progress_updates,
            stages: records,
            warnings,
            totals,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::domains::pipeline::{ContextSlot, ProgressLog, StageHandler, StageOutput};

    struct Writes(ContextSlot, &'static str);

    #[async_trait]
    impl StageHandler for Writes {
        async fn execute(&self, _context: &StageContext) -> Result<StageOutput, StageError> {
            Ok(StageOutput::new(StageMetadata {
                tokens_used: 10,
                cost: 0.5,
                provider_used: Some("mock".into()),
                warnings: vec![],
            })
            .write(self.0, json!(self.1)))
        }
    }

    /// Writes a fresh slot, then one the draft stage already filled.
    struct CitesOverDraft;

    #[async_trait]
    impl StageHandler for CitesOverDraft {
        async fn execute(&self, _context: &StageContext) -> Result<StageOutput, StageError> {
            Ok(StageOutput::default()
                .write(ContextSlot::Citations, json!(["https://example.com"]))
                .write(ContextSlot::Draft, json!("rewritten")))
        }
    }

    struct Hangs;

    #[async_trait]
    impl StageHandler for Hangs {
        async fn execute(&self, _context: &StageContext) -> Result<StageOutput, StageError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StageOutput::default())
        }
    }

    struct CancelAfter {
        seen: AtomicUsize,
        limit: usize,
    }

    #[async_trait]
    impl ProgressSink for CancelAfter {
        async fn record(&self, _update: &ProgressUpdate) -> ProgressAck {
            if self.seen.fetch_add(1, Ordering::SeqCst) >= self.limit {
                ProgressAck::Cancelled
            } else {
                ProgressAck::Continue
            }
        }
    }

    #[tokio::test]
    async fn totals_accumulate_over_stages() {
        let orchestrator = Orchestrator::new(vec![
            PipelineStage::required(StageKind::StructurePlanning, Arc::new(Writes(ContextSlot::Outline, "o"))),
            PipelineStage::required(StageKind::DraftGeneration, Arc::new(Writes(ContextSlot::Draft, "d"))),
        ]);

        let result = orchestrator
            .run(GenerationRequest::new("X"), &ProgressLog::new())
            .await
            .unwrap();

        assert_eq!(result.totals.total_tokens, 20);
        assert!((result.totals.total_cost - 1.0).abs() < f64::EPSILON);
        assert_eq!(result.providers_used(), vec!["mock"]);
        assert_eq!(result.context.best_content(), Some("d"));
    }

    #[tokio::test]
    async fn writing_an_existing_slot_fails_the_stage() {
        let orchestrator = Orchestrator::new(vec![
            PipelineStage::required(StageKind::DraftGeneration, Arc::new(Writes(ContextSlot::Draft, "a"))),
            PipelineStage::required(StageKind::Enhancement, Arc::new(Writes(ContextSlot::Draft, "b"))),
        ]);

        let failure = orchestrator
            .run(GenerationRequest::new("X"), &ProgressLog::new())
            .await
            .unwrap_err();

        assert_eq!(failure.error.stage(), StageKind::Enhancement);
        assert_eq!(failure.partial_context.text(ContextSlot::Draft), Some("a"));
    }

    #[tokio::test]
    async fn failed_optional_stage_leaves_no_partial_writes() {
        let orchestrator = Orchestrator::new(vec![
            PipelineStage::required(StageKind::DraftGeneration, Arc::new(Writes(ContextSlot::Draft, "d"))),
            PipelineStage::optional(StageKind::CitationGeneration, Arc::new(CitesOverDraft)),
        ]);

        let result = orchestrator
            .run(GenerationRequest::new("X"), &ProgressLog::new())
            .await
            .unwrap();

        assert!(!result.context.contains(ContextSlot::Citations));
        assert_eq!(result.context.text(ContextSlot::Draft), Some("d"));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("citation_generation") && w.contains("draft")));
    }

    #[tokio::test(start_paused = true)]
    async fn stage_timeout_is_a_stage_failure() {
        let orchestrator = Orchestrator::new(vec![PipelineStage::required(
            StageKind::Research,
            Arc::new(Hangs),
        )
        .with_timeout(Duration::from_secs(5))]);

        let failure = orchestrator
            .run(GenerationRequest::new("X"), &ProgressLog::new())
            .await
            .unwrap_err();

        assert_eq!(
            failure.error,
            PipelineError::Stage {
                stage: StageKind::Research,
                source: StageError::Timeout(Duration::from_secs(5)),
            }
        );
    }

    #[tokio::test]
    async fn cancelled_ack_stops_before_next_stage() {
        let orchestrator = Orchestrator::new(vec![
            PipelineStage::required(StageKind::KeywordAnalysis, Arc::new(Writes(ContextSlot::KeywordData, "k"))),
            PipelineStage::required(StageKind::DraftGeneration, Arc::new(Writes(ContextSlot::Draft, "d"))),
        ]);
        let sink = CancelAfter {
            seen: AtomicUsize::new(0),
            limit: 1,
        };

        let failure = orchestrator.run(GenerationRequest::new("X"), &sink).await.unwrap_err();

        assert!(failure.error.is_cancelled());
        assert_eq!(failure.error.stage(), StageKind::DraftGeneration);
        assert!(failure.partial_context.contains(ContextSlot::KeywordData));
        assert!(!failure.partial_context.contains(ContextSlot::Draft));
    }
}
