//! Progress updates and the sink they are reported to.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::StageKind;

/// One stage-entry event of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: StageKind,
    /// 1-based, strictly increasing within a run.
    pub stage_number: u32,
    /// Stages that will execute in this run; constant across the run.
    pub total_stages: u32,
    pub progress_percentage: u8,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// How a stage's position maps to a completion percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPolicy {
    /// Every executed stage counts the same.
    #[default]
    Equal,
    /// Stages count in proportion to their configured weight.
    Weighted,
}

impl ProgressPolicy {
    /// Percentage reached once the stage at `index` (0-based) in `weights`
    /// has been entered.
    pub fn percentage(&self, index: usize, weights: &[u32]) -> u8 {
        if weights.is_empty() {
            return 100;
        }
        let index = index.min(weights.len() - 1);
        let (done, total) = match self {
            ProgressPolicy::Equal => ((index + 1) as u64, weights.len() as u64),
            ProgressPolicy::Weighted => (
                weights[..=index].iter().map(|&w| u64::from(w)).sum(),
                weights.iter().map(|&w| u64::from(w)).sum::<u64>().max(1),
            ),
        };
        ((done * 100) / total).min(100) as u8
    }
}

/// Whether the run should keep going after a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAck {
    Continue,
    /// Cancellation was requested; stop before the next stage.
    Cancelled,
}

/// Receives progress updates as a run advances.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn record(&self, update: &ProgressUpdate) -> ProgressAck;
}

/// Sink that keeps every update in memory.
#[derive(Default)]
pub struct ProgressLog {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProgressSink for ProgressLog {
    async fn record(&self, update: &ProgressUpdate) -> ProgressAck {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(update.clone());
        ProgressAck::Continue
    }
}
