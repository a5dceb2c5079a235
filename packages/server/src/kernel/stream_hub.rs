//! In-process pub/sub hub for real-time job progress.
//!
//! One broadcast channel per job. The worker publishes every progress update
//! and the terminal transition; SSE endpoints subscribe.
//!
//! # Usage
//!
//! Producers (job worker):
//!   hub.publish(job_id, JobEvent::Progress(update)).await;
//!
//! Consumers (SSE endpoints):
//!   let rx = hub.subscribe(job_id).await;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::domains::pipeline::ProgressUpdate;
use crate::kernel::jobs::JobStatus;

/// Event streamed to subscribers of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress(ProgressUpdate),
    Terminal {
        status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Progress(_) => "progress",
            JobEvent::Terminal { .. } => "terminal",
        }
    }
}

/// Job-keyed pub/sub hub.
///
/// Thread-safe, cloneable.
#[derive(Clone)]
pub struct ProgressHub {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<JobEvent>>>>,
    capacity: usize,
}

impl ProgressHub {
    /// Create a new ProgressHub with default capacity (256 messages per channel).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new ProgressHub with the given channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish an event for a job. No-op if no subscribers.
    pub async fn publish(&self, job_id: Uuid, event: JobEvent) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&job_id) {
            // Ignore send errors (no active receivers)
            let _ = tx.send(event);
        }
    }

    /// Subscribe to a job. Creates the channel if it doesn't exist.
    pub async fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<JobEvent> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Remove channels with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}
