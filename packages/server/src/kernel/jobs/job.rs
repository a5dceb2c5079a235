//! Job model for background generation runs.
//!
//! All lifecycle transitions live here as checks-then-mutate methods, so every
//! store applies exactly the same rules. A method either rejects the
//! transition without touching the job, or applies it completely.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::domains::generation::GenerationRequest;
use crate::domains::pipeline::{ProgressUpdate, StageKind};

/// Error message recorded for cancelled jobs.
pub const CANCELLED_REASON: &str = "cancelled";

// ============================================================================
// Status
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "generation_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the lifecycle. Statuses only ever move to a higher rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Queued => 1,
            JobStatus::Processing => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Transition outcomes
// ============================================================================

/// Result of recording one progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    Recorded,
    /// Already recorded by an earlier run of this job (lease takeover).
    Skipped,
    /// Cancellation was requested; the update was not recorded.
    Cancelled,
    /// The caller is no longer the writer of record.
    Stale(JobStatus),
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The job had not started and is now failed.
    Cancelled(Job),
    /// The job is running; the worker stops before its next stage.
    Requested(Job),
    AlreadyTerminal(JobStatus),
    NotFound,
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    pub request: GenerationRequest,

    // Lifecycle
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default)]
    pub progress_percentage: u8,
    #[builder(default)]
    pub current_stage: Option<StageKind>,
    #[builder(default)]
    pub progress_updates: Vec<ProgressUpdate>,
    /// Advisory, in seconds.
    #[builder(default)]
    pub estimated_time_remaining: Option<u64>,

    // Outcome
    #[builder(default)]
    pub result: Option<Value>,
    #[builder(default)]
    pub error_message: Option<String>,
    #[builder(default)]
    pub warnings: Vec<String>,

    // Lease management
    #[builder(default)]
    pub worker_id: Option<String>,
    #[builder(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub cancel_requested: bool,
    #[builder(default)]
    pub attempts: u32,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

fn lease_until(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(1))
}

impl Job {
    /// Create a pending job for `request`.
    pub fn new(request: GenerationRequest) -> Self {
        Self::builder().request(request).build()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn is_writer(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Processing && self.worker_id.as_deref() == Some(worker_id)
    }

    fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.map_or(true, |expires| expires <= now)
    }

    /// Last stage number recorded, 0 before the first update.
    pub fn last_stage_number(&self) -> u32 {
        self.progress_updates
            .last()
            .map_or(0, |update| update.stage_number)
    }

    /// Remaining time extrapolated from elapsed time and progress.
    pub fn estimate_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        let started = self.started_at?;
        let percentage = u64::from(self.progress_percentage);
        if percentage == 0 || percentage >= 100 {
            return None;
        }
        let elapsed = (now - started).num_seconds().max(0) as u64;
        Some(elapsed * (100 - percentage) / percentage)
    }

    /// Delivery to the queue was accepted.
    pub fn mark_queued(&mut self, now: DateTime<Utc>) -> Result<(), JobStatus> {
        if self.status != JobStatus::Pending {
            return Err(self.status);
        }
        self.status = JobStatus::Queued;
        self.updated_at = now;
        Ok(())
    }

    /// Become the writer of record.
    ///
    /// Allowed from pending or queued, or from processing once the previous
    /// holder's lease has expired. Anything else is a duplicate dispatch.
    pub fn claim(
        &mut self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), JobStatus> {
        let claimable = match self.status {
            JobStatus::Pending | JobStatus::Queued => true,
            JobStatus::Processing => self.lease_expired(now),
            JobStatus::Completed | JobStatus::Failed => false,
        };
        if !claimable {
            return Err(self.status);
        }

        self.status = JobStatus::Processing;
        self.worker_id = Some(worker_id.to_string());
        self.lease_expires_at = Some(lease_until(now, lease));
        self.started_at.get_or_insert(now);
        self.attempts += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Extend the lease. Returns false when `worker_id` no longer holds it.
    pub fn heartbeat(&mut self, worker_id: &str, lease: Duration, now: DateTime<Utc>) -> bool {
        if !self.is_writer(worker_id) {
            return false;
        }
        self.lease_expires_at = Some(lease_until(now, lease));
        self.updated_at = now;
        true
    }

    pub fn record_progress(
        &mut self,
        worker_id: &str,
        update: &ProgressUpdate,
        now: DateTime<Utc>,
    ) -> ProgressOutcome {
        if !self.is_writer(worker_id) {
            return ProgressOutcome::Stale(self.status);
        }
        if self.cancel_requested {
            return ProgressOutcome::Cancelled;
        }
        if update.stage_number <= self.last_stage_number() {
            return ProgressOutcome::Skipped;
        }

        self.progress_percentage = self.progress_percentage.max(update.progress_percentage);
        self.current_stage = Some(update.stage);
        self.progress_updates.push(update.clone());
        self.estimated_time_remaining = self.estimate_remaining(now);
        self.updated_at = now;
        ProgressOutcome::Recorded
    }

    /// Finish a run. A run that finishes after cancellation was requested
    /// still ends failed.
    pub fn complete(
        &mut self,
        worker_id: &str,
        result: Value,
        warnings: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<(), JobStatus> {
        if !self.is_writer(worker_id) {
            return Err(self.status);
        }
        if self.cancel_requested {
            self.finish_failed(CANCELLED_REASON, now);
            return Ok(());
        }

        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.warnings = warnings;
        self.progress_percentage = 100;
        self.finish(now);
        Ok(())
    }

    /// Fail the job.
    ///
    /// With a `worker_id`, only the writer of record may fail it. Without
    /// one, only a job no worker has claimed yet can be failed.
    pub fn fail(
        &mut self,
        worker_id: Option<&str>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), JobStatus> {
        let allowed = match worker_id {
            Some(worker_id) => self.is_writer(worker_id),
            None => matches!(self.status, JobStatus::Pending | JobStatus::Queued),
        };
        if !allowed {
            return Err(self.status);
        }
        self.finish_failed(reason, now);
        Ok(())
    }

    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> CancelOutcome {
        match self.status {
            JobStatus::Completed | JobStatus::Failed => CancelOutcome::AlreadyTerminal(self.status),
            JobStatus::Pending | JobStatus::Queued => {
                self.finish_failed(CANCELLED_REASON, now);
                CancelOutcome::Cancelled(self.clone())
            }
            JobStatus::Processing => {
                self.cancel_requested = true;
                self.updated_at = now;
                CancelOutcome::Requested(self.clone())
            }
        }
    }

    fn finish_failed(&mut self, reason: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(reason.to_string());
        self.finish(now);
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        self.updated_at = now;
        self.estimated_time_remaining = None;
        self.lease_expires_at = None;
    }
}
