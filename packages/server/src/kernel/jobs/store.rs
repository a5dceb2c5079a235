//! Job persistence.
//!
//! Every mutating operation is a conditional transition: the store applies
//! the matching [`Job`] method under a per-job lock (memory) or row lock
//! (Postgres), so concurrent dispatches of the same job can never move it
//! backwards.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::job::{CancelOutcome, Job, JobStatus, ProgressOutcome};
use crate::domains::pipeline::ProgressUpdate;

/// Outcome of a lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Job),
    /// The job was in a state that does not allow the transition.
    Stale(JobStatus),
    NotFound,
}

/// Outcome of a dispatch claim.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Claimed(Job),
    /// Another delivery already owns or finished the job.
    Duplicate(JobStatus),
    NotFound,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    async fn mark_queued(&self, id: Uuid) -> Result<Transition>;

    async fn claim(&self, id: Uuid, worker_id: &str, lease: Duration) -> Result<Claim>;

    /// Extend the lease held by `worker_id`. Returns false if it lost it.
    async fn heartbeat(&self, id: Uuid, worker_id: &str, lease: Duration) -> Result<bool>;

    async fn record_progress(
        &self,
        id: Uuid,
        worker_id: &str,
        update: &ProgressUpdate,
    ) -> Result<ProgressOutcome>;

    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        result: Value,
        warnings: Vec<String>,
    ) -> Result<Transition>;

    /// Fail a job. See [`Job::fail`] for who may do so.
    async fn fail(&self, id: Uuid, worker_id: Option<&str>, reason: &str) -> Result<Transition>;

    async fn request_cancel(&self, id: Uuid) -> Result<CancelOutcome>;

    /// Delete terminal jobs that finished before `cutoff`.
    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Map a checked transition result onto [`Transition`].
pub(crate) fn transition(job: &Job, applied: std::result::Result<(), JobStatus>) -> Transition {
    match applied {
        Ok(()) => Transition::Applied(job.clone()),
        Err(status) => Transition::Stale(status),
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Job store kept in process memory.
///
/// Used by tests and by single-instance deployments without a database.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored job.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn modify<T>(&self, id: Uuid, f: impl FnOnce(&mut Job, DateTime<Utc>) -> T) -> Option<T> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.get_mut(&id).map(|job| f(job, Utc::now()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&job.id) {
            anyhow::bail!("job {} already exists", job.id);
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn mark_queued(&self, id: Uuid) -> Result<Transition> {
        Ok(self
            .modify(id, |job, now| {
                let applied = job.mark_queued(now);
                transition(job, applied)
            })
            .unwrap_or(Transition::NotFound))
    }

    async fn claim(&self, id: Uuid, worker_id: &str, lease: Duration) -> Result<Claim> {
        Ok(self
            .modify(id, |job, now| match job.claim(worker_id, lease, now) {
                Ok(()) => Claim::Claimed(job.clone()),
                Err(status) => Claim::Duplicate(status),
            })
            .unwrap_or(Claim::NotFound))
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str, lease: Duration) -> Result<bool> {
        Ok(self
            .modify(id, |job, now| job.heartbeat(worker_id, lease, now))
            .unwrap_or(false))
    }

    async fn record_progress(
        &self,
        id: Uuid,
        worker_id: &str,
        update: &ProgressUpdate,
    ) -> Result<ProgressOutcome> {
        Ok(self
            .modify(id, |job, now| job.record_progress(worker_id, update, now))
            .unwrap_or(ProgressOutcome::NotFound))
    }

    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        result: Value,
        warnings: Vec<String>,
    ) -> Result<Transition> {
        Ok(self
            .modify(id, |job, now| {
                let applied = job.complete(worker_id, result, warnings, now);
                transition(job, applied)
            })
            .unwrap_or(Transition::NotFound))
    }

    async fn fail(&self, id: Uuid, worker_id: Option<&str>, reason: &str) -> Result<Transition> {
        Ok(self
            .modify(id, |job, now| {
                let applied = job.fail(worker_id, reason, now);
                transition(job, applied)
            })
            .unwrap_or(Transition::NotFound))
    }

    async fn request_cancel(&self, id: Uuid) -> Result<CancelOutcome> {
        Ok(self
            .modify(id, |job, now| job.request_cancel(now))
            .unwrap_or(CancelOutcome::NotFound))
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.is_terminal() && job.completed_at.map_or(false, |done| done < cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }
}
