//! Job manager: turns a generation request into a trackable job.
//!
//! The manager owns the caller-facing operations (submit, status, cancel,
//! purge). Execution happens in [`JobWorker`], reached either inline or
//! through a [`TaskQueue`].

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::job::{CancelOutcome, JobStatus};
use super::queue::{DispatchMessage, QueueError, TaskQueue};
use super::store::{JobStore, Transition};
use super::worker::{DispatchOutcome, JobWorker};
use super::Job;
use crate::domains::generation::{GenerationRequest, RequestError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: JobStatus },

    #[error("{0}")]
    QueueUnavailable(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// What `submit` does when the queue refuses an async job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFallback {
    /// Run the job inline and return its terminal state.
    #[default]
    Inline,
    /// Fail the job and return an error to the caller.
    Reject,
}

impl FromStr for QueueFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "sync" => Ok(QueueFallback::Inline),
            "reject" | "error" => Ok(QueueFallback::Reject),
            other => Err(format!("unknown queue fallback {other:?}")),
        }
    }
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    worker: Arc<JobWorker>,
    fallback: QueueFallback,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        worker: Arc<JobWorker>,
        fallback: QueueFallback,
    ) -> Self {
        Self {
            store,
            queue,
            worker,
            fallback,
        }
    }

    /// Validate and accept a request.
    ///
    /// Synchronous requests return the terminal job. Asynchronous requests
    /// return once the queue has accepted delivery. The job is marked
    /// `queued` only after that, so the returned snapshot is `queued`, or
    /// `processing` or terminal when a worker claimed it before the mark
    /// landed. It is never `pending`.
    pub async fn submit(&self, request: GenerationRequest) -> Result<Job, JobError> {
        let request = request.normalized()?;
        let async_mode = request.async_mode;
        let job = Job::new(request);
        self.store.insert(&job).await?;

        info!(job_id = %job.id, async_mode, topic = %job.request.topic, "job submitted");

        if !async_mode {
            return self.run_inline(job.id).await;
        }

        match self.queue.enqueue(DispatchMessage::new(job.id)).await {
            Ok(()) => match self.store.mark_queued(job.id).await? {
                Transition::Applied(job) => Ok(job),
                Transition::Stale(_) => self.get_status(job.id).await,
                Transition::NotFound => Err(JobError::NotFound(job.id)),
            },
            Err(QueueError::Unavailable(reason)) => match self.fallback {
                QueueFallback::Inline => {
                    warn!(job_id = %job.id, reason = %reason, "queue unavailable, running inline");
                    self.run_inline(job.id).await
                }
                QueueFallback::Reject => {
                    warn!(job_id = %job.id, reason = %reason, "queue unavailable, rejecting job");
                    let message = format!("task queue unavailable: {reason}");
                    if let Transition::Applied(failed) =
                        self.store.fail(job.id, None, &message).await?
                    {
                        self.worker.announce_terminal(&failed).await;
                    }
                    Err(JobError::QueueUnavailable(message))
                }
            },
        }
    }

    async fn run_inline(&self, job_id: Uuid) -> Result<Job, JobError> {
        if let DispatchOutcome::NotFound = self.worker.handle_dispatch(job_id).await? {
            return Err(JobError::NotFound(job_id));
        }
        self.get_status(job_id).await
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    /// Cancel a job.
    ///
    /// A job that has not started fails immediately. A running job is flagged;
    /// the worker stops before its next stage and the job ends failed.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, JobError> {
        match self.store.request_cancel(job_id).await? {
            CancelOutcome::Cancelled(job) => {
                info!(job_id = %job_id, "job cancelled before start");
                self.worker.announce_terminal(&job).await;
                Ok(job)
            }
            CancelOutcome::Requested(job) => {
                info!(job_id = %job_id, "cancellation requested for running job");
                Ok(job)
            }
            CancelOutcome::AlreadyTerminal(status) => Err(JobError::AlreadyTerminal {
                id: job_id,
                status,
            }),
            CancelOutcome::NotFound => Err(JobError::NotFound(job_id)),
        }
    }

    /// Delete terminal jobs older than `retention`.
    pub async fn purge(&self, retention: Duration) -> Result<u64, JobError> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(7));
        let purged = self.store.purge_terminal_before(cutoff).await?;
        if purged > 0 {
            info!(purged, "purged finished jobs");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_fallback_parses_loose_names() {
        assert_eq!("inline".parse::<QueueFallback>(), Ok(QueueFallback::Inline));
        assert_eq!(" Reject ".parse::<QueueFallback>(), Ok(QueueFallback::Reject));
        assert!("drop".parse::<QueueFallback>().is_err());
    }
}
