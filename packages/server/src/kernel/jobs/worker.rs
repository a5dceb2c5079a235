//! Job worker: executes one dispatched job.
//!
//! The worker is the only writer of a job while it holds the lease:
//! - Claims the job (duplicate deliveries stop here)
//! - Runs the pipeline under the job-level timeout
//! - Records progress through the store and the progress hub
//! - Extends its lease with periodic heartbeats
//! - Writes exactly one terminal transition, then notifies
//!
//! # Architecture
//!
//! ```text
//! TaskQueue delivers DispatchMessage
//!     │
//!     └─► JobWorker.handle_dispatch(job_id)
//!             ├─► store.claim()            Duplicate / NotFound → no-op
//!             ├─► heartbeat task           extends the lease
//!             ├─► Orchestrator.run()       progress → JobProgressSink
//!             └─► store.complete() / store.fail()
//!                     └─► TerminalAnnouncer: hub terminal event + notifier (spawned)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{JobStatus, ProgressOutcome};
use super::notifier::{TerminalAnnouncer, TerminalNotifier};
use super::store::{Claim, JobStore, Transition};
use super::Job;
use crate::domains::generation::GeneratedContent;
use crate::domains::pipeline::{Orchestrator, ProgressAck, ProgressSink, ProgressUpdate};
use crate::kernel::stream_hub::{JobEvent, ProgressHub};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Worker ID for this instance
    pub worker_id: String,
    /// How long a claim stays valid without a heartbeat
    pub lease_duration: Duration,
    /// How often to send heartbeats for running jobs
    pub heartbeat_interval: Duration,
    /// Wall-clock budget for one run before it is force-failed
    pub job_timeout: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            lease_duration: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(20),
            job_timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// What one dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This delivery ran the job to the given terminal status.
    Executed(JobStatus),
    /// Another delivery owns or already finished the job.
    Duplicate(JobStatus),
    NotFound,
}

/// Progress sink that writes through the job store and fans out to the hub.
struct JobProgressSink {
    store: Arc<dyn JobStore>,
    hub: ProgressHub,
    job_id: Uuid,
    worker_id: String,
}

#[async_trait]
impl ProgressSink for JobProgressSink {
    async fn record(&self, update: &ProgressUpdate) -> ProgressAck {
        match self
            .store
            .record_progress(self.job_id, &self.worker_id, update)
            .await
        {
            Ok(ProgressOutcome::Recorded) => {
                self.hub
                    .publish(self.job_id, JobEvent::Progress(update.clone()))
                    .await;
                ProgressAck::Continue
            }
            Ok(ProgressOutcome::Skipped) => ProgressAck::Continue,
            Ok(ProgressOutcome::Cancelled) => {
                info!(job_id = %self.job_id, stage = %update.stage, "cancellation acknowledged");
                ProgressAck::Cancelled
            }
            Ok(ProgressOutcome::Stale(status)) => {
                warn!(job_id = %self.job_id, status = %status, "lost ownership of job, stopping run");
                ProgressAck::Cancelled
            }
            Ok(ProgressOutcome::NotFound) => {
                warn!(job_id = %self.job_id, "job disappeared during run");
                ProgressAck::Cancelled
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "failed to record progress");
                ProgressAck::Continue
            }
        }
    }
}

pub struct JobWorker {
    store: Arc<dyn JobStore>,
    orchestrator: Arc<Orchestrator>,
    hub: ProgressHub,
    announcer: TerminalAnnouncer,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        orchestrator: Arc<Orchestrator>,
        hub: ProgressHub,
        notifier: Arc<dyn TerminalNotifier>,
    ) -> Self {
        Self::with_config(store, orchestrator, hub, notifier, JobWorkerConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(
        store: Arc<dyn JobStore>,
        orchestrator: Arc<Orchestrator>,
        hub: ProgressHub,
        notifier: Arc<dyn TerminalNotifier>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            announcer: TerminalAnnouncer::new(hub.clone(), notifier),
            hub,
            config,
        }
    }

    pub fn config(&self) -> &JobWorkerConfig {
        &self.config
    }

    /// Handle for announcing jobs finished outside a dispatch.
    pub fn announcer(&self) -> TerminalAnnouncer {
        self.announcer.clone()
    }

    /// Handle one delivery of the "run this job" instruction.
    ///
    /// Safe to call any number of times for the same job: only the delivery
    /// that claims it runs the pipeline.
    pub async fn handle_dispatch(&self, job_id: Uuid) -> Result<DispatchOutcome> {
        let worker_id = self.config.worker_id.as_str();

        let job = match self
            .store
            .claim(job_id, worker_id, self.config.lease_duration)
            .await?
        {
            Claim::Claimed(job) => job,
            Claim::Duplicate(status) => {
                info!(job_id = %job_id, status = %status, "duplicate dispatch ignored");
                return Ok(DispatchOutcome::Duplicate(status));
            }
            Claim::NotFound => {
                warn!(job_id = %job_id, "dispatch for unknown job");
                return Ok(DispatchOutcome::NotFound);
            }
        };

        info!(job_id = %job_id, worker_id, attempt = job.attempts, "job claimed");

        // The budget runs from the first claim, so a lease takeover cannot
        // restart it.
        let elapsed = job
            .started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
            .unwrap_or_default();
        let budget = self.config.job_timeout.saturating_sub(elapsed);

        // Execute with heartbeat. The guard stops it even if this future is
        // dropped mid-run.
        let cancel = CancellationToken::new();
        let _stop_heartbeat = cancel.clone().drop_guard();
        let heartbeat = self.spawn_heartbeat(job_id, cancel.clone());

        let sink = JobProgressSink {
            store: self.store.clone(),
            hub: self.hub.clone(),
            job_id,
            worker_id: worker_id.to_string(),
        };
        let run = if budget.is_zero() {
            None
        } else {
            tokio::time::timeout(budget, self.orchestrator.run(job.request, &sink))
                .await
                .ok()
        };

        // Stop heartbeat
        cancel.cancel();
        let _ = heartbeat.await;

        let transition = match run {
            Some(Ok(result)) => {
                let content = GeneratedContent::from_run(&result);
                debug!(
                    job_id = %job_id,
                    tokens = result.totals.total_tokens,
                    warnings = result.warnings.len(),
                    "pipeline finished"
                );
                self.store
                    .complete(
                        job_id,
                        worker_id,
                        serde_json::to_value(&content)?,
                        result.warnings,
                    )
                    .await?
            }
            Some(Err(failure)) => {
                let reason = if failure.error.is_cancelled() {
                    super::job::CANCELLED_REASON.to_string()
                } else {
                    failure.error.to_string()
                };
                warn!(job_id = %job_id, stage = %failure.error.stage(), error = %reason, "pipeline aborted");
                self.store.fail(job_id, Some(worker_id), &reason).await?
            }
            None => {
                let reason = format!("job timed out after {:?}", self.config.job_timeout);
                error!(job_id = %job_id, "{}", reason);
                self.store.fail(job_id, Some(worker_id), &reason).await?
            }
        };

        match transition {
            Transition::Applied(job) => {
                let status = job.status;
                self.announce_terminal(&job).await;
                Ok(DispatchOutcome::Executed(status))
            }
            Transition::Stale(status) => {
                warn!(job_id = %job_id, status = %status, "job moved on before this run finished");
                Ok(DispatchOutcome::Duplicate(status))
            }
            Transition::NotFound => Ok(DispatchOutcome::NotFound),
        }
    }

    /// Publish the terminal event and fire the notifier without waiting.
    pub async fn announce_terminal(&self, job: &Job) {
        self.announcer.announce(job).await;
    }

    fn spawn_heartbeat(&self, job_id: Uuid, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let worker_id = self.config.worker_id.clone();
        let lease = self.config.lease_duration;
        let heartbeat_interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match store.heartbeat(job_id, &worker_id, lease).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!(job_id = %job_id, "lease lost");
                                break;
                            }
                            Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
        })
    }
}
