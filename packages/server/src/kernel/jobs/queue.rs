//! Task queue adapters.
//!
//! A queue accepts a [`DispatchMessage`] and delivers it to a worker at least
//! once. `enqueue` returning `Ok` means delivery was accepted, never that it
//! finished; the job is only marked queued after that.
//!
//! - [`InProcessQueue`] - hands the job to a local [`JobWorker`] task
//! - [`HttpTaskQueue`] - POSTs to the worker endpoint with backoff until acked

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notifier::TerminalAnnouncer;
use super::store::{JobStore, Transition};
use super::worker::JobWorker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue unavailable: {0}")]
    Unavailable(String),
}

/// The "run this job" instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub job_id: Uuid,
}

impl DispatchMessage {
    pub fn new(job_id: Uuid) -> Self {
        Self { job_id }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, message: DispatchMessage) -> Result<(), QueueError>;
}

// ============================================================================
// In-process queue
// ============================================================================

/// Runs each job on a spawned task of this process.
pub struct InProcessQueue {
    worker: Arc<JobWorker>,
    closed: AtomicBool,
}

impl InProcessQueue {
    pub fn new(worker: Arc<JobWorker>) -> Self {
        Self {
            worker,
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting work. Later enqueues fail with `Unavailable`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, message: DispatchMessage) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("queue is closed".to_string()));
        }

        let worker = self.worker.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.handle_dispatch(message.job_id).await {
                error!(job_id = %message.job_id, error = %e, "dispatch failed");
            }
        });

        Ok(())
    }
}

// ============================================================================
// HTTP queue
// ============================================================================

/// Retry policy for HTTP delivery.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Give up and fail the job once this much time has passed.
    pub retry_window: Duration,
    /// Per-attempt timeout; the worker acks only once the run is over.
    pub request_timeout: Duration,
    /// Deliveries in flight at once.
    pub max_in_flight: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            retry_window: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(16 * 60),
            max_in_flight: 64,
        }
    }
}

/// Delivers dispatch messages to the worker endpoint over HTTP.
pub struct HttpTaskQueue {
    client: reqwest::Client,
    endpoint: String,
    store: Arc<dyn JobStore>,
    announcer: TerminalAnnouncer,
    policy: DeliveryPolicy,
    permits: Arc<Semaphore>,
}

impl HttpTaskQueue {
    /// `announcer` reports jobs failed because delivery never succeeded.
    pub fn new(
        endpoint: impl Into<String>,
        store: Arc<dyn JobStore>,
        announcer: TerminalAnnouncer,
        policy: DeliveryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            store,
            announcer,
            permits: Arc::new(Semaphore::new(policy.max_in_flight)),
            policy,
        })
    }
}

struct Delivery {
    client: reqwest::Client,
    endpoint: String,
    store: Arc<dyn JobStore>,
    announcer: TerminalAnnouncer,
    policy: DeliveryPolicy,
}

async fn deliver(delivery: Delivery, message: DispatchMessage) {
    let Delivery {
        client,
        endpoint,
        store,
        announcer,
        policy,
    } = delivery;
    let job_id = message.job_id;
    let deadline = tokio::time::Instant::now() + policy.retry_window;
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match client.post(&endpoint).json(&message).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(job_id = %job_id, attempt, "dispatch acknowledged");
                return;
            }
            Ok(response) => {
                warn!(job_id = %job_id, attempt, status = %response.status(), "dispatch not acknowledged");
            }
            Err(e) => {
                warn!(job_id = %job_id, attempt, error = %e, "dispatch request failed");
            }
        }

        if tokio::time::Instant::now() + backoff > deadline {
            break;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(policy.max_backoff);
    }

    let reason = format!("dispatch not acknowledged within {:?}", policy.retry_window);
    match store.fail(job_id, None, &reason).await {
        Ok(Transition::Applied(job)) => {
            error!(job_id = %job_id, attempts = attempt, "{}", reason);
            announcer.announce(&job).await;
        }
        Ok(_) => info!(job_id = %job_id, "delivery gave up after a worker claimed the job"),
        Err(e) => error!(job_id = %job_id, error = %e, "failed to mark undelivered job as failed"),
    }
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    async fn enqueue(&self, message: DispatchMessage) -> Result<(), QueueError> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| QueueError::Unavailable("dispatch capacity exhausted".to_string()))?;

        let delivery = Delivery {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            store: self.store.clone(),
            announcer: self.announcer.clone(),
            policy: self.policy.clone(),
        };

        tokio::spawn(async move {
            deliver(delivery, message).await;
            drop(permit);
        });

        Ok(())
    }
}
