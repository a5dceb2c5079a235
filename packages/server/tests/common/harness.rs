//! In-process job harness: memory store, in-process queue, recording notifier.
//!
//! Everything runs on the test's own runtime. With the default
//! current-thread runtime an async submit returns before the worker task
//! gets to run, so the `queued` state is observable.

use std::sync::Arc;
use std::time::Duration;

use generation_core::domains::pipeline::{Orchestrator, PipelineStage};
use generation_core::kernel::jobs::testing::RecordingNotifier;
use generation_core::kernel::jobs::{
    InProcessQueue, Job, JobManager, JobStatus, JobWorker, JobWorkerConfig, MemoryJobStore,
    QueueFallback, TerminalNotifier,
};
use generation_core::kernel::ProgressHub;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_ATTEMPTS: usize = 500;

pub fn init_tracing() {
    // Run tests with: RUST_LOG=debug cargo test -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct HarnessOptions {
    pub fallback: QueueFallback,
    pub job_timeout: Duration,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    /// Replaces the recording notifier.
    pub notifier: Option<Arc<dyn TerminalNotifier>>,
    pub worker_id: String,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            fallback: QueueFallback::Inline,
            job_timeout: Duration::from_secs(60),
            lease_duration: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(20),
            notifier: None,
            worker_id: "test-worker".to_string(),
        }
    }
}

pub struct TestHarness {
    pub store: Arc<MemoryJobStore>,
    pub hub: ProgressHub,
    pub notifier: Arc<RecordingNotifier>,
    pub worker: Arc<JobWorker>,
    pub queue: Arc<InProcessQueue>,
    pub manager: Arc<JobManager>,
}

impl TestHarness {
    pub fn new(stages: Vec<PipelineStage>) -> Self {
        Self::with_options(stages, HarnessOptions::default())
    }

    pub fn with_options(stages: Vec<PipelineStage>, options: HarnessOptions) -> Self {
        Self::with_orchestrator(Orchestrator::new(stages), options)
    }

    pub fn with_orchestrator(orchestrator: Orchestrator, options: HarnessOptions) -> Self {
        init_tracing();

        let store = Arc::new(MemoryJobStore::new());
        let hub = ProgressHub::new();
        let recording = Arc::new(RecordingNotifier::new());
        let notifier: Arc<dyn TerminalNotifier> = match options.notifier {
            Some(notifier) => notifier,
            None => recording.clone(),
        };

        let config = JobWorkerConfig {
            job_timeout: options.job_timeout,
            lease_duration: options.lease_duration,
            heartbeat_interval: options.heartbeat_interval,
            ..JobWorkerConfig::with_worker_id(options.worker_id)
        };
        let worker = Arc::new(JobWorker::with_config(
            store.clone(),
            Arc::new(orchestrator),
            hub.clone(),
            notifier,
            config,
        ));
        let queue = Arc::new(InProcessQueue::new(worker.clone()));
        let manager = Arc::new(JobManager::new(
            store.clone(),
            queue.clone(),
            worker.clone(),
            options.fallback,
        ));

        Self {
            store,
            hub,
            notifier: recording,
            worker,
            queue,
            manager,
        }
    }

    /// Poll until the job reaches a terminal status.
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> Job {
        for _ in 0..POLL_ATTEMPTS {
            let job = self.manager.get_status(job_id).await.unwrap();
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        panic!("job {job_id} never reached a terminal status");
    }

    pub async fn wait_for_status(&self, job_id: Uuid, status: JobStatus) -> Job {
        for _ in 0..POLL_ATTEMPTS {
            let job = self.manager.get_status(job_id).await.unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        panic!("job {job_id} never reached {status}");
    }

    /// Poll until the recording notifier has seen `count` notifications.
    pub async fn wait_for_notifications(&self, count: usize) -> Vec<(Uuid, JobStatus)> {
        for _ in 0..POLL_ATTEMPTS {
            let notified = self.notifier.notified();
            if notified.len() >= count {
                return notified;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        panic!("expected {count} notifications, got {:?}", self.notifier.notified());
    }
}
