//! Job infrastructure for background generation runs.
//!
//! - [`Job`] - job model and its lifecycle transitions
//! - [`JobStore`] - persistence ([`MemoryJobStore`], [`PostgresJobStore`])
//! - [`JobManager`] - submit, status, cancel, purge
//! - [`TaskQueue`] - at-least-once delivery ([`InProcessQueue`], [`HttpTaskQueue`])
//! - [`JobWorker`] - executes one dispatched job
//!
//! # Architecture
//!
//! ```text
//! JobManager.submit(request)
//!     │
//!     ├─► store.insert(pending)
//!     ├─► sync:  JobWorker.handle_dispatch() inline
//!     └─► async: TaskQueue.enqueue() ── accepted ──► store.mark_queued()
//!                     │
//!                     └─► JobWorker.handle_dispatch()   (one or more times)
//!                             ├─► claim (duplicates no-op)
//!                             ├─► Orchestrator.run()
//!                             └─► complete / fail
//! ```

mod job;
pub mod manager;
mod notifier;
mod postgres;
mod queue;
mod store;
pub mod testing;
mod worker;

pub use job::{CancelOutcome, Job, JobStatus, ProgressOutcome, CANCELLED_REASON};
pub use manager::{JobError, JobManager, QueueFallback};
pub use notifier::{LogNotifier, TerminalAnnouncer, TerminalNotifier, WebhookNotifier};
pub use postgres::PostgresJobStore;
pub use queue::{
    DeliveryPolicy, DispatchMessage, HttpTaskQueue, InProcessQueue, QueueError, TaskQueue,
};
pub use store::{Claim, JobStore, MemoryJobStore, Transition};
pub use worker::{DispatchOutcome, JobWorker, JobWorkerConfig};
