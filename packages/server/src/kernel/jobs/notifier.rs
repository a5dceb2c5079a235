//! Terminal-state notifications.
//!
//! Invoked fire-and-forget once a job becomes terminal. A failing notifier is
//! logged and otherwise ignored; it never changes the job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use super::Job;
use crate::kernel::stream_hub::{JobEvent, ProgressHub};

#[async_trait]
pub trait TerminalNotifier: Send + Sync {
    async fn notify(&self, job: &Job) -> Result<()>;
}

/// Publishes the terminal event and fires the notifier.
///
/// Shared by every path that can finish a job: the worker, cancellation,
/// queue rejection and undelivered HTTP dispatches.
#[derive(Clone)]
pub struct TerminalAnnouncer {
    hub: ProgressHub,
    notifier: Arc<dyn TerminalNotifier>,
}

impl TerminalAnnouncer {
    pub fn new(hub: ProgressHub, notifier: Arc<dyn TerminalNotifier>) -> Self {
        Self { hub, notifier }
    }

    /// Subscribers get the terminal event before this returns; the notifier
    /// runs on its own task.
    pub async fn announce(&self, job: &Job) {
        self.hub
            .publish(
                job.id,
                JobEvent::Terminal {
                    status: job.status,
                    error_message: job.error_message.clone(),
                },
            )
            .await;

        let notifier = self.notifier.clone();
        let job = job.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&job).await {
                warn!(job_id = %job.id, error = %e, "terminal notification failed");
            }
        });
    }
}

/// Writes a structured log line per terminal job.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl TerminalNotifier for LogNotifier {
    async fn notify(&self, job: &Job) -> Result<()> {
        info!(
            job_id = %job.id,
            status = %job.status,
            error = job.error_message.as_deref().unwrap_or(""),
            warnings = job.warnings.len(),
            "job finished"
        );
        Ok(())
    }
}

/// POSTs a small summary of the terminal job to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TerminalNotifier for WebhookNotifier {
    async fn notify(&self, job: &Job) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&json!({
                "job_id": job.id,
                "status": job.status,
                "error_message": job.error_message,
                "warnings": job.warnings,
                "completed_at": job.completed_at,
            }))
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected notification")?;

        Ok(())
    }
}
