//! Job testing utilities.
//!
//! Notifier doubles for asserting on the terminal side-channel.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::notifier::TerminalNotifier;
use super::{Job, JobStatus};

/// Records every terminal notification.
#[derive(Default)]
pub struct RecordingNotifier {
    notified: Mutex<Vec<(Uuid, JobStatus)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all notifications received so far.
    pub fn notified(&self) -> Vec<(Uuid, JobStatus)> {
        self.notified
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TerminalNotifier for RecordingNotifier {
    async fn notify(&self, job: &Job) -> Result<()> {
        self.notified
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((job.id, job.status));
        Ok(())
    }
}

/// Fails every notification.
#[derive(Default)]
pub struct FailingNotifier;

#[async_trait]
impl TerminalNotifier for FailingNotifier {
    async fn notify(&self, _job: &Job) -> Result<()> {
        Err(anyhow!("notification sink unreachable"))
    }
}
