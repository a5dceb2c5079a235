//! PostgreSQL-backed job store.
//!
//! Claims use a single conditional `UPDATE ... RETURNING` that also recovers
//! jobs whose lease has expired. Other transitions lock the row with
//! `SELECT ... FOR UPDATE` and apply the same [`Job`] methods the in-memory
//! store uses, so both stores share one set of rules.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::job::{CancelOutcome, Job, JobStatus, ProgressOutcome};
use super::store::{transition, Claim, JobStore, Transition};
use crate::domains::generation::GenerationRequest;
use crate::domains::pipeline::{ProgressUpdate, StageKind};

const COLUMNS: &str = r#"
    id, request, status, progress_percentage, current_stage, progress_updates,
    estimated_time_remaining, result, error_message, warnings, worker_id,
    lease_expires_at, cancel_requested, attempts, created_at, started_at,
    completed_at, updated_at
"#;

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    request: Json<GenerationRequest>,
    status: JobStatus,
    progress_percentage: i16,
    current_stage: Option<String>,
    progress_updates: Json<Vec<ProgressUpdate>>,
    estimated_time_remaining: Option<i64>,
    result: Option<Value>,
    error_message: Option<String>,
    warnings: Json<Vec<String>>,
    worker_id: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    cancel_requested: bool,
    attempts: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let current_stage = row
            .current_stage
            .map(|stage| serde_json::from_value::<StageKind>(Value::String(stage)))
            .transpose()
            .context("unknown current_stage")?;

        Ok(Job {
            id: row.id,
            request: row.request.0,
            status: row.status,
            progress_percentage: row.progress_percentage.clamp(0, 100) as u8,
            current_stage,
            progress_updates: row.progress_updates.0,
            estimated_time_remaining: row.estimated_time_remaining.map(|secs| secs.max(0) as u64),
            result: row.result,
            error_message: row.error_message,
            warnings: row.warnings.0,
            worker_id: row.worker_id,
            lease_expires_at: row.lease_expires_at,
            cancel_requested: row.cancel_requested,
            attempts: row.attempts.max(0) as u32,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {COLUMNS} FROM generation_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn write(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = $2,
                progress_percentage = $3,
                current_stage = $4,
                progress_updates = $5,
                estimated_time_remaining = $6,
                result = $7,
                error_message = $8,
                warnings = $9,
                worker_id = $10,
                lease_expires_at = $11,
                cancel_requested = $12,
                attempts = $13,
                started_at = $14,
                completed_at = $15,
                updated_at = $16
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status)
        .bind(i16::from(job.progress_percentage))
        .bind(job.current_stage.map(|stage| stage.as_str()))
        .bind(Json(&job.progress_updates))
        .bind(job.estimated_time_remaining.map(|secs| secs as i64))
        .bind(&job.result)
        .bind(&job.error_message)
        .bind(Json(&job.warnings))
        .bind(&job.worker_id)
        .bind(job.lease_expires_at)
        .bind(job.cancel_requested)
        .bind(job.attempts as i32)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Run `f` against the row-locked job and persist it if `f` changed it.
    async fn modify<T, F>(&self, id: Uuid, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> T + Send,
        T: Send,
    {
        let mut tx = self.pool.begin().await?;
        let Some(mut job) = Self::fetch_for_update(&mut tx, id).await? else {
            return Ok(None);
        };

        let before = job.clone();
        let outcome = f(&mut job, Utc::now());
        if job != before {
            Self::write(&mut tx, &job).await?;
        }
        tx.commit().await?;

        Ok(Some(outcome))
    }

    async fn status_of(&self, id: Uuid) -> Result<Option<JobStatus>> {
        let status = sqlx::query_scalar::<_, JobStatus>(
            "SELECT status FROM generation_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs (
                id, request, status, progress_percentage, progress_updates,
                warnings, cancel_requested, attempts, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(Json(&job.request))
        .bind(job.status)
        .bind(i16::from(job.progress_percentage))
        .bind(Json(&job.progress_updates))
        .bind(Json(&job.warnings))
        .bind(job.cancel_requested)
        .bind(job.attempts as i32)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert job {}", job.id))?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {COLUMNS} FROM generation_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn mark_queued(&self, id: Uuid) -> Result<Transition> {
        Ok(self
            .modify(id, |job, now| {
                let applied = job.mark_queued(now);
                transition(job, applied)
            })
            .await?
            .unwrap_or(Transition::NotFound))
    }

    async fn claim(&self, id: Uuid, worker_id: &str, lease: Duration) -> Result<Claim> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE generation_jobs
            SET status = 'processing',
                worker_id = $2,
                lease_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                started_at = COALESCE(started_at, NOW()),
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = $1
              AND (
                status IN ('pending', 'queued')
                OR (status = 'processing' AND (lease_expires_at IS NULL OR lease_expires_at <= NOW()))
              )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(worker_id)
        .bind(lease.as_millis().to_string())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Claim::Claimed(Job::try_from(row)?));
        }

        Ok(match self.status_of(id).await? {
            Some(status) => Claim::Duplicate(status),
            None => Claim::NotFound,
        })
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str, lease: Duration) -> Result<bool> {
        let extended = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'processing' AND worker_id = $3
            "#,
        )
        .bind(lease.as_millis().to_string())
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(extended > 0)
    }

    async fn record_progress(
        &self,
        id: Uuid,
        worker_id: &str,
        update: &ProgressUpdate,
    ) -> Result<ProgressOutcome> {
        Ok(self
            .modify(id, |job, now| job.record_progress(worker_id, update, now))
            .await?
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
            .await?
            .unwrap_or(Transition::NotFound))
    }

    async fn fail(&self, id: Uuid, worker_id: Option<&str>, reason: &str) -> Result<Transition> {
        Ok(self
            .modify(id, |job, now| {
                let applied = job.fail(worker_id, reason, now);
                transition(job, applied)
            })
            .await?
            .unwrap_or(Transition::NotFound))
    }

    async fn request_cancel(&self, id: Uuid) -> Result<CancelOutcome> {
        Ok(self
            .modify(id, |job, now| job.request_cancel(now))
            .await?
            .unwrap_or(CancelOutcome::NotFound))
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let purged = sqlx::query(
            r#"
            DELETE FROM generation_jobs
            WHERE status IN ('completed', 'failed') AND completed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(purged)
    }
}
