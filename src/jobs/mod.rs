//! Durable background job queue: a Redis list (`logsieve:jobs`) drained by a
//! fixed-size pool of Tokio workers blocking on `BRPOP`. The only two job
//! kinds are `process_ingestion` (parse + store events) and
//! `analyze_findings` (run the rule catalogue); the former enqueues the
//! latter only after its own transaction commits.

use std::sync::Arc;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::ingestion::JobStatus;
use crate::parser;
use crate::services::{blob_store, events, findings_engine};

const QUEUE_KEY: &str = "logsieve:jobs";
const BLOCK_TIMEOUT_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProcessIngestion,
    AnalyzeFindings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub kind: JobKind,
    pub ingestion_id: Uuid,
}

/// Thin wrapper over a `redis::Client` for LPUSH/BRPOP job transport.
#[derive(Clone)]
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Internal(format!("invalid redis url: {e}")))?;
        Ok(Self { client })
    }

    pub async fn enqueue(&self, job: &JobEnvelope) -> Result<(), AppError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| AppError::Internal(format!("failed to encode job: {e}")))?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("redis connection failed: {e}")))?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, payload)
            .await
            .map_err(|e| AppError::Internal(format!("redis lpush failed: {e}")))?;
        Ok(())
    }

    async fn dequeue_blocking(&self) -> Result<Option<JobEnvelope>, AppError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("redis connection failed: {e}")))?;
        let reply: Option<(String, String)> = conn
            .brpop(QUEUE_KEY, BLOCK_TIMEOUT_SECS)
            .await
            .map_err(|e| AppError::Internal(format!("redis brpop failed: {e}")))?;
        match reply {
            Some((_key, payload)) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|e| AppError::Internal(format!("failed to decode job: {e}"))),
            None => Ok(None),
        }
    }
}

/// Spawn `worker_count` Tokio tasks, each looping BRPOP -> dispatch forever.
pub fn spawn_worker_pool(
    pool: PgPool,
    queue: JobQueue,
    blob_store_root: Arc<str>,
    worker_count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count.max(1))
        .map(|worker_id| {
            let pool = pool.clone();
            let queue = queue.clone();
            let blob_store_root = blob_store_root.clone();
            tokio::spawn(async move {
                loop {
                    match queue.dequeue_blocking().await {
                        Ok(Some(job)) => {
                            if let Err(e) = dispatch(&pool, &queue, &blob_store_root, job).await {
                                tracing::error!(worker_id, error = %e, "job failed");
                            }
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::error!(worker_id, error = %e, "dequeue failed, backing off");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            })
        })
        .collect()
}

async fn dispatch(
    pool: &PgPool,
    queue: &JobQueue,
    blob_store_root: &str,
    job: JobEnvelope,
) -> Result<(), AppError> {
    match job.kind {
        JobKind::ProcessIngestion => process_ingestion(pool, queue, blob_store_root, job.ingestion_id).await,
        JobKind::AnalyzeFindings => analyze_findings(pool, job.ingestion_id).await,
    }
}

/// Parse the ingestion's stored blob into events and mark it done. Refuses
/// re-entry when `status` is already `processing` or `done` — a caller that
/// genuinely wants to redo the work must go through `reset_for_reprocessing`
/// first. On success, enqueues `analyze_findings` for the same ingestion.
pub async fn process_ingestion(
    pool: &PgPool,
    queue: &JobQueue,
    blob_store_root: &str,
    ingestion_id: Uuid,
) -> Result<(), AppError> {
    let status: JobStatus = sqlx::query_scalar("SELECT status FROM ingestions WHERE id = $1")
        .bind(ingestion_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingestion {ingestion_id} not found")))?;

    if matches!(status, JobStatus::Processing | JobStatus::Done) {
        return Err(AppError::Conflict(format!(
            "ingestion {ingestion_id} is already {status:?}"
        )));
    }

    sqlx::query("UPDATE ingestions SET status = $1 WHERE id = $2")
        .bind(JobStatus::Processing)
        .bind(ingestion_id)
        .execute(pool)
        .await?;

    let result = run_parse_and_store(pool, blob_store_root, ingestion_id).await;

    let final_status = if result.is_ok() { JobStatus::Done } else { JobStatus::Failed };
    sqlx::query("UPDATE ingestions SET status = $1 WHERE id = $2")
        .bind(final_status)
        .bind(ingestion_id)
        .execute(pool)
        .await?;

    result?;

    queue
        .enqueue(&JobEnvelope {
            kind: JobKind::AnalyzeFindings,
            ingestion_id,
        })
        .await
}

async fn run_parse_and_store(
    pool: &PgPool,
    blob_store_root: &str,
    ingestion_id: Uuid,
) -> Result<(), AppError> {
    let text = blob_store::get(blob_store_root, ingestion_id).await?;
    let records = parser::parse_logs(&text);
    events::insert_batch(pool, ingestion_id, &records).await
}

/// Run the rule catalogue against the ingestion's events and replace its
/// findings. Idempotent: a re-run with unchanged events yields identical rows.
pub async fn analyze_findings(pool: &PgPool, ingestion_id: Uuid) -> Result<(), AppError> {
    findings_engine::analyze_ingestion(pool, ingestion_id).await
}

/// Delete an ingestion's events (and transitively its findings, via cascade)
/// and reset both status fields to `pending`, so `process_ingestion` can run
/// again. Internal only — no HTTP route calls this directly.
pub async fn reset_for_reprocessing(pool: &PgPool, ingestion_id: Uuid) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM log_events WHERE ingestion_id = $1")
        .bind(ingestion_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM findings WHERE ingestion_id = $1")
        .bind(ingestion_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE ingestions SET status = $1, finding_status = $1 WHERE id = $2")
        .bind(JobStatus::Pending)
        .bind(ingestion_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}
