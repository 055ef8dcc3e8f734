//! Postgres store backends
//!
//! The one-active-job-per-upload invariant is enforced by a partial unique
//! index on `ingestion_jobs (upload_id)` covering the queued and running
//! statuses; `create` maps that violation to
//! [`StoreError::ActiveJobExists`]. Transitions lock the row (`SELECT ...
//! FOR UPDATE`), apply the merge in Rust, and write back in the same
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use docket_core::{
    IngestStatus, IngestionJob, JobId, JobTransition, ThreadId, Upload, UploadId, WorkspaceId,
};

use crate::store::{JobStore, UploadStore};
use crate::{Result, StoreError};

const ACTIVE_JOB_CONSTRAINT: &str = "uq_ingestion_jobs_active";

const JOB_COLUMNS: &str =
    "id, upload_id, stage, status, detail, created_at, started_at, completed_at";

/// Postgres-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    upload_id: Uuid,
    stage: String,
    status: String,
    detail: Value,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn into_job(self) -> Result<IngestionJob> {
        Ok(IngestionJob {
            id: JobId::from_uuid(self.id),
            upload_id: UploadId::from_uuid(self.upload_id),
            stage: self.stage.parse()?,
            status: self.status.parse()?,
            detail: match self.detail {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &IngestionJob) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO ingestion_jobs \
             (id, upload_id, stage, status, detail, created_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(job.id.as_uuid())
        .bind(job.upload_id.as_uuid())
        .bind(job.stage.as_str())
        .bind(job.status.as_str())
        .bind(Value::Object(job.detail.clone()))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err, ACTIVE_JOB_CONSTRAINT) => {
                // The winner may have reached a terminal status by the time
                // we look it up, so the conflicting id is best-effort.
                let existing = self.find_active(job.upload_id).await?;
                Err(StoreError::ActiveJobExists {
                    upload_id: job.upload_id,
                    existing_job_id: existing.map(|j| j.id),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn transition(&self, job_id: JobId, transition: JobTransition) -> Result<IngestionJob> {
        let mut tx = self.pool.begin().await?;

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let mut job = row
            .ok_or_else(|| StoreError::NotFound(format!("Ingestion job {}", job_id)))?
            .into_job()?;
        transition.apply_to(&mut job, Utc::now());

        sqlx::query(
            "UPDATE ingestion_jobs \
             SET stage = $2, status = $3, detail = $4, started_at = $5, completed_at = $6 \
             WHERE id = $1",
        )
        .bind(job.id.as_uuid())
        .bind(job.stage.as_str())
        .bind(job.status.as_str())
        .bind(Value::Object(job.detail.clone()))
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            job_id = %job.id,
            status = %job.status,
            stage = %job.stage,
            "Job transition committed"
        );

        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<IngestionJob> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = $1"))
                .bind(job_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("Ingestion job {}", job_id)))?
            .into_job()
    }

    async fn list_by_upload(&self, upload_id: UploadId) -> Result<Vec<IngestionJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs \
             WHERE upload_id = $1 ORDER BY created_at DESC"
        ))
        .bind(upload_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_active(&self, upload_id: UploadId) -> Result<Option<IngestionJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs \
             WHERE upload_id = $1 AND status IN ('queued', 'running') \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(upload_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).transpose()
    }
}

/// Postgres-backed upload store.
#[derive(Clone)]
pub struct PgUploadStore {
    pool: PgPool,
}

impl PgUploadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UploadRow {
    id: Uuid,
    workspace_id: Uuid,
    thread_id: Option<Uuid>,
    storage_path: String,
    media_type: String,
    ingest_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UploadRow {
    fn into_upload(self) -> Result<Upload> {
        Ok(Upload {
            id: UploadId::from_uuid(self.id),
            workspace_id: WorkspaceId::from_uuid(self.workspace_id),
            thread_id: self.thread_id.map(ThreadId::from_uuid),
            storage_path: self.storage_path,
            media_type: self.media_type,
            ingest_status: self.ingest_status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl UploadStore for PgUploadStore {
    async fn create(&self, upload: &Upload) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO uploads \
             (id, workspace_id, thread_id, storage_path, media_type, ingest_status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(upload.id.as_uuid())
        .bind(upload.workspace_id.as_uuid())
        .bind(upload.thread_id.as_ref().map(|t| *t.as_uuid()))
        .bind(&upload.storage_path)
        .bind(&upload.media_type)
        .bind(upload.ingest_status.as_str())
        .bind(upload.created_at)
        .bind(upload.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err, "uploads_pkey") => {
                Err(StoreError::AlreadyExists(format!("Upload {}", upload.id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, upload_id: UploadId) -> Result<Upload> {
        let row: Option<UploadRow> = sqlx::query_as(
            "SELECT id, workspace_id, thread_id, storage_path, media_type, ingest_status, \
             created_at, updated_at FROM uploads WHERE id = $1",
        )
        .bind(upload_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("Upload {}", upload_id)))?
            .into_upload()
    }

    async fn set_ingest_status(&self, upload_id: UploadId, status: IngestStatus) -> Result<()> {
        // One statement sets the status and stamps the update time together.
        let result =
            sqlx::query("UPDATE uploads SET ingest_status = $2, updated_at = NOW() WHERE id = $1")
                .bind(upload_id.as_uuid())
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Upload {}", upload_id)));
        }
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err.as_database_error() {
        Some(db) => db.code().as_deref() == Some("23505") && db.constraint() == Some(constraint),
        None => false,
    }
}
