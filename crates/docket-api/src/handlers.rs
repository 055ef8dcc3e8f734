//! Route handlers and their request/response payloads
//!
//! Payload field names are camelCase to match the callers this service
//! fronts; the storage records keep their own shapes.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use docket_core::{
    IngestOptions, IngestStatus, IngestionJob, JobId, JobStatus, JobTransition, Requester, Stage,
    ThreadId, Upload, UploadId, WorkspaceId,
};

use crate::error::ApiError;
use crate::secret;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUploadRequest {
    pub workspace_id: Uuid,
    /// Data-root-relative path of the already-stored file.
    pub storage_path: String,
    pub media_type: Option<String>,
    pub thread_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: UploadId,
    pub workspace_id: WorkspaceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    pub storage_path: String,
    pub media_type: String,
    pub ingest_status: IngestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Upload> for UploadResponse {
    fn from(upload: Upload) -> Self {
        Self {
            id: upload.id,
            workspace_id: upload.workspace_id,
            thread_id: upload.thread_id,
            storage_path: upload.storage_path,
            media_type: upload.media_type,
            ingest_status: upload.ingest_status,
            created_at: upload.created_at,
            updated_at: upload.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub workspace_id: Uuid,
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub options: IngestOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: JobId,
    pub upload_id: UploadId,
    pub stage: Stage,
    pub status: JobStatus,
    pub detail: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<IngestionJob> for JobResponse {
    fn from(job: IngestionJob) -> Self {
        Self {
            id: job.id,
            upload_id: job.upload_id,
            stage: job.stage,
            status: job.status,
            detail: job.detail,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Status report pushed by an external worker for a job it ran.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub status: JobStatus,
    pub stage: Option<Stage>,
    pub detail: Option<Map<String, Value>>,
    pub ingest_status: Option<IngestStatus>,
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn readiness_check() -> impl IntoResponse {
    Json(json!({ "status": "ready" }))
}

/// Register an upload record for an already-stored file.
pub async fn register_upload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterUploadRequest>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    if request.storage_path.trim().is_empty() {
        return Err(ApiError::Validation(
            "Storage path must not be empty".to_string(),
        ));
    }

    let media_type = request
        .media_type
        .filter(|media| !media.trim().is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(&request.storage_path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

    let mut upload = Upload::new(
        WorkspaceId::from_uuid(request.workspace_id),
        request.storage_path,
        media_type,
    );
    if let Some(thread_id) = request.thread_id {
        upload = upload.with_thread(ThreadId::from_uuid(thread_id));
    }
    state.uploads.create(&upload).await?;

    info!(
        upload_id = %upload.id,
        workspace_id = %upload.workspace_id,
        media_type = %upload.media_type,
        "Upload registered"
    );
    Ok((StatusCode::CREATED, Json(upload.into())))
}

/// Submit an ingestion run for an upload.
pub async fn submit_ingest(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<Uuid>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut requester = Requester::new(WorkspaceId::from_uuid(request.workspace_id));
    if let Some(user_id) = request.user_id {
        requester = requester.with_user(user_id);
    }

    let job_id = state
        .dispatcher
        .submit(UploadId::from_uuid(upload_id), &requester, request.options)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}

/// All jobs for an upload, most recent first.
pub async fn list_upload_jobs(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<Uuid>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let upload_id = UploadId::from_uuid(upload_id);
    state.uploads.get(upload_id).await?;
    let jobs = state.jobs.list_by_upload(upload_id).await?;
    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.jobs.get(JobId::from_uuid(job_id)).await?;
    Ok(Json(job.into()))
}

/// External confirmation that an upload's content is searchable.
pub async fn mark_indexed(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<UploadResponse>, ApiError> {
    secret::require_secret(&state.config.callback, &headers)?;

    let upload_id = UploadId::from_uuid(upload_id);
    state
        .uploads
        .set_ingest_status(upload_id, IngestStatus::Indexed)
        .await?;
    let upload = state.uploads.get(upload_id).await?;
    info!(upload_id = %upload_id, "Upload marked indexed");
    Ok(Json(upload.into()))
}

/// Apply a status report from an external worker to a job record.
///
/// Uses the same transition semantics as the in-process executor:
/// `running` stamps `started_at` on first touch, terminal statuses stamp
/// `completed_at`, and the detail patch merges additively.
pub async fn job_callback(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<CallbackRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    secret::require_secret(&state.config.callback, &headers)?;

    let job_id = JobId::from_uuid(job_id);
    let mut transition = JobTransition::new().with_status(request.status);
    if let Some(stage) = request.stage {
        transition = transition.with_stage(stage);
    }
    if let Some(detail) = request.detail {
        transition = transition.with_detail_patch(detail);
    }
    transition = match request.status {
        JobStatus::Running => transition.mark_started(),
        JobStatus::Completed | JobStatus::Failed => transition.mark_completed(),
        JobStatus::Queued => transition,
    };

    let job = state.jobs.transition(job_id, transition).await?;
    if let Some(ingest_status) = request.ingest_status {
        state
            .uploads
            .set_ingest_status(job.upload_id, ingest_status)
            .await?;
    }

    info!(job_id = %job_id, status = %job.status, "External callback applied");
    Ok(Json(job.into()))
}
