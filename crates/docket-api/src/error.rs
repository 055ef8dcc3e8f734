//! API error mapping
//!
//! One enum covers every way a handler can fail; `IntoResponse` turns it
//! into a JSON body with the matching status code. Conversions from the
//! lower layers keep handlers on plain `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use docket_core::{CoreError, JobId, UploadId};
use docket_pipeline::PipelineError;
use docket_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("An ingestion job is already active for upload {upload_id}")]
    Conflict {
        upload_id: UploadId,
        existing_job_id: Option<JobId>,
    },

    /// The guarded routes are disabled because no secret is configured.
    #[error("Callback routes are disabled")]
    Forbidden,

    #[error("Invalid or missing secret")]
    Unauthorized,

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(detail) => {
                error!(detail = %detail, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut body = json!({ "error": self.to_string() });
        if let ApiError::Conflict {
            existing_job_id: Some(job_id),
            ..
        } = &self
        {
            body["existingJobId"] = json!(job_id);
        }
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::ActiveJobExists {
                upload_id,
                existing_job_id,
            } => ApiError::Conflict {
                upload_id,
                existing_job_id,
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(message) => ApiError::Validation(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Store(store) => store.into(),
            PipelineError::Core(core) => core.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
