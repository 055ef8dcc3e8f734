//! Store contracts shared by every backend

use async_trait::async_trait;

use docket_core::{IngestStatus, IngestionJob, JobId, JobTransition, Upload, UploadId};

use crate::Result;

/// Persistence contract for ingestion job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    ///
    /// Fails with [`crate::StoreError::ActiveJobExists`] if the upload
    /// already has a queued or running job; the check and the insert are
    /// atomic in every backend.
    async fn create(&self, job: &IngestionJob) -> Result<()>;

    /// Apply one transition as a single read-modify-write and return the
    /// updated record.
    async fn transition(&self, job_id: JobId, transition: JobTransition) -> Result<IngestionJob>;

    async fn get(&self, job_id: JobId) -> Result<IngestionJob>;

    /// All jobs for an upload, most recent first.
    async fn list_by_upload(&self, upload_id: UploadId) -> Result<Vec<IngestionJob>>;

    /// The queued or running job for an upload, if any.
    async fn find_active(&self, upload_id: UploadId) -> Result<Option<IngestionJob>>;
}

/// Persistence contract for upload records.
///
/// The pipeline only ever writes `ingest_status`; everything else on an
/// upload is owned by whatever received the file.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn create(&self, upload: &Upload) -> Result<()>;

    async fn get(&self, upload_id: UploadId) -> Result<Upload>;

    /// Set the ingest status, stamping `updated_at` in the same write.
    async fn set_ingest_status(&self, upload_id: UploadId, status: IngestStatus) -> Result<()>;
}
