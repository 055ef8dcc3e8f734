//! Job dispatcher
//!
//! Front door of the pipeline: validates a submission, creates the job
//! record, and hands the run to a background task. A semaphore caps how
//! many jobs execute at once; submissions beyond the cap queue on the
//! permit, not in an external broker.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::info;

use docket_core::{
    CoreError, DocketConfig, IngestOptions, IngestStatus, IngestionJob, JobId, Requester, UploadId,
};
use docket_store::{JobStore, StoreError, UploadStore};

use crate::executor::PipelineExecutor;
use crate::invoker::ToolInvoker;
use crate::Result;

/// Accepts ingestion submissions and runs them on background tasks.
///
/// Cloning is cheap; all clones share the same permit pool and task
/// tracker, so a server can keep one per handler.
#[derive(Clone)]
pub struct JobDispatcher {
    config: Arc<DocketConfig>,
    jobs: Arc<dyn JobStore>,
    uploads: Arc<dyn UploadStore>,
    executor: Arc<PipelineExecutor>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl JobDispatcher {
    pub fn new(
        config: Arc<DocketConfig>,
        jobs: Arc<dyn JobStore>,
        uploads: Arc<dyn UploadStore>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        let executor = Arc::new(PipelineExecutor::new(
            config.clone(),
            jobs.clone(),
            uploads.clone(),
            invoker,
        ));
        let max_jobs = config.pipeline.max_concurrent_jobs.max(1);
        Self {
            config,
            jobs,
            uploads,
            executor,
            permits: Arc::new(Semaphore::new(max_jobs)),
            tracker: TaskTracker::new(),
        }
    }

    /// Validate and queue one ingestion run, returning the new job id.
    ///
    /// The job exists in the store with status `queued` before this
    /// returns; execution happens on a tracked background task. At most
    /// one non-terminal job may exist per upload.
    pub async fn submit(
        &self,
        upload_id: UploadId,
        requester: &Requester,
        options: IngestOptions,
    ) -> Result<JobId> {
        let upload = self.uploads.get(upload_id).await?;
        if upload.workspace_id != requester.workspace_id {
            return Err(CoreError::validation(format!(
                "Upload {} does not belong to workspace {}",
                upload_id, requester.workspace_id
            ))
            .into());
        }

        let sanitized = options.sanitize(&self.config.pipeline.splitter_settings())?;

        // Early check for a friendly error; the store constraint still
        // closes the race between two concurrent submissions.
        if let Some(existing) = self.jobs.find_active(upload_id).await? {
            return Err(StoreError::ActiveJobExists {
                upload_id,
                existing_job_id: Some(existing.id),
            }
            .into());
        }

        let job = IngestionJob::new(upload_id).with_request(serde_json::to_value(&sanitized)?);
        let job_id = job.id;
        self.jobs.create(&job).await?;
        self.uploads
            .set_ingest_status(upload_id, IngestStatus::Processing)
            .await?;
        info!(job_id = %job_id, upload_id = %upload_id, "Ingestion job queued");

        let executor = self.executor.clone();
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            // Acquired inside the task so the submitter never waits on
            // the concurrency cap.
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                // A closed semaphore means the process is shutting down.
                Err(_) => return,
            };
            executor.run(job_id, upload, sanitized).await;
        });

        Ok(job_id)
    }

    /// Wait for every dispatched job to reach a terminal state.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        info!("Job dispatcher drained");
    }
}
