//! In-memory store backends for dev mode and tests

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use docket_core::{IngestStatus, IngestionJob, JobId, JobTransition, Upload, UploadId};

use crate::store::{JobStore, UploadStore};
use crate::{Result, StoreError};

/// In-memory job store.
///
/// All jobs live behind a single lock: `create` checks the active-job
/// invariant and inserts under one write guard, which is what makes the
/// duplicate-submission race impossible here.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, IngestionJob>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &IngestionJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs
            .values()
            .find(|j| j.upload_id == job.upload_id && j.is_active())
        {
            return Err(StoreError::ActiveJobExists {
                upload_id: job.upload_id,
                existing_job_id: Some(existing.id),
            });
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn transition(&self, job_id: JobId, transition: JobTransition) -> Result<IngestionJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("Ingestion job {}", job_id)))?;
        transition.apply_to(job, Utc::now());
        Ok(job.clone())
    }

    async fn get(&self, job_id: JobId) -> Result<IngestionJob> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Ingestion job {}", job_id)))
    }

    async fn list_by_upload(&self, upload_id: UploadId) -> Result<Vec<IngestionJob>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<IngestionJob> = jobs
            .values()
            .filter(|j| j.upload_id == upload_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn find_active(&self, upload_id: UploadId) -> Result<Option<IngestionJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .find(|j| j.upload_id == upload_id && j.is_active())
            .cloned())
    }
}

/// In-memory upload store.
#[derive(Clone, Default)]
pub struct MemoryUploadStore {
    uploads: Arc<DashMap<UploadId, Upload>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn create(&self, upload: &Upload) -> Result<()> {
        if self.uploads.contains_key(&upload.id) {
            return Err(StoreError::AlreadyExists(format!("Upload {}", upload.id)));
        }
        self.uploads.insert(upload.id, upload.clone());
        Ok(())
    }

    async fn get(&self, upload_id: UploadId) -> Result<Upload> {
        self.uploads
            .get(&upload_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound(format!("Upload {}", upload_id)))
    }

    async fn set_ingest_status(&self, upload_id: UploadId, status: IngestStatus) -> Result<()> {
        let mut entry = self
            .uploads
            .get_mut(&upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("Upload {}", upload_id)))?;
        entry.ingest_status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }
}
