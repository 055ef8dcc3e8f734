//! Persistence layer for the Docket ingestion service
//!
//! Two store contracts live here, each with an in-memory backend for dev
//! and tests and a Postgres backend for production:
//! - [`JobStore`]: ingestion job records with atomic transitions and the
//!   one-active-job-per-upload invariant
//! - [`UploadStore`]: upload records and their ingest status
//!
//! The active-job invariant is enforced inside the backends themselves (a
//! single write lock in memory, a partial unique index in Postgres), so a
//! duplicate submission cannot slip through between a check and an insert.

pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::{MemoryJobStore, MemoryUploadStore};
pub use pool::{create_pool, run_migrations};
pub use postgres::{PgJobStore, PgUploadStore};
pub use store::{JobStore, UploadStore};

use docket_core::{JobId, UploadId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] docket_core::CoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Upload {upload_id} already has an active ingestion job")]
    ActiveJobExists {
        upload_id: UploadId,
        /// The conflicting job, when the backend could still see it.
        existing_job_id: Option<JobId>,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
