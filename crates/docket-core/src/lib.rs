//! Core domain types for the Docket ingestion service
//!
//! This crate defines the vocabulary shared by every other layer:
//! - Identifier newtypes and the upload/job records
//! - The job detail document and its merge rules
//! - Chunk record shapes and the adapter for raw splitter output
//! - Per-run ingestion options and their sanitization
//! - Process configuration loaded from the environment

pub mod chunk;
pub mod config;
pub mod detail;
pub mod error;
pub mod options;
pub mod types;

pub use chunk::{ChunkMetadata, ChunkRecord, RawChunkRecord, ResolvedChunk, SplitterSettings};
pub use config::DocketConfig;
pub use detail::{merge_detail, JobTransition};
pub use error::{CoreError, CoreResult};
pub use options::IngestOptions;
pub use types::{
    IngestStatus, IngestionJob, JobId, JobStatus, Requester, Stage, ThreadId, Upload, UploadId,
    WorkspaceId,
};
