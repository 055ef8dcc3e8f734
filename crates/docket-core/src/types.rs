use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

use crate::error::CoreError;

// Newtype wrappers for type safety

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(Uuid);

impl WorkspaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(Uuid);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Upload types

/// Indexing state of an upload, advanced by the pipeline as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Pending => "pending",
            IngestStatus::Processing => "processing",
            IngestStatus::Indexed => "indexed",
            IngestStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IngestStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IngestStatus::Pending),
            "processing" => Ok(IngestStatus::Processing),
            "indexed" => Ok(IngestStatus::Indexed),
            "failed" => Ok(IngestStatus::Failed),
            other => Err(CoreError::validation(format!(
                "Unknown ingest status: {}",
                other
            ))),
        }
    }
}

/// An immutable reference to a stored source file.
///
/// The pipeline reads everything except `ingest_status`, which tracks the
/// upload's indexing state and is the only field it ever writes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub workspace_id: WorkspaceId,
    pub thread_id: Option<ThreadId>,
    /// Path relative to the data root; the first segment is the workspace.
    pub storage_path: String,
    pub media_type: String,
    pub ingest_status: IngestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn new(
        workspace_id: WorkspaceId,
        storage_path: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: UploadId::new(),
            workspace_id,
            thread_id: None,
            storage_path: storage_path.into(),
            media_type: media_type.into(),
            ingest_status: IngestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Final path segment of the stored file.
    pub fn file_name(&self) -> &str {
        self.storage_path
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.storage_path)
    }

    /// File stem used as the document identifier in chunk metadata.
    pub fn doc_id(&self) -> String {
        Path::new(self.file_name())
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name().to_string())
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(self.file_name())
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    /// Storage path with the leading workspace segment stripped.
    pub fn workspace_relative_path(&self) -> &str {
        self.storage_path
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.storage_path)
    }
}

// Ingestion job types

/// Lifecycle status of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job still holds its upload's active slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CoreError::validation(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }
}

/// Pipeline stage a job is in, or the last one it attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Ocr,
    Chunk,
    Embed,
    Index,
    Ner,
    Graph,
    Completed,
}

impl Stage {
    /// Stage name as used for detail keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Ocr => "ocr",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Index => "index",
            Stage::Ner => "ner",
            Stage::Graph => "graph",
            Stage::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepare" => Ok(Stage::Prepare),
            "ocr" => Ok(Stage::Ocr),
            "chunk" => Ok(Stage::Chunk),
            "embed" => Ok(Stage::Embed),
            "index" => Ok(Stage::Index),
            "ner" => Ok(Stage::Ner),
            "graph" => Ok(Stage::Graph),
            "completed" => Ok(Stage::Completed),
            other => Err(CoreError::validation(format!("Unknown stage: {}", other))),
        }
    }
}

/// One ingestion attempt for an upload.
///
/// Jobs are append-only history: terminal jobs are kept for audit and a new
/// submission creates a new record. At most one job per upload may be active
/// (queued or running) at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: JobId,
    pub upload_id: UploadId,
    pub stage: Stage,
    pub status: JobStatus,
    /// Per-stage diagnostic document, merged incrementally as stages finish.
    pub detail: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    pub fn new(upload_id: UploadId) -> Self {
        Self {
            id: JobId::new(),
            upload_id,
            stage: Stage::Prepare,
            status: JobStatus::Queued,
            detail: Map::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Record the sanitized submission under `detail.request`.
    pub fn with_request(mut self, request: Value) -> Self {
        self.detail.insert("request".to_string(), request);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Identity of the caller submitting an ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requester {
    pub workspace_id: WorkspaceId,
    pub user_id: Option<String>,
}

impl Requester {
    pub fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_uniqueness() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Queued).unwrap(),
            "\"queued\""
        );
        assert_eq!(
            serde_json::to_string(&IngestStatus::Indexed).unwrap(),
            "\"indexed\""
        );
        assert_eq!(serde_json::to_string(&Stage::Ner).unwrap(), "\"ner\"");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_active_and_terminal() {
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Running.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_upload_path_helpers() {
        let workspace_id = WorkspaceId::new();
        let upload = Upload::new(
            workspace_id,
            format!("{}/contracts/lease_2024.pdf", workspace_id),
            "application/pdf",
        );

        assert_eq!(upload.file_name(), "lease_2024.pdf");
        assert_eq!(upload.doc_id(), "lease_2024");
        assert_eq!(upload.extension().as_deref(), Some("pdf"));
        assert_eq!(upload.workspace_relative_path(), "contracts/lease_2024.pdf");
    }

    #[test]
    fn test_upload_without_directory() {
        let upload = Upload::new(WorkspaceId::new(), "brief.DOCX", "application/msword");

        assert_eq!(upload.file_name(), "brief.DOCX");
        assert_eq!(upload.doc_id(), "brief");
        assert_eq!(upload.extension().as_deref(), Some("docx"));
        assert_eq!(upload.workspace_relative_path(), "brief.DOCX");
    }

    #[test]
    fn test_job_request_detail() {
        let job = IngestionJob::new(UploadId::new())
            .with_request(serde_json::json!({"skipOCR": false}));

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stage, Stage::Prepare);
        assert!(job.detail.contains_key("request"));
        assert!(job.started_at.is_none());
    }
}
