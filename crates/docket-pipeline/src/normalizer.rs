//! Chunk file normalization
//!
//! The splitter tools emit JSONL in loose shapes; everything downstream
//! (embedding, indexing, NER, graph ingest) expects the canonical record.
//! Normalization parses every line, stamps document identity, renumbers the
//! chunks, and rewrites the file in place.

use std::path::Path;
use tracing::debug;

use docket_core::config::StorageConfig;
use docket_core::{ChunkMetadata, ChunkRecord, RawChunkRecord, ResolvedChunk, SplitterSettings, Upload};

use crate::{PipelineError, Result};

/// Metadata keys owned by the normalizer; upstream copies are dropped so a
/// re-run starts from the same inputs.
const CANONICAL_KEYS: &[&str] = &[
    "doc_id",
    "upload_id",
    "workspace_id",
    "thread_id",
    "chunk_id",
    "chunkIndex",
    "chunk_index",
    "total_chunks",
    "chunk_uid",
    "case_id",
    "original_case_id",
    "source_path",
    "source_path_relative",
    "storage_path",
    "storage_path_relative",
    "text_length",
    "splitter_config",
];

/// The upload-derived fields stamped onto every chunk of one document.
#[derive(Debug, Clone)]
pub struct DocumentIdentity {
    /// File stem of the stored document
    pub doc_id: String,
    pub upload_id: String,
    pub workspace_id: String,
    pub thread_id: Option<String>,
    /// Absolute path of the stored document
    pub source_path: String,
    /// Data-root-relative path, identical to the storage path
    pub source_path_relative: String,
    pub storage_path: String,
    /// Storage path with the workspace segment stripped
    pub storage_path_relative: String,
}

impl DocumentIdentity {
    pub fn for_upload(upload: &Upload, storage: &StorageConfig) -> Self {
        Self {
            doc_id: upload.doc_id(),
            upload_id: upload.id.to_string(),
            workspace_id: upload.workspace_id.to_string(),
            thread_id: upload.thread_id.map(|thread_id| thread_id.to_string()),
            source_path: storage
                .absolute_source_path(&upload.storage_path)
                .display()
                .to_string(),
            source_path_relative: upload.storage_path.clone(),
            storage_path: upload.storage_path.clone(),
            storage_path_relative: upload.workspace_relative_path().to_string(),
        }
    }
}

/// Normalize one chunk file in place and return the final record count.
///
/// Every non-empty line is parsed independently; the first malformed line
/// aborts with its 1-based file position and the file is left untouched.
/// `chunk_index` and `total_chunks` are always recomputed, so upstream
/// values never leak through. The rewrite goes through a temp file and a
/// rename, which keeps it atomic and makes a second pass a no-op.
pub async fn normalize_chunk_file(
    path: &Path,
    identity: &DocumentIdentity,
    settings: &SplitterSettings,
) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path).await?;

    let mut records = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let resolved =
            parse_line(line, records.len()).map_err(|message| PipelineError::ChunkParse {
                line: index + 1,
                message,
            })?;
        records.push(build_record(resolved, identity, settings));
    }

    let total = records.len();
    for (index, record) in records.iter_mut().enumerate() {
        record.metadata.chunk_index = index;
        record.metadata.total_chunks = total;
    }

    let mut buffer = String::with_capacity(raw.len());
    for record in &records {
        buffer.push_str(&serde_json::to_string(record)?);
        buffer.push('\n');
    }

    // Temp file plus rename: a failure mid-write can never leave a
    // half-normalized chunk file behind.
    let tmp = path.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp, buffer).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!(path = %path.display(), total_chunks = total, "Chunk file normalized");
    Ok(total)
}

fn parse_line(line: &str, ordinal: usize) -> std::result::Result<ResolvedChunk, String> {
    let raw: RawChunkRecord = serde_json::from_str(line).map_err(|err| err.to_string())?;
    raw.resolve(ordinal).map_err(|err| err.to_string())
}

fn build_record(
    resolved: ResolvedChunk,
    identity: &DocumentIdentity,
    settings: &SplitterSettings,
) -> ChunkRecord {
    let ResolvedChunk {
        text,
        chunk_id,
        case_id,
        mut metadata,
    } = resolved;

    // An upstream record may carry the settings it was actually split
    // with; those win over the run's configuration.
    let splitter_config = metadata
        .get("splitter_config")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_else(|| settings.clone());

    for key in CANONICAL_KEYS {
        metadata.remove(*key);
    }

    let case_id = case_id.unwrap_or_else(|| identity.upload_id.clone());
    let text_length = text.chars().count();

    ChunkRecord {
        metadata: ChunkMetadata {
            doc_id: identity.doc_id.clone(),
            upload_id: identity.upload_id.clone(),
            workspace_id: identity.workspace_id.clone(),
            thread_id: identity.thread_id.clone(),
            chunk_id,
            // Assigned in the renumber pass.
            chunk_index: 0,
            total_chunks: 0,
            chunk_uid: format!("{}:{}", identity.upload_id, chunk_id),
            original_case_id: case_id.clone(),
            case_id,
            source_path: identity.source_path.clone(),
            source_path_relative: identity.source_path_relative.clone(),
            storage_path: identity.storage_path.clone(),
            storage_path_relative: identity.storage_path_relative.clone(),
            text_length,
            splitter_config,
            extra: metadata,
        },
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::{ThreadId, WorkspaceId};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn identity() -> DocumentIdentity {
        DocumentIdentity {
            doc_id: "lease".to_string(),
            upload_id: "u-1".to_string(),
            workspace_id: "w-1".to_string(),
            thread_id: None,
            source_path: "/data/uploads/w-1/lease.docx".to_string(),
            source_path_relative: "w-1/lease.docx".to_string(),
            storage_path: "w-1/lease.docx".to_string(),
            storage_path_relative: "lease.docx".to_string(),
        }
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_mixed_shapes_are_normalized_and_renumbered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"text": "first clause", "metadata": {"chunk_id": 10, "page": 4}}"#,
                "\n\n",
                r#"{"doc": "ocr paragraph"}"#,
                "\n",
                r#"{"text": "third", "chunkIndex": "7"}"#,
                "\n",
            ),
        )
        .unwrap();

        let settings = SplitterSettings::new(1200, 200);
        let total = normalize_chunk_file(&path, &identity(), &settings)
            .await
            .unwrap();
        assert_eq!(total, 3);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);

        let first = &lines[0]["metadata"];
        assert_eq!(first["chunk_id"], json!(10));
        assert_eq!(first["chunk_index"], json!(0));
        assert_eq!(first["total_chunks"], json!(3));
        assert_eq!(first["chunk_uid"], json!("u-1:10"));
        assert_eq!(first["doc_id"], json!("lease"));
        assert_eq!(first["source_path"], json!("/data/uploads/w-1/lease.docx"));
        assert_eq!(first["storage_path_relative"], json!("lease.docx"));
        assert_eq!(first["text_length"], json!(12));
        // Upstream extras survive under their own keys.
        assert_eq!(first["page"], json!(4));

        // Flat record without an id takes its ordinal among the records.
        let second = &lines[1]["metadata"];
        assert_eq!(lines[1]["text"], json!("ocr paragraph"));
        assert_eq!(second["chunk_id"], json!(1));
        assert_eq!(second["chunk_index"], json!(1));
        assert_eq!(second["case_id"], json!("u-1"));
        assert_eq!(second["original_case_id"], json!("u-1"));

        let third = &lines[2]["metadata"];
        assert_eq!(third["chunk_id"], json!(7));
        assert_eq!(third["chunk_index"], json!(2));
    }

    #[tokio::test]
    async fn test_record_level_chunk_id_next_to_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(
            &path,
            concat!(r#"{"text": "x", "metadata": {"page": 1}, "chunk_id": 9}"#, "\n"),
        )
        .unwrap();

        normalize_chunk_file(&path, &identity(), &SplitterSettings::default())
            .await
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines[0]["metadata"]["chunk_id"], json!(9));
        assert_eq!(lines[0]["metadata"]["chunk_uid"], json!("u-1:9"));
        assert_eq!(lines[0]["metadata"]["page"], json!(1));
    }

    #[tokio::test]
    async fn test_malformed_line_aborts_without_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        let original = concat!(
            "\n",
            r#"{"text": "ok"}"#,
            "\n",
            r#"{"text": 42}"#,
            "\n",
            r#"{"text": "also ok"}"#,
            "\n",
        );
        std::fs::write(&path, original).unwrap();

        let err = normalize_chunk_file(&path, &identity(), &SplitterSettings::default())
            .await
            .unwrap_err();
        match err {
            PipelineError::ChunkParse { line, .. } => assert_eq!(line, 3),
            other => panic!("expected ChunkParse, got {}", other),
        }

        // Nothing was committed, including for the lines before the bad one.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn test_renumbering_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"text": "a", "metadata": {"chunk_id": 5, "case_id": "C-9"}}"#,
                "\n",
                r#"{"doc": "b"}"#,
                "\n",
            ),
        )
        .unwrap();

        let settings = SplitterSettings::new(800, 80);
        let first_total = normalize_chunk_file(&path, &identity(), &settings)
            .await
            .unwrap();
        let first_pass = std::fs::read_to_string(&path).unwrap();

        let second_total = normalize_chunk_file(&path, &identity(), &settings)
            .await
            .unwrap();
        let second_pass = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first_total, second_total);
        assert_eq!(first_pass, second_pass);
    }

    #[tokio::test]
    async fn test_case_id_is_kept_when_upstream_supplied_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(
            &path,
            concat!(r#"{"doc": "body", "case_id": "K-2024-17"}"#, "\n"),
        )
        .unwrap();

        normalize_chunk_file(&path, &identity(), &SplitterSettings::default())
            .await
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines[0]["metadata"]["case_id"], json!("K-2024-17"));
        assert_eq!(lines[0]["metadata"]["original_case_id"], json!("K-2024-17"));
    }

    #[tokio::test]
    async fn test_record_level_splitter_config_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"text": "a", "metadata": {"splitter_config": {"chunk_size": 500, "chunk_overlap": 50}}}"#,
                "\n",
                r#"{"text": "b", "metadata": {}}"#,
                "\n",
            ),
        )
        .unwrap();

        normalize_chunk_file(&path, &identity(), &SplitterSettings::new(1200, 200))
            .await
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(
            lines[0]["metadata"]["splitter_config"],
            json!({"chunk_size": 500, "chunk_overlap": 50})
        );
        assert_eq!(
            lines[1]["metadata"]["splitter_config"],
            json!({"chunk_size": 1200, "chunk_overlap": 200})
        );
    }

    #[tokio::test]
    async fn test_identity_for_upload() {
        let workspace_id = WorkspaceId::new();
        let thread_id = ThreadId::new();
        let upload = Upload::new(
            workspace_id,
            format!("{}/contracts/lease-agreement.pdf", workspace_id),
            "application/pdf",
        )
        .with_thread(thread_id);
        let storage = StorageConfig::new("/srv/docket/uploads", "/srv/docket/work");

        let identity = DocumentIdentity::for_upload(&upload, &storage);

        assert_eq!(identity.doc_id, "lease-agreement");
        assert_eq!(identity.upload_id, upload.id.to_string());
        assert_eq!(identity.thread_id, Some(thread_id.to_string()));
        assert_eq!(
            identity.source_path,
            format!("/srv/docket/uploads/{}/contracts/lease-agreement.pdf", workspace_id)
        );
        assert_eq!(
            identity.source_path_relative,
            format!("{}/contracts/lease-agreement.pdf", workspace_id)
        );
        assert_eq!(identity.storage_path_relative, "contracts/lease-agreement.pdf");
    }
}
