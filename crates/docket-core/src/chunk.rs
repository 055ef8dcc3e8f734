//! Chunk record shapes
//!
//! The splitter tools emit newline-delimited JSON in two shapes: a canonical
//! `{text, metadata}` record, and the flat record the JSON-mode splitter
//! produces from OCR output. Both are adapted into [`ChunkRecord`] before any
//! pipeline logic touches them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Effective splitter settings for one run, recorded into every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterSettings {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters
    pub chunk_overlap: usize,
    /// Separators in priority order, when the splitter was told to use any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separators: Option<Vec<String>>,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 200,
            separators: None,
        }
    }
}

impl SplitterSettings {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: None,
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = Some(separators);
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.chunk_size == 0 {
            return Err(CoreError::validation(
                "Chunk size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(CoreError::validation(
                "Chunk overlap must be less than chunk size".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metadata stamped onto every normalized chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// File stem of the stored document
    pub doc_id: String,
    pub upload_id: String,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Ordinal assigned by the splitter tool, kept verbatim
    pub chunk_id: i64,
    /// Contiguous 0-based position, recomputed on every normalization
    pub chunk_index: usize,
    /// Final record count, recomputed on every normalization
    pub total_chunks: usize,
    /// `<upload_id>:<chunk_id>`, the stable cross-store identifier
    pub chunk_uid: String,
    pub case_id: String,
    /// Value the upstream record actually carried, before any fallback
    pub original_case_id: String,
    /// Absolute path of the stored document
    pub source_path: String,
    /// Data-root-relative path of the stored document
    pub source_path_relative: String,
    pub storage_path: String,
    /// Storage path with the workspace segment stripped
    pub storage_path_relative: String,
    /// Character count of the chunk text
    pub text_length: usize,
    pub splitter_config: SplitterSettings,
    /// Upstream metadata keys that are not part of the canonical set
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One line of a normalized chunk file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One line of splitter output before normalization.
///
/// Deserialization tries the canonical shape first and falls back to the
/// flat shape, so a file may mix both.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawChunkRecord {
    Canonical {
        text: String,
        metadata: Map<String, Value>,
        #[serde(default)]
        chunk_id: Option<Value>,
        #[serde(default, rename = "chunkIndex")]
        chunk_index: Option<Value>,
    },
    Flat {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        doc: Option<String>,
        #[serde(default)]
        case_id: Option<Value>,
        #[serde(default)]
        chunk_id: Option<Value>,
        #[serde(default, rename = "chunkIndex")]
        chunk_index: Option<Value>,
    },
}

/// A raw record with its text and identifiers resolved.
#[derive(Debug, Clone)]
pub struct ResolvedChunk {
    pub text: String,
    /// Ordinal the upstream actually assigned, or the line ordinal
    pub chunk_id: i64,
    /// Case identifier the upstream carried, if any
    pub case_id: Option<String>,
    /// Remaining upstream metadata for the canonical shape
    pub metadata: Map<String, Value>,
}

impl RawChunkRecord {
    /// Resolve text and identifiers, consuming the raw record.
    ///
    /// Text comes from `text` first, then `doc`. The chunk id comes from
    /// `metadata.chunk_id`, then the record-level `chunk_id`, then
    /// `chunkIndex` (metadata first, then record-level), then the
    /// caller-supplied line ordinal.
    pub fn resolve(self, ordinal: usize) -> Result<ResolvedChunk, CoreError> {
        match self {
            RawChunkRecord::Canonical {
                text,
                metadata,
                chunk_id,
                chunk_index,
            } => {
                let chunk_id = metadata
                    .get("chunk_id")
                    .and_then(value_to_ordinal)
                    .or_else(|| chunk_id.as_ref().and_then(value_to_ordinal))
                    .or_else(|| metadata.get("chunkIndex").and_then(value_to_ordinal))
                    .or_else(|| chunk_index.as_ref().and_then(value_to_ordinal))
                    .unwrap_or(ordinal as i64);
                let case_id = metadata.get("case_id").and_then(value_to_string);
                Ok(ResolvedChunk {
                    text,
                    chunk_id,
                    case_id,
                    metadata,
                })
            }
            RawChunkRecord::Flat {
                text,
                doc,
                case_id,
                chunk_id,
                chunk_index,
            } => {
                let text = text.or(doc).ok_or_else(|| {
                    CoreError::validation("Chunk record has neither text nor doc".to_string())
                })?;
                let chunk_id = chunk_id
                    .as_ref()
                    .and_then(value_to_ordinal)
                    .or_else(|| chunk_index.as_ref().and_then(value_to_ordinal))
                    .unwrap_or(ordinal as i64);
                Ok(ResolvedChunk {
                    text,
                    chunk_id,
                    case_id: case_id.as_ref().and_then(value_to_string),
                    metadata: Map::new(),
                })
            }
        }
    }
}

fn value_to_ordinal(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(line: &str) -> RawChunkRecord {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn test_splitter_settings_validation() {
        assert!(SplitterSettings::default().validate().is_ok());
        assert!(SplitterSettings::new(0, 0).validate().is_err());
        assert!(SplitterSettings::new(100, 100).validate().is_err());
        assert!(SplitterSettings::new(100, 99).validate().is_ok());
    }

    #[test]
    fn test_canonical_record_resolution() {
        let raw = parse(r#"{"text": "clause", "metadata": {"chunk_id": 7, "case_id": "A-12"}}"#);
        let resolved = raw.resolve(0).unwrap();

        assert_eq!(resolved.text, "clause");
        assert_eq!(resolved.chunk_id, 7);
        assert_eq!(resolved.case_id.as_deref(), Some("A-12"));
    }

    #[test]
    fn test_record_level_id_survives_a_metadata_object() {
        // A record may carry metadata and still put its id at the top level.
        let raw = parse(r#"{"text": "x", "metadata": {"page": 1}, "chunk_id": 9}"#);
        assert_eq!(raw.resolve(0).unwrap().chunk_id, 9);

        let raw = parse(r#"{"text": "x", "metadata": {}, "chunkIndex": 4}"#);
        assert_eq!(raw.resolve(0).unwrap().chunk_id, 4);

        // The metadata copy still wins over the record-level one.
        let raw = parse(r#"{"text": "x", "metadata": {"chunk_id": 2}, "chunk_id": 9}"#);
        assert_eq!(raw.resolve(0).unwrap().chunk_id, 2);
    }

    #[test]
    fn test_flat_record_prefers_text_over_doc() {
        let raw = parse(r#"{"text": "from text", "doc": "from doc", "chunk_id": 2}"#);
        let resolved = raw.resolve(9).unwrap();

        assert_eq!(resolved.text, "from text");
        assert_eq!(resolved.chunk_id, 2);
    }

    #[test]
    fn test_flat_record_doc_fallback() {
        let raw = parse(r#"{"doc": "ocr paragraph", "case_id": 4417}"#);
        let resolved = raw.resolve(3).unwrap();

        assert_eq!(resolved.text, "ocr paragraph");
        assert_eq!(resolved.chunk_id, 3);
        assert_eq!(resolved.case_id.as_deref(), Some("4417"));
    }

    #[test]
    fn test_chunk_index_fallback_and_string_ids() {
        let raw = parse(r#"{"text": "t", "chunkIndex": "11"}"#);
        assert_eq!(raw.resolve(0).unwrap().chunk_id, 11);

        let raw = parse(r#"{"text": "t"}"#);
        assert_eq!(raw.resolve(5).unwrap().chunk_id, 5);
    }

    #[test]
    fn test_record_without_text_is_rejected() {
        let raw = parse(r#"{"case_id": "A-1", "chunk_id": 0}"#);
        assert!(raw.resolve(0).is_err());
    }

    #[test]
    fn test_metadata_serialization_skips_empty_thread() {
        let metadata = ChunkMetadata {
            doc_id: "lease".to_string(),
            upload_id: "u".to_string(),
            workspace_id: "w".to_string(),
            thread_id: None,
            chunk_id: 0,
            chunk_index: 0,
            total_chunks: 1,
            chunk_uid: "u:0".to_string(),
            case_id: "u".to_string(),
            original_case_id: "u".to_string(),
            source_path: "/data/w/lease.pdf".to_string(),
            source_path_relative: "w/lease.pdf".to_string(),
            storage_path: "w/lease.pdf".to_string(),
            storage_path_relative: "lease.pdf".to_string(),
            text_length: 6,
            splitter_config: SplitterSettings::default(),
            extra: Map::new(),
        };

        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value.get("thread_id").is_none());
        assert_eq!(value["splitter_config"], json!({"chunk_size": 1200, "chunk_overlap": 200}));
    }
}
