//! Per-run ingestion options
//!
//! Callers may override parts of the process configuration for a single
//! submission. Field names mirror the public API payload; anything left
//! unset falls back to [`crate::config::DocketConfig`].

use serde::{Deserialize, Serialize};

use crate::chunk::SplitterSettings;
use crate::error::CoreError;

/// Caller-supplied overrides for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestOptions {
    /// Never run OCR, even for eligible extensions.
    #[serde(rename = "skipOCR")]
    pub skip_ocr: bool,
    /// Run OCR regardless of the extension (unless skipped).
    #[serde(rename = "forceOCR")]
    pub force_ocr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_overlap: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separators: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chroma_path: Option<String>,
    /// Full collection name override, wins over everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Suffix appended to the workspace-derived collection name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_suffix: Option<String>,
    /// Per-run NER toggle; the process default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ner: Option<bool>,
    /// Per-run graph-ingest toggle; the process default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<bool>,
}

impl IngestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate bounds and normalize blank overrides to "not set".
    ///
    /// The returned copy is what gets recorded under `detail.request`, so a
    /// caller reading the job back sees exactly what the run used.
    pub fn sanitize(&self, defaults: &SplitterSettings) -> Result<Self, CoreError> {
        let mut opts = self.clone();
        opts.model_path = none_if_blank(opts.model_path);
        opts.device = none_if_blank(opts.device);
        opts.chroma_path = none_if_blank(opts.chroma_path);
        opts.collection = none_if_blank(opts.collection);
        opts.collection_suffix = none_if_blank(opts.collection_suffix);

        opts.effective_splitter(defaults).validate()?;
        if let Some(batch) = opts.batch_size {
            if batch == 0 {
                return Err(CoreError::validation(
                    "Batch size must be greater than 0".to_string(),
                ));
            }
        }
        Ok(opts)
    }

    /// Splitter settings for this run, with process defaults filled in.
    pub fn effective_splitter(&self, defaults: &SplitterSettings) -> SplitterSettings {
        SplitterSettings {
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            chunk_overlap: self.chunk_overlap.unwrap_or(defaults.chunk_overlap),
            separators: self
                .separators
                .clone()
                .or_else(|| defaults.separators.clone()),
        }
    }

    pub fn ner_enabled(&self, default_enabled: bool) -> bool {
        self.ner.unwrap_or(default_enabled)
    }

    pub fn graph_enabled(&self, default_enabled: bool) -> bool {
        self.graph.unwrap_or(default_enabled)
    }
}

fn none_if_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serde_names_match_api_payload() {
        let opts = IngestOptions {
            skip_ocr: true,
            chunk_size: Some(800),
            ..Default::default()
        };
        let value = serde_json::to_value(&opts).unwrap();

        assert_eq!(value["skipOCR"], serde_json::json!(true));
        assert_eq!(value["forceOCR"], serde_json::json!(false));
        assert_eq!(value["chunkSize"], serde_json::json!(800));
        assert!(value.get("modelPath").is_none());
    }

    #[test]
    fn test_sanitize_rejects_bad_bounds() {
        let defaults = SplitterSettings::default();

        let opts = IngestOptions {
            chunk_size: Some(0),
            ..Default::default()
        };
        assert!(opts.sanitize(&defaults).is_err());

        // Overlap is checked against the effective size, not the default one.
        let opts = IngestOptions {
            chunk_size: Some(100),
            chunk_overlap: Some(100),
            ..Default::default()
        };
        assert!(opts.sanitize(&defaults).is_err());

        let opts = IngestOptions {
            batch_size: Some(0),
            ..Default::default()
        };
        assert!(opts.sanitize(&defaults).is_err());
    }

    #[test]
    fn test_sanitize_drops_blank_overrides() {
        let opts = IngestOptions {
            model_path: Some("   ".to_string()),
            collection: Some("".to_string()),
            ..Default::default()
        };
        let sanitized = opts.sanitize(&SplitterSettings::default()).unwrap();

        assert_eq!(sanitized.model_path, None);
        assert_eq!(sanitized.collection, None);
    }

    #[test]
    fn test_effective_splitter_overrides() {
        let defaults = SplitterSettings::default();
        let opts = IngestOptions {
            chunk_overlap: Some(40),
            ..Default::default()
        };
        let settings = opts.effective_splitter(&defaults);

        assert_eq!(settings.chunk_size, 1200);
        assert_eq!(settings.chunk_overlap, 40);
    }

    #[test]
    fn test_stage_toggles() {
        let opts = IngestOptions::default();
        assert!(opts.ner_enabled(true));
        assert!(!opts.ner_enabled(false));

        let opts = IngestOptions {
            ner: Some(false),
            graph: Some(true),
            ..Default::default()
        };
        assert!(!opts.ner_enabled(true));
        assert!(opts.graph_enabled(false));
    }
}
