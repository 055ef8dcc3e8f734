//! Job detail merging and transition payloads

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::types::{IngestionJob, JobStatus, Stage};

/// Merge a patch into a job detail document, returning the merged copy.
///
/// The merge is shallow: each top-level key in the patch replaces the
/// corresponding key in the target wholesale. Keys absent from the patch are
/// never touched, so sub-objects written by earlier transitions survive
/// later ones.
pub fn merge_detail(detail: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = detail.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// One atomic update to an ingestion job record.
///
/// Stores apply the whole transition in a single read-modify-write so that
/// concurrent writers can never interleave between the detail merge and the
/// status change.
#[derive(Debug, Clone, Default)]
pub struct JobTransition {
    pub status: Option<JobStatus>,
    pub stage: Option<Stage>,
    pub detail_patch: Option<Map<String, Value>>,
    pub mark_started: bool,
    pub mark_completed: bool,
}

impl JobTransition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_detail_patch(mut self, patch: Map<String, Value>) -> Self {
        self.detail_patch = Some(patch);
        self
    }

    /// Stamp `started_at` if it has not been stamped before.
    pub fn mark_started(mut self) -> Self {
        self.mark_started = true;
        self
    }

    /// Stamp `completed_at` unconditionally.
    pub fn mark_completed(mut self) -> Self {
        self.mark_completed = true;
        self
    }

    /// Apply this transition to a job record in place.
    ///
    /// Every store backend routes its read-modify-write through here so the
    /// merge and timestamp semantics cannot drift between them.
    pub fn apply_to(&self, job: &mut IngestionJob, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(stage) = self.stage {
            job.stage = stage;
        }
        if let Some(patch) = &self.detail_patch {
            job.detail = merge_detail(&job.detail, patch);
        }
        if self.mark_started && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if self.mark_completed {
            job.completed_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UploadId;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {}", other),
        }
    }

    #[test]
    fn test_merge_is_additive() {
        let base = obj(json!({"request": {"skipOCR": false}}));
        let merged = merge_detail(&base, &obj(json!({"chunk": {"totalChunks": 3}})));
        let merged = merge_detail(&merged, &obj(json!({"embed": {"modelPath": "/m"}})));

        assert_eq!(merged["request"], json!({"skipOCR": false}));
        assert_eq!(merged["chunk"], json!({"totalChunks": 3}));
        assert_eq!(merged["embed"], json!({"modelPath": "/m"}));
    }

    #[test]
    fn test_merge_replaces_key_wholesale() {
        let base = obj(json!({"chunk": {"totalChunks": 3, "mode": "docx"}}));
        let merged = merge_detail(&base, &obj(json!({"chunk": {"totalChunks": 5}})));

        // The patched key is replaced, not deep-merged.
        assert_eq!(merged["chunk"], json!({"totalChunks": 5}));
    }

    #[test]
    fn test_merge_never_touches_siblings() {
        let base = obj(json!({"ocr": {"textLength": 42}, "chunk": {"mode": "json"}}));
        let merged = merge_detail(&base, &obj(json!({"embed": {"output": "e.jsonl"}})));

        assert_eq!(merged["ocr"], base["ocr"]);
        assert_eq!(merged["chunk"], base["chunk"]);
    }

    #[test]
    fn test_mark_started_is_first_write_wins() {
        let mut job = IngestionJob::new(UploadId::new());
        let first = Utc::now();
        JobTransition::new()
            .with_status(JobStatus::Running)
            .mark_started()
            .apply_to(&mut job, first);
        assert_eq!(job.started_at, Some(first));

        let later = first + chrono::Duration::seconds(30);
        JobTransition::new()
            .with_stage(Stage::Chunk)
            .mark_started()
            .apply_to(&mut job, later);
        assert_eq!(job.started_at, Some(first));
    }

    #[test]
    fn test_mark_completed_always_stamps() {
        let mut job = IngestionJob::new(UploadId::new());
        let first = Utc::now();
        JobTransition::new().mark_completed().apply_to(&mut job, first);
        let later = first + chrono::Duration::seconds(5);
        JobTransition::new().mark_completed().apply_to(&mut job, later);

        assert_eq!(job.completed_at, Some(later));
    }

    #[test]
    fn test_transition_leaves_unset_fields_alone() {
        let mut job = IngestionJob::new(UploadId::new());
        job.detail = obj(json!({"request": {}}));

        JobTransition::new()
            .with_stage(Stage::Embed)
            .apply_to(&mut job, Utc::now());

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stage, Stage::Embed);
        assert!(job.detail.contains_key("request"));
        assert!(job.completed_at.is_none());
    }
}
