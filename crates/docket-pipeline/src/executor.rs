//! Pipeline executor
//!
//! Runs one dispatched job through the fixed stage sequence, writing a
//! store transition on every stage boundary so the job record always shows
//! where the run is. Stages are strictly sequential within a job; the next
//! stage never starts before the previous stage's write has returned.
//!
//! All failures converge on a single final transition that records the
//! error and flags the upload; an already-dispatched job never surfaces an
//! error to its caller.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use docket_core::{
    DocketConfig, IngestOptions, IngestStatus, JobId, JobStatus, JobTransition, Stage, Upload,
    UploadId,
};
use docket_store::{JobStore, UploadStore};

use crate::invoker::{ToolInvocation, ToolInvoker};
use crate::normalizer::{normalize_chunk_file, DocumentIdentity};
use crate::{PipelineError, Result};

/// Drives one ingestion job from `queued` to a terminal status.
pub struct PipelineExecutor {
    config: Arc<DocketConfig>,
    jobs: Arc<dyn JobStore>,
    uploads: Arc<dyn UploadStore>,
    invoker: Arc<dyn ToolInvoker>,
}

impl PipelineExecutor {
    pub fn new(
        config: Arc<DocketConfig>,
        jobs: Arc<dyn JobStore>,
        uploads: Arc<dyn UploadStore>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            config,
            jobs,
            uploads,
            invoker,
        }
    }

    /// Run one job to completion.
    ///
    /// Never returns an error: every failure funnels into the final failed
    /// transition, and callers observe the outcome through the job record.
    pub async fn run(&self, job_id: JobId, upload: Upload, options: IngestOptions) {
        info!(job_id = %job_id, upload_id = %upload.id, "Ingestion job started");
        match self.execute(job_id, &upload, &options).await {
            Ok(()) => {
                info!(job_id = %job_id, upload_id = %upload.id, "Ingestion job completed");
            }
            Err(err) => {
                warn!(
                    job_id = %job_id,
                    upload_id = %upload.id,
                    error = %err,
                    "Ingestion job failed"
                );
                self.finish_failed(job_id, upload.id, &err).await;
            }
        }
    }

    async fn execute(&self, job_id: JobId, upload: &Upload, options: &IngestOptions) -> Result<()> {
        let storage = &self.config.storage;
        let tools = &self.config.tools;

        // prepare
        self.jobs
            .transition(
                job_id,
                JobTransition::new()
                    .with_status(JobStatus::Running)
                    .with_stage(Stage::Prepare)
                    .mark_started(),
            )
            .await?;

        let workdir = storage.job_workdir(&job_id);
        tokio::fs::create_dir_all(&workdir).await?;

        let source_path = storage.absolute_source_path(&upload.storage_path);
        // Opening rather than stat-ing verifies the file is actually
        // readable before any tool is pointed at it.
        let source_file = tokio::fs::File::open(&source_path).await?;
        let size_bytes = source_file.metadata().await?.len();
        drop(source_file);

        self.record(
            job_id,
            Stage::Prepare,
            json!({
                "sourcePath": source_path.display().to_string(),
                "sizeBytes": size_bytes,
            }),
        )
        .await?;

        // ocr
        let extension = upload.extension().unwrap_or_default();
        let run_ocr = !options.skip_ocr
            && (options.force_ocr || self.config.pipeline.ocr_eligible(&extension));
        let ocr_json_path = workdir.join("ocr.json");
        let mut ocr_ran = false;
        if run_ocr {
            self.enter(job_id, Stage::Ocr).await?;
            let output = self
                .invoker
                .invoke(
                    ToolInvocation::new(Stage::Ocr, tools.ocr_cmd.clone(), "ocr", &source_path)
                        .with_output(&ocr_json_path),
                )
                .await?;

            let ocr_doc: Value =
                serde_json::from_str(&tokio::fs::read_to_string(&ocr_json_path).await?)?;
            let text_length = ocr_doc
                .get("text")
                .and_then(Value::as_str)
                .map(|text| text.chars().count())
                .unwrap_or(0);
            let logs = ocr_doc
                .get("logs")
                .cloned()
                .unwrap_or_else(|| json!(output.stdout));

            self.record(
                job_id,
                Stage::Ocr,
                json!({
                    "jsonPath": ocr_json_path.display().to_string(),
                    "textLength": text_length,
                    "logs": logs,
                }),
            )
            .await?;
            ocr_ran = true;
        }

        // chunk
        self.enter(job_id, Stage::Chunk).await?;
        let splitter = options.effective_splitter(&self.config.pipeline.splitter_settings());
        let (chunk_mode, chunk_input) = if ocr_ran {
            ("json", ocr_json_path.clone())
        } else {
            ("docx", source_path.clone())
        };
        let chunks_path = workdir.join("chunks.jsonl");
        let mut invocation = ToolInvocation::new(
            Stage::Chunk,
            tools.splitter_cmd.clone(),
            chunk_mode,
            &chunk_input,
        )
        .with_output(&chunks_path)
        .with_option("chunk-size", splitter.chunk_size.to_string())
        .with_option("chunk-overlap", splitter.chunk_overlap.to_string());
        if let Some(separators) = &splitter.separators {
            invocation = invocation.with_option("separators", serde_json::to_string(separators)?);
        }
        let output = self.invoker.invoke(invocation).await?;

        let identity = DocumentIdentity::for_upload(upload, storage);
        let total_chunks = normalize_chunk_file(&chunks_path, &identity, &splitter).await?;

        self.record(
            job_id,
            Stage::Chunk,
            json!({
                "mode": chunk_mode,
                "output": chunks_path.display().to_string(),
                "sourcePath": chunk_input.display().to_string(),
                "docId": identity.doc_id,
                "totalChunks": total_chunks,
                "chunkSize": splitter.chunk_size,
                "chunkOverlap": splitter.chunk_overlap,
                "stdout": output.stdout,
                "stderr": output.stderr,
            }),
        )
        .await?;

        // embed
        self.enter(job_id, Stage::Embed).await?;
        let model_path = self
            .config
            .embedding
            .resolve_model_path(options.model_path.as_deref())
            .ok_or_else(|| PipelineError::MissingConfig {
                stage: Stage::Embed,
                what: "an embedding model path".to_string(),
            })?;
        let embeddings_path = workdir.join("embeddings.jsonl");
        let batch_size = options.batch_size.unwrap_or(self.config.embedding.batch_size);
        let mut invocation = ToolInvocation::new(
            Stage::Embed,
            tools.splitter_cmd.clone(),
            "embed",
            &chunks_path,
        )
        .with_output(&embeddings_path)
        .with_option("model-path", model_path.clone())
        .with_option("batch-size", batch_size.to_string());
        if let Some(device) = options
            .device
            .clone()
            .or_else(|| self.config.embedding.device.clone())
        {
            invocation = invocation.with_option("device", device);
        }
        let output = self.invoker.invoke(invocation).await?;

        self.record(
            job_id,
            Stage::Embed,
            json!({
                "modelPath": model_path,
                "output": embeddings_path.display().to_string(),
                "stdout": output.stdout,
                "stderr": output.stderr,
            }),
        )
        .await?;

        // index
        self.enter(job_id, Stage::Index).await?;
        let chroma_path = self
            .config
            .index
            .resolve_chroma_path(options.chroma_path.as_deref());
        let collection = self.config.index.collection_for(
            &upload.workspace_id,
            options.collection.as_deref(),
            options.collection_suffix.as_deref(),
        );
        let output = self
            .invoker
            .invoke(
                ToolInvocation::new(
                    Stage::Index,
                    tools.splitter_cmd.clone(),
                    "index",
                    &embeddings_path,
                )
                .with_output(PathBuf::from(&chroma_path))
                .with_option("collection", collection.clone()),
            )
            .await?;

        self.record(
            job_id,
            Stage::Index,
            json!({
                "chromaPath": chroma_path,
                "collection": collection,
                "stdout": output.stdout,
                "stderr": output.stderr,
            }),
        )
        .await?;

        // ner
        let ner_path = workdir.join("ner.jsonl");
        let mut ner_ran = false;
        if options.ner_enabled(self.config.pipeline.ner_enabled) {
            self.enter(job_id, Stage::Ner).await?;
            let output = self
                .invoker
                .invoke(
                    ToolInvocation::new(Stage::Ner, tools.splitter_cmd.clone(), "ner", &chunks_path)
                        .with_output(&ner_path)
                        .with_option("conda-env", self.config.ner.conda_env.clone()),
                )
                .await?;

            self.record(
                job_id,
                Stage::Ner,
                json!({
                    "output": ner_path.display().to_string(),
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                }),
            )
            .await?;
            ner_ran = true;
        }

        // graph
        if options.graph_enabled(self.config.pipeline.graph_enabled) {
            let graph = &self.config.graph;
            if !ner_ran {
                info!(job_id = %job_id, "Graph ingest skipped, NER did not run");
            } else if !graph.is_configured() {
                // Enabled but unconfigured is a soft-skip, not a failure.
                warn!(job_id = %job_id, "Graph ingest skipped, graph store credentials not configured");
            } else {
                self.enter(job_id, Stage::Graph).await?;
                let mut invocation = ToolInvocation::new(
                    Stage::Graph,
                    tools.splitter_cmd.clone(),
                    "graph",
                    &ner_path,
                )
                .with_option("uri", graph.uri.clone())
                .with_option("user", graph.user.clone());
                if let Some(password) = &graph.password {
                    // Credentials travel in the child environment, never
                    // on the command line.
                    invocation = invocation.with_env("NEO4J_PASSWORD", password.clone());
                }
                let output = self.invoker.invoke(invocation).await?;

                self.record(
                    job_id,
                    Stage::Graph,
                    json!({
                        "uri": graph.uri,
                        "stdout": output.stdout,
                        "stderr": output.stderr,
                    }),
                )
                .await?;
            }
        }

        // terminal success
        let mut patch = Map::new();
        patch.insert("completedAt".to_string(), json!(Utc::now().to_rfc3339()));
        self.jobs
            .transition(
                job_id,
                JobTransition::new()
                    .with_status(JobStatus::Completed)
                    .with_stage(Stage::Completed)
                    .with_detail_patch(patch)
                    .mark_completed(),
            )
            .await?;
        self.uploads
            .set_ingest_status(upload.id, IngestStatus::Indexed)
            .await?;
        Ok(())
    }

    async fn enter(&self, job_id: JobId, stage: Stage) -> Result<()> {
        info!(job_id = %job_id, stage = %stage, "Stage started");
        self.jobs
            .transition(job_id, JobTransition::new().with_stage(stage))
            .await?;
        Ok(())
    }

    /// Merge one stage's result summary into the job detail.
    async fn record(&self, job_id: JobId, stage: Stage, summary: Value) -> Result<()> {
        let mut patch = Map::new();
        patch.insert(stage.as_str().to_string(), summary);
        self.jobs
            .transition(job_id, JobTransition::new().with_detail_patch(patch))
            .await?;
        Ok(())
    }

    /// The single final failure transition plus the upload flag.
    ///
    /// The stage column keeps whatever stage was entered last, which is
    /// where the run died. Store errors here can only be logged; there is
    /// nothing left to fail into.
    async fn finish_failed(&self, job_id: JobId, upload_id: UploadId, err: &PipelineError) {
        let mut patch = Map::new();
        if let PipelineError::StageFailed {
            stage,
            stdout,
            stderr,
            ..
        } = err
        {
            patch.insert(
                stage.as_str().to_string(),
                json!({ "stdout": stdout, "stderr": stderr }),
            );
        }
        patch.insert("error".to_string(), json!(err.to_string()));
        patch.insert("stack".to_string(), json!(error_chain(err)));
        patch.insert("completedAt".to_string(), json!(Utc::now().to_rfc3339()));

        let transition = JobTransition::new()
            .with_status(JobStatus::Failed)
            .with_detail_patch(patch)
            .mark_completed();
        if let Err(store_err) = self.jobs.transition(job_id, transition).await {
            error!(job_id = %job_id, error = %store_err, "Could not record job failure");
        }
        if let Err(store_err) = self
            .uploads
            .set_ingest_status(upload_id, IngestStatus::Failed)
            .await
        {
            error!(upload_id = %upload_id, error = %store_err, "Could not flag upload after job failure");
        }
    }
}

/// Error messages from the failure down through its sources.
fn error_chain(err: &PipelineError) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = std::error::Error::source(cause);
    }
    chain
}
