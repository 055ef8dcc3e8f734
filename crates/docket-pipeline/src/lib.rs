//! Pipeline orchestration for the Docket ingestion service
//!
//! This crate turns one upload into indexed artifacts by driving it through
//! a fixed sequence of external tools:
//!
//! - Job Dispatcher: validates a submission, creates the job record, and
//!   schedules it onto a bounded worker pool
//! - Pipeline Executor: runs the stages (prepare, optional OCR, chunk,
//!   embed, index, optional NER, optional graph ingest) strictly in order,
//!   persisting a per-stage diagnostic trail as it goes
//! - Chunk Normalizer: rewrites raw splitter output into the canonical
//!   chunk record shape with renumbered indices
//! - Stage Invoker: spawns the tools as subprocesses with structured
//!   argument vectors, captured output, and a wall-clock budget

pub mod dispatcher;
pub mod executor;
pub mod invoker;
pub mod normalizer;

pub use dispatcher::JobDispatcher;
pub use executor::PipelineExecutor;
pub use invoker::{SubprocessInvoker, ToolInvocation, ToolInvoker, ToolOutput};
pub use normalizer::{normalize_chunk_file, DocumentIdentity};

use docket_core::Stage;

/// Error types for pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A required stage prerequisite is absent from both the run options
    /// and the process configuration.
    #[error("{stage} stage requires {what}")]
    MissingConfig { stage: Stage, what: String },

    #[error("Chunk file line {line}: {message}")]
    ChunkParse { line: usize, message: String },

    #[error("{stage} tool exited with code {exit_code}")]
    StageFailed {
        stage: Stage,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{stage} tool did not finish within {budget_secs}s")]
    StageTimeout { stage: Stage, budget_secs: u64 },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] docket_core::CoreError),

    #[error(transparent)]
    Store(#[from] docket_store::StoreError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
