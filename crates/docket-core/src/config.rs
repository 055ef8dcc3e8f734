use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::chunk::SplitterSettings;
use crate::types::{JobId, WorkspaceId};

/// Main service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocketConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ner: NerConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
}

impl DocketConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("DOCKET")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8182)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("storage.data_root", "data/uploads")?
            .set_default("storage.work_root", "data/work")?
            .set_default("pipeline.chunk_size", 1200)?
            .set_default("pipeline.chunk_overlap", 200)?
            .set_default("pipeline.ner_enabled", true)?
            .set_default("pipeline.graph_enabled", true)?
            .set_default("pipeline.max_concurrent_jobs", num_cpus::get() as i64)?
            .set_default("pipeline.stage_timeout_secs", 1800)?
            .set_default("tools.capture_limit", 4000)?
            .set_default("embedding.batch_size", 32)?
            .set_default("index.chroma_path", ".chroma")?
            .set_default("index.collection_prefix", "ws")?
            .set_default("ner.conda_env", "ner_env")?
            .set_default("graph.uri", "bolt://localhost:7687")?
            .set_default("graph.user", "neo4j")?
            .set_default("callback.secret", "")?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("DOCKET")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8182
}

/// Database configuration
///
/// An empty URL selects the in-memory stores, which is the dev and test
/// default; anything else must be a Postgres connection string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }

    pub fn with_pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

/// Filesystem layout for stored uploads and per-job scratch space
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root under which upload storage paths are resolved
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Root under which per-job working directories are created
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
}

impl StorageConfig {
    pub fn new(data_root: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            work_root: work_root.into(),
        }
    }

    /// Absolute path of a stored upload.
    pub fn absolute_source_path(&self, storage_path: &str) -> PathBuf {
        self.data_root.join(storage_path)
    }

    /// Working directory owned exclusively by one job.
    pub fn job_workdir(&self, job_id: &JobId) -> PathBuf {
        self.work_root.join(job_id.to_string())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(default_data_root(), default_work_root())
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_work_root() -> PathBuf {
    PathBuf::from("data/work")
}

/// Pipeline behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub separators: Option<Vec<String>>,
    /// Extensions that make an upload OCR-eligible (lowercased).
    #[serde(default = "default_ocr_extensions")]
    pub ocr_extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub ner_enabled: bool,
    #[serde(default = "default_true")]
    pub graph_enabled: bool,
    /// Upper bound on concurrently running jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Wall-clock budget per tool invocation; 0 disables the timeout.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

impl PipelineConfig {
    pub fn splitter_settings(&self) -> SplitterSettings {
        SplitterSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            separators: self.separators.clone(),
        }
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }

    pub fn ocr_eligible(&self, extension: &str) -> bool {
        self.ocr_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: None,
            ocr_extensions: default_ocr_extensions(),
            ner_enabled: true,
            graph_enabled: true,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            stage_timeout_secs: default_stage_timeout_secs(),
        }
    }
}

fn default_chunk_size() -> usize {
    1200
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_ocr_extensions() -> Vec<String> {
    ["pdf", "png", "jpg", "jpeg", "tif", "tiff"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_jobs() -> usize {
    num_cpus::get().max(1)
}

fn default_stage_timeout_secs() -> u64 {
    1800 // 30 minutes
}

/// External tool programs, as argv prefixes
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Splitter/embedder/indexer CLI; the invoker appends mode and paths.
    #[serde(default = "default_splitter_cmd")]
    pub splitter_cmd: Vec<String>,
    /// OCR adapter CLI.
    #[serde(default = "default_ocr_cmd")]
    pub ocr_cmd: Vec<String>,
    /// Per-stream character budget for captured stdout/stderr.
    #[serde(default = "default_capture_limit")]
    pub capture_limit: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            splitter_cmd: default_splitter_cmd(),
            ocr_cmd: default_ocr_cmd(),
            capture_limit: default_capture_limit(),
        }
    }
}

fn default_splitter_cmd() -> Vec<String> {
    vec!["python3".to_string(), "-m".to_string(), "lg_pipeline".to_string()]
}

fn default_ocr_cmd() -> Vec<String> {
    vec!["python3".to_string(), "-m".to_string(), "ocr_adapter".to_string()]
}

fn default_capture_limit() -> usize {
    4000
}

/// Embedding stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Local model directory; embedding cannot run without one.
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub device: Option<String>,
}

impl EmbeddingConfig {
    pub fn with_model_path(mut self, model_path: impl Into<String>) -> Self {
        self.model_path = Some(model_path.into());
        self
    }

    pub fn resolve_model_path(&self, override_path: Option<&str>) -> Option<String> {
        override_path
            .map(str::to_string)
            .or_else(|| self.model_path.clone())
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            batch_size: default_batch_size(),
            device: None,
        }
    }
}

fn default_batch_size() -> usize {
    32
}

/// Vector index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_chroma_path")]
    pub chroma_path: String,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
}

impl IndexConfig {
    /// Resolve the collection name for a run.
    ///
    /// Priority: explicit override, then workspace name plus suffix, then
    /// the plain workspace name.
    pub fn collection_for(
        &self,
        workspace_id: &WorkspaceId,
        collection_override: Option<&str>,
        suffix: Option<&str>,
    ) -> String {
        match collection_override {
            Some(name) => name.to_string(),
            None => match suffix {
                Some(suffix) => format!("{}_{}_{}", self.collection_prefix, workspace_id, suffix),
                None => format!("{}_{}", self.collection_prefix, workspace_id),
            },
        }
    }

    pub fn resolve_chroma_path(&self, override_path: Option<&str>) -> String {
        override_path
            .map(str::to_string)
            .unwrap_or_else(|| self.chroma_path.clone())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chroma_path: default_chroma_path(),
            collection_prefix: default_collection_prefix(),
        }
    }
}

fn default_chroma_path() -> String {
    ".chroma".to_string()
}

fn default_collection_prefix() -> String {
    "ws".to_string()
}

/// Named-entity recognition stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NerConfig {
    /// Conda environment the NER tool runs inside.
    #[serde(default = "default_conda_env")]
    pub conda_env: String,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            conda_env: default_conda_env(),
        }
    }
}

fn default_conda_env() -> String {
    "ner_env".to_string()
}

/// Graph store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_uri")]
    pub uri: String,
    #[serde(default = "default_graph_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl GraphConfig {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Whether enough settings are present to reach the graph store.
    pub fn is_configured(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_graph_uri(),
            user: default_graph_user(),
            password: None,
        }
    }
}

fn default_graph_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_graph_user() -> String {
    "neo4j".to_string()
}

/// Inbound callback configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackConfig {
    /// Shared secret for the callback and mark-indexed routes; empty
    /// disables them.
    #[serde(default)]
    pub secret: String,
}

impl CallbackConfig {
    pub fn is_enabled(&self) -> bool {
        !self.secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DocketConfig::default();

        assert_eq!(config.server.port, 8182);
        assert!(!config.database.is_configured());
        assert_eq!(config.pipeline.chunk_size, 1200);
        assert_eq!(config.pipeline.chunk_overlap, 200);
        assert!(config.pipeline.ner_enabled);
        assert!(config.pipeline.max_concurrent_jobs > 0);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.index.chroma_path, ".chroma");
        assert_eq!(config.graph.uri, "bolt://localhost:7687");
        assert!(!config.graph.is_configured());
        assert!(!config.callback.is_enabled());
    }

    #[test]
    fn test_ocr_eligibility_is_case_insensitive() {
        let pipeline = PipelineConfig::default();

        assert!(pipeline.ocr_eligible("pdf"));
        assert!(pipeline.ocr_eligible("PDF"));
        assert!(pipeline.ocr_eligible("Tiff"));
        assert!(!pipeline.ocr_eligible("docx"));
    }

    #[test]
    fn test_stage_timeout_zero_disables() {
        let mut pipeline = PipelineConfig::default();
        assert_eq!(
            pipeline.stage_timeout(),
            Some(Duration::from_secs(1800))
        );

        pipeline.stage_timeout_secs = 0;
        assert_eq!(pipeline.stage_timeout(), None);
    }

    #[test]
    fn test_collection_resolution_priority() {
        let index = IndexConfig::default();
        let workspace_id = WorkspaceId::new();

        assert_eq!(
            index.collection_for(&workspace_id, Some("legal_briefs"), Some("drafts")),
            "legal_briefs"
        );
        assert_eq!(
            index.collection_for(&workspace_id, None, Some("drafts")),
            format!("ws_{}_drafts", workspace_id)
        );
        assert_eq!(
            index.collection_for(&workspace_id, None, None),
            format!("ws_{}", workspace_id)
        );
    }

    #[test]
    fn test_graph_configured_requires_nonempty_password() {
        let graph = GraphConfig::default();
        assert!(!graph.is_configured());
        assert!(!graph.clone().with_password("").is_configured());
        assert!(graph.with_password("s3cret").is_configured());
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig::new("/srv/docket/uploads", "/srv/docket/work");
        let job_id = JobId::new();

        assert_eq!(
            storage.absolute_source_path("ws1/contracts/a.pdf"),
            PathBuf::from("/srv/docket/uploads/ws1/contracts/a.pdf")
        );
        assert_eq!(
            storage.job_workdir(&job_id),
            PathBuf::from(format!("/srv/docket/work/{}", job_id))
        );
    }
}
