//! Application state and initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use docket_core::DocketConfig;
use docket_pipeline::{JobDispatcher, SubprocessInvoker};
use docket_store::{
    create_pool, run_migrations, JobStore, MemoryJobStore, MemoryUploadStore, PgJobStore,
    PgUploadStore, UploadStore,
};

use crate::cli::Args;
use crate::server::Server;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DocketConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub uploads: Arc<dyn UploadStore>,
    pub dispatcher: JobDispatcher,
}

impl AppState {
    /// Create application state from the process environment.
    pub async fn new(args: &Args) -> Result<Self> {
        let mut config = DocketConfig::load().context("Failed to load configuration")?;
        if let Some(port) = args.port {
            config.server.port = port;
        }
        Self::with_config(Arc::new(config), args).await
    }

    /// Create application state around an already-built configuration.
    pub async fn with_config(config: Arc<DocketConfig>, args: &Args) -> Result<Self> {
        info!("Initializing application components");

        tokio::fs::create_dir_all(&config.storage.data_root)
            .await
            .context("Failed to create upload data root")?;
        tokio::fs::create_dir_all(&config.storage.work_root)
            .await
            .context("Failed to create job work root")?;

        let (jobs, uploads): (Arc<dyn JobStore>, Arc<dyn UploadStore>) =
            if config.database.is_configured() && !args.memory_stores {
                info!("Using Postgres job and upload stores");
                let pool = create_pool(&config.database)
                    .await
                    .context("Failed to connect to the database")?;
                run_migrations(&pool)
                    .await
                    .context("Failed to run database migrations")?;
                (
                    Arc::new(PgJobStore::new(pool.clone())),
                    Arc::new(PgUploadStore::new(pool)),
                )
            } else {
                info!("Using in-memory job and upload stores");
                (
                    Arc::new(MemoryJobStore::new()),
                    Arc::new(MemoryUploadStore::new()),
                )
            };

        let invoker = Arc::new(SubprocessInvoker::from_config(&config));
        let dispatcher = JobDispatcher::new(config.clone(), jobs.clone(), uploads.clone(), invoker);

        Ok(Self {
            config,
            jobs,
            uploads,
            dispatcher,
        })
    }
}

/// Main application
pub struct App {
    state: AppState,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        let state = AppState::new(&args).await?;
        Ok(Self { state })
    }

    /// Run the application
    pub async fn run(self) -> Result<()> {
        info!("Starting server");
        info!("Listen address: {}", self.state.config.server.address());

        let server = Server::new(self.state);
        server.run().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::config::StorageConfig;

    #[tokio::test]
    async fn test_app_state_defaults_to_memory_stores() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DocketConfig::default();
        config.storage = StorageConfig::new(dir.path().join("uploads"), dir.path().join("work"));

        let args = Args {
            port: None,
            log_level: "info".to_string(),
            json_logs: false,
            memory_stores: false,
        };
        let state = AppState::with_config(Arc::new(config), &args).await.unwrap();

        // An unconfigured database URL selects the in-memory backend; the
        // store is immediately usable.
        let upload = docket_core::Upload::new(
            docket_core::WorkspaceId::new(),
            "ws/brief.docx",
            "application/octet-stream",
        );
        state.uploads.create(&upload).await.unwrap();
        assert!(state.uploads.get(upload.id).await.is_ok());
        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("work").is_dir());
    }
}
