//! Shared handler state

use std::sync::Arc;

use docket_core::DocketConfig;
use docket_pipeline::JobDispatcher;
use docket_store::{JobStore, UploadStore};

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppState {
    pub config: Arc<DocketConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub uploads: Arc<dyn UploadStore>,
    pub dispatcher: JobDispatcher,
}

impl AppState {
    pub fn new(
        config: Arc<DocketConfig>,
        jobs: Arc<dyn JobStore>,
        uploads: Arc<dyn UploadStore>,
        dispatcher: JobDispatcher,
    ) -> Self {
        Self {
            config,
            jobs,
            uploads,
            dispatcher,
        }
    }
}
