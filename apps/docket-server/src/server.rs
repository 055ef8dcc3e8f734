//! HTTP server implementation

use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{error, info};

use docket_api::{create_router, AppState as ApiAppState};

use crate::app::AppState;

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .server
            .address()
            .parse()
            .context("Invalid listen address")?;

        let app = self.build_http_router();

        info!("HTTP server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind HTTP server")?;

        let dispatcher = self.state.dispatcher.clone();
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;

        // Let in-flight ingestion jobs reach a terminal state before the
        // process exits.
        info!("Draining running ingestion jobs");
        dispatcher.shutdown().await;

        Ok(())
    }

    fn build_http_router(&self) -> Router {
        let api_state = ApiAppState::new(
            self.state.config.clone(),
            self.state.jobs.clone(),
            self.state.uploads.clone(),
            self.state.dispatcher.clone(),
        );

        Router::new()
            .route("/", get(root))
            .merge(create_router(api_state))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

// Route handlers

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Docket Ingestion Service",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "Docket Ingestion Service");
        assert_eq!(response.0["status"], "running");
    }
}
