//! Axum router configuration

use crate::{handlers, AppState};
use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    // Create the API v1 router
    let api_v1 = Router::new()
        // Upload routes
        .route("/uploads", post(handlers::register_upload))
        .route("/uploads/:id/ingest", post(handlers::submit_ingest))
        .route("/uploads/:id/jobs", get(handlers::list_upload_jobs))
        .route("/uploads/:id/mark-indexed", post(handlers::mark_indexed))
        // Job routes
        .route("/jobs/:id", get(handlers::get_job))
        .route("/jobs/:id/callback", post(handlers::job_callback));

    // Health check routes (outside the versioned prefix)
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check));

    // Combine all routes
    Router::new()
        .nest("/api/v1", api_v1)
        .merge(health_routes)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Configure CORS layer
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            HeaderName::from_static(crate::secret::SECRET_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}
