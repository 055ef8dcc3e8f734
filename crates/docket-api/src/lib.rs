//! HTTP API for the Docket ingestion service
//!
//! Exposes upload registration, job submission and inspection, and the
//! secret-guarded external callback routes, all nested under `/api/v1`.
//! Handlers stay thin: validation and orchestration live in
//! `docket-pipeline`, storage behind the `docket-store` traits.

pub mod error;
pub mod handlers;
pub mod router;
pub mod secret;
pub mod state;

pub use error::ApiError;
pub use router::create_router;
pub use state::AppState;
