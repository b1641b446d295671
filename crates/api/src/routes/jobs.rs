//! Route definitions for the `/jobs` resource.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Largest multipart body accepted by the file upload route.
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> submit_job
/// GET    /{id}            -> get_job
/// POST   /{id}/files      -> upload_files
/// POST   /{id}/start      -> start_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job))
        .route(
            "/{id}/files",
            post(jobs::upload_files).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/{id}/start", post(jobs::start_job))
}
