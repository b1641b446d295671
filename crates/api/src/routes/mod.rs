pub mod health;
pub mod jobs;
pub mod pipelines;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /pipelines                 list pipelines offered by the execution service
///
/// /jobs                      list, submit
/// /jobs/{id}                 get
/// /jobs/{id}/files           upload input files (multipart)
/// /jobs/{id}/start           start remote execution (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/pipelines", pipelines::router())
        .nest("/jobs", jobs::router())
}
