use axum::routing::get;
use axum::Router;

use crate::handlers::pipelines;
use crate::state::AppState;

/// Routes mounted at `/pipelines`.
///
/// ```text
/// GET    /                -> list_pipelines
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(pipelines::list_pipelines))
}
