use axum::extract::State;
use axum::Json;
use seriesflow_clara::service::PipelineSummary;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/pipelines
///
/// Pipelines registered with the execution service.
pub async fn list_pipelines(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<PipelineSummary>>>> {
    let pipelines = state.coordinator.pipelines().await?;
    Ok(Json(DataResponse { data: pipelines }))
}
