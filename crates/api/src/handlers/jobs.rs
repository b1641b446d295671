//! Handlers for the `/jobs` resource.
//!
//! A series job is submitted with its SOP instance checklist, receives its
//! input files through one or more multipart uploads, and is then started.
//! Status moves to `completed` or `failed` in the background.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use seriesflow_core::error::CoreError;
use seriesflow_core::types::DbId;
use seriesflow_db::models::job::{NewSeriesJob, SeriesJob};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSeriesJob {
    #[validate(length(min = 1, max = 128))]
    pub study_instance_uid: String,
    #[validate(length(min = 1, max = 128))]
    pub series_instance_uid: String,
    #[validate(length(min = 1))]
    pub sop_instance_uids: Vec<String>,
    #[validate(length(min = 1, max = 128))]
    pub pipeline_id: String,
}

impl From<SubmitSeriesJob> for NewSeriesJob {
    fn from(input: SubmitSeriesJob) -> Self {
        Self {
            study_instance_uid: input.study_instance_uid,
            series_instance_uid: input.series_instance_uid,
            pipeline_id: input.pipeline_id,
            sop_instance_uids: input.sop_instance_uids,
        }
    }
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a series job. Returns 201 with the created job, or 200 with the
/// existing job when the series was already submitted for this pipeline.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitSeriesJob>,
) -> AppResult<(StatusCode, Json<DataResponse<SeriesJob>>)> {
    input
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    let (job, created) = state.coordinator.submit(&input.into()).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<SeriesJob>>>> {
    let jobs = state.coordinator.list().await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<Json<DataResponse<SeriesJob>>> {
    let job = state.coordinator.get(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/files
///
/// Accept input files as multipart fields, one per SOP instance. The field
/// name is the SOP instance UID. Returns the job with its checklist after
/// the last file was recorded.
pub async fn upload_files(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    mut multipart: Multipart,
) -> AppResult<Json<DataResponse<SeriesJob>>> {
    let mut latest = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let sop_instance_uid = field
            .name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::BadRequest("Multipart field is missing its SOP instance UID".into())
            })?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let job = state
            .coordinator
            .record_upload(job_id, &sop_instance_uid, &bytes)
            .await?;
        tracing::debug!(
            job_id,
            sop_instance_uid = %sop_instance_uid,
            size = bytes.len(),
            uploaded = job.uploaded_count(),
            expected = job.checklist.len(),
            "Input file staged",
        );
        latest = Some(job);
    }

    let job = latest.ok_or_else(|| {
        AppError::BadRequest("No files received in multipart upload".to_string())
    })?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/start
///
/// Create the remote job, stream the staged files to it, and start it.
/// Returns the job in `in_progress`; completion is tracked in the
/// background.
pub async fn start_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<Json<DataResponse<SeriesJob>>> {
    let job = state.coordinator.start(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}
