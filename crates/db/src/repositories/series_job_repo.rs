//! Repository for the `series_jobs` and `series_job_checklist` tables.
//!
//! Every lifecycle update is conditional on the expected prior status so
//! transitions stay monotonic even with several writers.

use std::collections::HashMap;

use seriesflow_core::job_status::JobStatus;
use seriesflow_core::types::DbId;
use sqlx::PgPool;

use crate::models::job::{ChecklistRow, NewSeriesJob, SeriesJob, SeriesJobRow};

/// Column list for `series_jobs` queries.
const COLUMNS: &str = "\
    id, study_instance_uid, series_instance_uid, pipeline_id, \
    remote_job_id, remote_payload_id, status_id, outputs, error_message, \
    created_at, updated_at";

/// Column list for `series_job_checklist` queries.
const CHECKLIST_COLUMNS: &str = "job_id, position, sop_instance_uid, uploaded";

/// Provides queries and lifecycle updates for series jobs.
pub struct SeriesJobRepo;

impl SeriesJobRepo {
    /// Insert a pending job and its checklist unless a job already exists
    /// for the same `(series_instance_uid, pipeline_id)`.
    ///
    /// Returns the job and `true` when it was created by this call. The
    /// unique constraint makes concurrent submissions of the same key
    /// resolve to one row.
    pub async fn create_if_absent(
        pool: &PgPool,
        input: &NewSeriesJob,
    ) -> Result<(SeriesJob, bool), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO series_jobs (study_instance_uid, series_instance_uid, pipeline_id, status_id) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT ON CONSTRAINT uq_series_jobs_series_pipeline DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, SeriesJobRow>(&query)
            .bind(&input.study_instance_uid)
            .bind(&input.series_instance_uid)
            .bind(&input.pipeline_id)
            .bind(JobStatus::Pending.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = inserted else {
            tx.rollback().await?;
            let existing =
                Self::find_by_key(pool, &input.series_instance_uid, &input.pipeline_id)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
            return Ok((existing, false));
        };

        let checklist_query = format!(
            "INSERT INTO series_job_checklist (job_id, position, sop_instance_uid) \
             SELECT $1, (t.ord - 1)::INTEGER, t.uid \
             FROM UNNEST($2::TEXT[]) WITH ORDINALITY AS t(uid, ord) \
             RETURNING {CHECKLIST_COLUMNS}"
        );
        let mut checklist = sqlx::query_as::<_, ChecklistRow>(&checklist_query)
            .bind(row.id)
            .bind(&input.sop_instance_uids)
            .fetch_all(&mut *tx)
            .await?;
        checklist.sort_by_key(|entry| entry.position);

        tx.commit().await?;

        let job = into_job(row, checklist)?;
        Ok((job, true))
    }

    /// Find a job by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<SeriesJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM series_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, SeriesJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        match row {
            Some(row) => Self::with_checklist(pool, row).await.map(Some),
            None => Ok(None),
        }
    }

    /// Find the job for a `(series_instance_uid, pipeline_id)` pair.
    pub async fn find_by_key(
        pool: &PgPool,
        series_instance_uid: &str,
        pipeline_id: &str,
    ) -> Result<Option<SeriesJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM series_jobs \
             WHERE series_instance_uid = $1 AND pipeline_id = $2"
        );
        let row = sqlx::query_as::<_, SeriesJobRow>(&query)
            .bind(series_instance_uid)
            .bind(pipeline_id)
            .fetch_optional(pool)
            .await?;
        match row {
            Some(row) => Self::with_checklist(pool, row).await.map(Some),
            None => Ok(None),
        }
    }

    /// List all jobs, oldest first.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<SeriesJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM series_jobs ORDER BY id ASC");
        let rows = sqlx::query_as::<_, SeriesJobRow>(&query)
            .fetch_all(pool)
            .await?;
        Self::with_checklists(pool, rows).await
    }

    /// List jobs currently in `status`, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        status: JobStatus,
    ) -> Result<Vec<SeriesJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM series_jobs WHERE status_id = $1 ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, SeriesJobRow>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await?;
        Self::with_checklists(pool, rows).await
    }

    /// Set `uploaded = true` on the single checklist entry matching
    /// `sop_instance_uid`.
    ///
    /// The update touches one row, so concurrent calls for different
    /// entries of the same job never overwrite each other. Returns `false`
    /// when no entry matches.
    pub async fn mark_uploaded(
        pool: &PgPool,
        job_id: DbId,
        sop_instance_uid: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE series_job_checklist SET uploaded = TRUE \
             WHERE job_id = $1 AND sop_instance_uid = $2",
        )
        .bind(job_id)
        .bind(sop_instance_uid)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the remote identifiers and move a pending job to `in_progress`.
    ///
    /// Returns `false` if the job was not pending.
    pub async fn mark_in_progress(
        pool: &PgPool,
        job_id: DbId,
        remote_job_id: &str,
        remote_payload_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE series_jobs \
             SET remote_job_id = $2, remote_payload_id = $3, status_id = $4, updated_at = NOW() \
             WHERE id = $1 AND status_id = $5",
        )
        .bind(job_id)
        .bind(remote_job_id)
        .bind(remote_payload_id)
        .bind(JobStatus::InProgress.id())
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move an in-progress job to `completed`.
    pub async fn mark_completed(pool: &PgPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE series_jobs SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(job_id)
        .bind(JobStatus::Completed.id())
        .bind(JobStatus::InProgress.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move an in-progress job to `failed`, recording why.
    pub async fn mark_failed(
        pool: &PgPool,
        job_id: DbId,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE series_jobs SET status_id = $2, error_message = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(job_id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .bind(JobStatus::InProgress.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store the output file names of a completed job. Outputs are written
    /// at most once.
    pub async fn set_outputs(
        pool: &PgPool,
        job_id: DbId,
        outputs: &[String],
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE series_jobs SET outputs = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = $3 AND outputs IS NULL",
        )
        .bind(job_id)
        .bind(outputs)
        .bind(JobStatus::Completed.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the error message without touching the status.
    pub async fn set_error_message(
        pool: &PgPool,
        job_id: DbId,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE series_jobs SET error_message = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- private helpers ----

    async fn with_checklist(pool: &PgPool, row: SeriesJobRow) -> Result<SeriesJob, sqlx::Error> {
        let query = format!(
            "SELECT {CHECKLIST_COLUMNS} FROM series_job_checklist \
             WHERE job_id = $1 ORDER BY position ASC"
        );
        let checklist = sqlx::query_as::<_, ChecklistRow>(&query)
            .bind(row.id)
            .fetch_all(pool)
            .await?;
        into_job(row, checklist)
    }

    /// Load the checklists of many jobs with one query.
    async fn with_checklists(
        pool: &PgPool,
        rows: Vec<SeriesJobRow>,
    ) -> Result<Vec<SeriesJob>, sqlx::Error> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<DbId> = rows.iter().map(|row| row.id).collect();
        let query = format!(
            "SELECT {CHECKLIST_COLUMNS} FROM series_job_checklist \
             WHERE job_id = ANY($1) ORDER BY job_id ASC, position ASC"
        );
        let entries = sqlx::query_as::<_, ChecklistRow>(&query)
            .bind(&ids)
            .fetch_all(pool)
            .await?;

        let mut by_job: HashMap<DbId, Vec<ChecklistRow>> = HashMap::new();
        for entry in entries {
            by_job.entry(entry.job_id).or_default().push(entry);
        }

        rows.into_iter()
            .map(|row| {
                let checklist = by_job.remove(&row.id).unwrap_or_default();
                into_job(row, checklist)
            })
            .collect()
    }
}

fn into_job(row: SeriesJobRow, checklist: Vec<ChecklistRow>) -> Result<SeriesJob, sqlx::Error> {
    let (id, status_id) = (row.id, row.status_id);
    row.into_job(checklist).ok_or_else(|| {
        sqlx::Error::Decode(format!("series job {id} has unknown status_id {status_id}").into())
    })
}
