//! The job store contract used by the orchestration engine.
//!
//! Every mutation is a single atomic primitive: create-if-absent by key,
//! update of one checklist entry, and status transitions conditional on
//! the prior status. Callers never read-modify-write whole records.

use std::collections::BTreeMap;

use async_trait::async_trait;
use seriesflow_core::job_status::JobStatus;
use seriesflow_core::types::DbId;
use tokio::sync::RwLock;

use crate::models::job::{ChecklistEntry, NewSeriesJob, SeriesJob};
use crate::repositories::SeriesJobRepo;
use crate::DbPool;

/// Errors from a [`JobStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence operations for series jobs.
///
/// All `mark_*`/`set_*` methods return `false` when the job does not exist
/// or is not in the state the transition requires.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All jobs, oldest first.
    async fn list(&self) -> Result<Vec<SeriesJob>, StoreError>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<SeriesJob>, StoreError>;

    async fn find_by_key(
        &self,
        series_instance_uid: &str,
        pipeline_id: &str,
    ) -> Result<Option<SeriesJob>, StoreError>;

    /// Create a pending job unless one already exists for the same
    /// `(series_instance_uid, pipeline_id)`. Returns `(job, created)`.
    async fn create_if_absent(&self, input: &NewSeriesJob)
        -> Result<(SeriesJob, bool), StoreError>;

    /// Atomically mark one checklist entry as uploaded. Returns `false` if
    /// no entry matches `sop_instance_uid`.
    async fn mark_uploaded(&self, id: DbId, sop_instance_uid: &str) -> Result<bool, StoreError>;

    /// `pending -> in_progress`, recording the remote identifiers.
    async fn mark_in_progress(
        &self,
        id: DbId,
        remote_job_id: &str,
        remote_payload_id: &str,
    ) -> Result<bool, StoreError>;

    /// `in_progress -> completed`.
    async fn mark_completed(&self, id: DbId) -> Result<bool, StoreError>;

    /// `in_progress -> failed`, recording the reason.
    async fn mark_failed(&self, id: DbId, error: &str) -> Result<bool, StoreError>;

    /// Store output names on a completed job that has none yet.
    async fn set_outputs(&self, id: DbId, outputs: &[String]) -> Result<bool, StoreError>;

    async fn set_error_message(&self, id: DbId, error: &str) -> Result<bool, StoreError>;

    /// Jobs in `in_progress`, used to re-arm reconciliation at startup.
    async fn list_in_progress(&self) -> Result<Vec<SeriesJob>, StoreError>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`JobStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn list(&self) -> Result<Vec<SeriesJob>, StoreError> {
        Ok(SeriesJobRepo::list_all(&self.pool).await?)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<SeriesJob>, StoreError> {
        Ok(SeriesJobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_key(
        &self,
        series_instance_uid: &str,
        pipeline_id: &str,
    ) -> Result<Option<SeriesJob>, StoreError> {
        Ok(SeriesJobRepo::find_by_key(&self.pool, series_instance_uid, pipeline_id).await?)
    }

    async fn create_if_absent(
        &self,
        input: &NewSeriesJob,
    ) -> Result<(SeriesJob, bool), StoreError> {
        Ok(SeriesJobRepo::create_if_absent(&self.pool, input).await?)
    }

    async fn mark_uploaded(&self, id: DbId, sop_instance_uid: &str) -> Result<bool, StoreError> {
        Ok(SeriesJobRepo::mark_uploaded(&self.pool, id, sop_instance_uid).await?)
    }

    async fn mark_in_progress(
        &self,
        id: DbId,
        remote_job_id: &str,
        remote_payload_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(
            SeriesJobRepo::mark_in_progress(&self.pool, id, remote_job_id, remote_payload_id)
                .await?,
        )
    }

    async fn mark_completed(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(SeriesJobRepo::mark_completed(&self.pool, id).await?)
    }

    async fn mark_failed(&self, id: DbId, error: &str) -> Result<bool, StoreError> {
        Ok(SeriesJobRepo::mark_failed(&self.pool, id, error).await?)
    }

    async fn set_outputs(&self, id: DbId, outputs: &[String]) -> Result<bool, StoreError> {
        Ok(SeriesJobRepo::set_outputs(&self.pool, id, outputs).await?)
    }

    async fn set_error_message(&self, id: DbId, error: &str) -> Result<bool, StoreError> {
        Ok(SeriesJobRepo::set_error_message(&self.pool, id, error).await?)
    }

    async fn list_in_progress(&self) -> Result<Vec<SeriesJob>, StoreError> {
        Ok(SeriesJobRepo::list_by_status(&self.pool, JobStatus::InProgress).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// [`JobStore`] that keeps jobs in process memory.
///
/// Used when no database is configured and by tests. Each operation holds
/// the lock for its whole duration, so create-if-absent and single-entry
/// updates are atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: DbId,
    jobs: BTreeMap<DbId, SeriesJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` to job `id` if its status is `expected`.
    async fn transition(
        &self,
        id: DbId,
        expected: JobStatus,
        update: impl FnOnce(&mut SeriesJob),
    ) -> bool {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == expected => {
                update(job);
                job.updated_at = chrono::Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn list(&self) -> Result<Vec<SeriesJob>, StoreError> {
        Ok(self.state.read().await.jobs.values().cloned().collect())
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<SeriesJob>, StoreError> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn find_by_key(
        &self,
        series_instance_uid: &str,
        pipeline_id: &str,
    ) -> Result<Option<SeriesJob>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .find(|job| {
                job.series_instance_uid == series_instance_uid && job.pipeline_id == pipeline_id
            })
            .cloned())
    }

    async fn create_if_absent(
        &self,
        input: &NewSeriesJob,
    ) -> Result<(SeriesJob, bool), StoreError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.jobs.values().find(|job| {
            job.series_instance_uid == input.series_instance_uid
                && job.pipeline_id == input.pipeline_id
        }) {
            return Ok((existing.clone(), false));
        }

        state.next_id += 1;
        let now = chrono::Utc::now();
        let job = SeriesJob {
            id: state.next_id,
            study_instance_uid: input.study_instance_uid.clone(),
            series_instance_uid: input.series_instance_uid.clone(),
            pipeline_id: input.pipeline_id.clone(),
            checklist: input
                .sop_instance_uids
                .iter()
                .map(ChecklistEntry::pending)
                .collect(),
            remote_job_id: None,
            remote_payload_id: None,
            status: JobStatus::Pending,
            outputs: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok((job, true))
    }

    async fn mark_uploaded(&self, id: DbId, sop_instance_uid: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let entry = state.jobs.get_mut(&id).and_then(|job| {
            job.checklist
                .iter_mut()
                .find(|entry| entry.sop_instance_uid == sop_instance_uid)
        });
        Ok(match entry {
            Some(entry) => {
                entry.uploaded = true;
                true
            }
            None => false,
        })
    }

    async fn mark_in_progress(
        &self,
        id: DbId,
        remote_job_id: &str,
        remote_payload_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .transition(id, JobStatus::Pending, |job| {
                job.remote_job_id = Some(remote_job_id.to_string());
                job.remote_payload_id = Some(remote_payload_id.to_string());
                job.status = JobStatus::InProgress;
            })
            .await)
    }

    async fn mark_completed(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(self
            .transition(id, JobStatus::InProgress, |job| {
                job.status = JobStatus::Completed;
            })
            .await)
    }

    async fn mark_failed(&self, id: DbId, error: &str) -> Result<bool, StoreError> {
        Ok(self
            .transition(id, JobStatus::InProgress, |job| {
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
            })
            .await)
    }

    async fn set_outputs(&self, id: DbId, outputs: &[String]) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Completed && job.outputs.is_none() => {
                job.outputs = Some(outputs.to_vec());
                job.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_error_message(&self, id: DbId, error: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job) => {
                job.error_message = Some(error.to_string());
                job.updated_at = chrono::Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_in_progress(&self) -> Result<Vec<SeriesJob>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
