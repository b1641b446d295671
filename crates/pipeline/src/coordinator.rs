//! Job submission, staged uploads, and job start.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use seriesflow_clara::service::PipelineSummary;
use seriesflow_core::job_status::JobStatus;
use seriesflow_core::naming::{job_key, staged_file_name};
use seriesflow_core::types::DbId;
use seriesflow_core::validation::{validate_identifier, validate_submission};
use seriesflow_db::models::job::{NewSeriesJob, SeriesJob};
use seriesflow_db::store::JobStore;
use tokio::fs;

use crate::config::EngineConfig;
use crate::error::{io_at, PipelineError};
use crate::reconcile::ReconcileSupervisor;
use crate::transfer::TransferEngine;

/// Front door of the engine: creates jobs, stages their input files, and
/// hands started jobs to the [`ReconcileSupervisor`].
pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    transfer: TransferEngine,
    supervisor: Arc<ReconcileSupervisor>,
    staging_root: PathBuf,
    /// Jobs with a start in flight in this process.
    starting: Arc<Mutex<HashSet<DbId>>>,
}

/// Removes a job from the in-flight start set when dropped.
struct StartGuard {
    starting: Arc<Mutex<HashSet<DbId>>>,
    job_id: DbId,
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        self.starting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Everything a detached start task needs.
struct StartRun {
    store: Arc<dyn JobStore>,
    transfer: TransferEngine,
    supervisor: Arc<ReconcileSupervisor>,
    staging_dir: PathBuf,
    job: SeriesJob,
}

impl JobCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        transfer: TransferEngine,
        supervisor: Arc<ReconcileSupervisor>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            transfer,
            supervisor,
            staging_root: config.staging_root.clone(),
            starting: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Staging directory of a job, `<staging_root>/<series>-<pipeline>`.
    pub fn staging_dir(&self, job: &SeriesJob) -> PathBuf {
        self.staging_root
            .join(job_key(&job.series_instance_uid, &job.pipeline_id))
    }

    /// Create a pending job, or return the existing job for the same
    /// `(series_instance_uid, pipeline_id)` unchanged.
    ///
    /// Returns the job and whether this call created it.
    pub async fn submit(&self, input: &NewSeriesJob) -> Result<(SeriesJob, bool), PipelineError> {
        validate_submission(
            &input.study_instance_uid,
            &input.series_instance_uid,
            &input.sop_instance_uids,
            &input.pipeline_id,
        )?;

        let (job, created) = self.store.create_if_absent(input).await?;
        if created {
            let dir = self.staging_dir(&job);
            fs::create_dir_all(&dir).await.map_err(io_at(&dir))?;
            tracing::info!(
                job_id = job.id,
                series_instance_uid = %job.series_instance_uid,
                pipeline_id = %job.pipeline_id,
                files = job.checklist.len(),
                "Series job created",
            );
        } else {
            tracing::info!(job_id = job.id, status = %job.status, "Series job already exists");
        }
        Ok((job, created))
    }

    /// Stage one input file and tick its checklist entry.
    ///
    /// A file whose SOP instance UID is not in the checklist is rejected
    /// and removed from staging again.
    pub async fn record_upload(
        &self,
        job_id: DbId,
        sop_instance_uid: &str,
        bytes: &[u8],
    ) -> Result<SeriesJob, PipelineError> {
        validate_identifier("sopInstanceUid", sop_instance_uid)?;
        let job = self.get(job_id).await?;

        let dir = self.staging_dir(&job);
        fs::create_dir_all(&dir).await.map_err(io_at(&dir))?;
        let path = dir.join(staged_file_name(sop_instance_uid));
        fs::write(&path, bytes).await.map_err(io_at(&path))?;

        if !self.store.mark_uploaded(job_id, sop_instance_uid).await? {
            discard_staged(&path).await;
            tracing::warn!(job_id, sop_instance_uid, "Upload does not match checklist");
            return Err(PipelineError::ChecklistMismatch {
                job_id,
                sop_instance_uid: sop_instance_uid.to_string(),
            });
        }

        tracing::debug!(job_id, sop_instance_uid, bytes = bytes.len(), "Input file staged");
        self.get(job_id).await
    }

    /// Create the remote job, upload the staged inputs, start it, and arm
    /// reconciliation.
    ///
    /// Only a `pending` job with no other start in flight can be started.
    /// The remote steps run on a task owned by the engine, so dropping the
    /// returned future does not interrupt them; the job stays claimed until
    /// that task ends. Any remote failure leaves the job `pending`; the next
    /// start begins again with a fresh remote job.
    pub async fn start(&self, job_id: DbId) -> Result<SeriesJob, PipelineError> {
        let guard = self.begin_start(job_id)?;
        let job = self.get(job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(PipelineError::Rejected(format!(
                "Series job {job_id} is {} and cannot be started",
                job.status
            )));
        }

        let run = StartRun {
            store: Arc::clone(&self.store),
            transfer: self.transfer.clone(),
            supervisor: Arc::clone(&self.supervisor),
            staging_dir: self.staging_dir(&job),
            job,
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run.execute().await
        });

        handle.await.map_err(|e| {
            PipelineError::Internal(format!("start of series job {job_id} aborted: {e}"))
        })??;
        self.get(job_id).await
    }

    pub async fn get(&self, job_id: DbId) -> Result<SeriesJob, PipelineError> {
        self.store
            .find_by_id(job_id)
            .await?
            .ok_or(PipelineError::NotFound(job_id))
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Result<Vec<SeriesJob>, PipelineError> {
        Ok(self.store.list().await?)
    }

    /// Pipelines registered on the remote service.
    pub async fn pipelines(&self) -> Result<Vec<PipelineSummary>, PipelineError> {
        let stream = self.transfer.service().list_pipelines().await?;
        Ok(stream.collect_all().await?)
    }

    fn begin_start(&self, job_id: DbId) -> Result<StartGuard, PipelineError> {
        let mut starting = self
            .starting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !starting.insert(job_id) {
            return Err(PipelineError::Rejected(format!(
                "Series job {job_id} is already being started"
            )));
        }
        Ok(StartGuard {
            starting: Arc::clone(&self.starting),
            job_id,
        })
    }
}

impl StartRun {
    async fn execute(self) -> Result<(), PipelineError> {
        let job_id = self.job.id;
        let name = job_key(&self.job.series_instance_uid, &self.job.pipeline_id);
        let service = self.transfer.service();

        let created = service.create_job(&self.job.pipeline_id, &name).await?;
        tracing::info!(
            job_id,
            remote_job_id = %created.remote_job_id,
            remote_payload_id = %created.remote_payload_id,
            "Remote job created",
        );

        self.transfer
            .upload(&self.staging_dir, &created.remote_payload_id)
            .await?;
        service.start_job(&created.remote_job_id).await?;

        let moved = self
            .store
            .mark_in_progress(job_id, &created.remote_job_id, &created.remote_payload_id)
            .await?;
        if !moved {
            tracing::warn!(
                job_id,
                remote_job_id = %created.remote_job_id,
                "Job left pending while starting; remote job is orphaned",
            );
            return Err(PipelineError::Rejected(format!(
                "Series job {job_id} is no longer pending"
            )));
        }

        self.supervisor
            .arm(job_id, &created.remote_job_id, &created.remote_payload_id)
            .await;
        tracing::info!(job_id, "Series job started");
        Ok(())
    }
}

async fn discard_staged(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged file");
        }
    }
}
