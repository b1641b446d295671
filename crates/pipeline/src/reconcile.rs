//! Status reconciliation for running jobs.
//!
//! [`ReconcileSupervisor`] owns one poll task per job in `in_progress`,
//! keyed by job id. Each task queries the remote status every poll
//! interval until the remote job stops, then records the terminal status
//! and, on success, retrieves the outputs. Tasks share no state with one
//! another and are cancelled together on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use seriesflow_clara::service::{RemoteJobState, RemoteJobStatus};
use seriesflow_core::types::DbId;
use seriesflow_db::store::{JobStore, StoreError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::backoff::{next_delay, BackoffConfig};
use crate::config::EngineConfig;
use crate::outputs::OutputRetriever;
use crate::transfer::TransferEngine;

/// How long shutdown waits for each poll task to exit.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote identifiers a poll task works with.
#[derive(Debug, Clone)]
struct ArmedJob {
    job_id: DbId,
    remote_job_id: String,
    remote_payload_id: String,
}

/// Everything a poll task needs, cloned into each task.
#[derive(Clone)]
struct PollContext {
    store: Arc<dyn JobStore>,
    transfer: TransferEngine,
    retriever: OutputRetriever,
    poll_interval: Duration,
    max_poll_failures: u32,
    backoff: BackoffConfig,
}

/// How a poll task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Completed,
    Failed,
    Cancelled,
}

struct ManagedTask {
    handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns the poll tasks of all running jobs.
pub struct ReconcileSupervisor {
    tasks: RwLock<HashMap<DbId, ManagedTask>>,
    ctx: PollContext,
    /// Master token; every task token is a child of it.
    cancel: CancellationToken,
}

impl ReconcileSupervisor {
    pub fn new(store: Arc<dyn JobStore>, transfer: TransferEngine, config: &EngineConfig) -> Self {
        let retriever = OutputRetriever::new(transfer.clone(), config.output_marker.clone());
        Self {
            tasks: RwLock::new(HashMap::new()),
            ctx: PollContext {
                store,
                transfer,
                retriever,
                poll_interval: config.poll_interval,
                max_poll_failures: config.max_poll_failures.max(1),
                backoff: BackoffConfig::capped_at(config.poll_interval),
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Start polling `job_id`. The first poll happens one interval from
    /// now.
    ///
    /// Returns `false` without doing anything if the job already has a
    /// live poll task or the supervisor has been shut down.
    pub async fn arm(&self, job_id: DbId, remote_job_id: &str, remote_payload_id: &str) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let mut tasks = self.tasks.write().await;
        if tasks
            .get(&job_id)
            .is_some_and(|task| !task.handle.is_finished())
        {
            tracing::debug!(job_id, "Reconciliation already armed");
            return false;
        }

        let job = ArmedJob {
            job_id,
            remote_job_id: remote_job_id.to_string(),
            remote_payload_id: remote_payload_id.to_string(),
        };
        let cancel = self.cancel.child_token();
        let ctx = self.ctx.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(job_id, remote_job_id = %job.remote_job_id, "Reconciliation armed");
            let outcome = run_poll_loop(&ctx, &job, &task_cancel).await;
            tracing::info!(job_id, ?outcome, "Reconciliation task exited");
        });

        tasks.insert(job_id, ManagedTask { handle, cancel });
        true
    }

    /// Re-arm a poll task for every job left `in_progress`, typically by a
    /// previous process. Returns how many tasks were armed.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let jobs = self.ctx.store.list_in_progress().await?;
        let mut armed = 0;

        for job in jobs {
            match (job.remote_job_id.as_deref(), job.remote_payload_id.as_deref()) {
                (Some(remote_job_id), Some(remote_payload_id)) => {
                    if self.arm(job.id, remote_job_id, remote_payload_id).await {
                        armed += 1;
                    }
                }
                _ => {
                    tracing::warn!(
                        job_id = job.id,
                        "In-progress job has no remote identifiers, not re-arming",
                    );
                }
            }
        }

        tracing::info!(armed, "Recovered reconciliation tasks");
        Ok(armed)
    }

    /// Whether `job_id` has a live poll task.
    pub async fn is_armed(&self, job_id: DbId) -> bool {
        self.tasks
            .read()
            .await
            .get(&job_id)
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Number of live poll tasks.
    pub async fn active_count(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    /// Cancel every poll task and wait briefly for each to exit.
    ///
    /// Jobs stay `in_progress` in the store and are picked up again by
    /// [`recover`](Self::recover) on the next start.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down reconciliation supervisor");
        self.cancel.cancel();

        let mut tasks = self.tasks.write().await;
        for (job_id, task) in tasks.drain() {
            task.cancel.cancel();
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task.handle)
                .await
                .is_err()
            {
                tracing::warn!(job_id, "Reconciliation task did not stop in time");
            }
        }

        tracing::info!("Reconciliation supervisor shut down");
    }
}

/// Poll until the remote job stops, the failure budget runs out, or the
/// task is cancelled.
async fn run_poll_loop(ctx: &PollContext, job: &ArmedJob, cancel: &CancellationToken) -> PollOutcome {
    let job_id = job.job_id;
    let mut wait = ctx.poll_interval;
    let mut retry_delay = ctx.backoff.initial_delay;
    let mut failures = 0u32;
    let mut polls = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(wait) => {}
        }

        polls += 1;
        match ctx.transfer.service().job_status(&job.remote_job_id).await {
            Ok(report) => {
                failures = 0;
                retry_delay = ctx.backoff.initial_delay;
                wait = ctx.poll_interval;

                match (report.state, report.status) {
                    (RemoteJobState::Stopped, RemoteJobStatus::Healthy) => {
                        tracing::info!(job_id, polls, "Remote job finished healthy");
                        complete(ctx, job).await;
                        return PollOutcome::Completed;
                    }
                    (RemoteJobState::Stopped, status) => {
                        tracing::warn!(job_id, polls, %status, "Remote job stopped unhealthy");
                        fail(ctx, job_id, &format!("remote job stopped with status {status}")).await;
                        return PollOutcome::Failed;
                    }
                    (state, status) => {
                        tracing::debug!(job_id, polls, %state, %status, "Remote job still running");
                    }
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    job_id,
                    failures,
                    max = ctx.max_poll_failures,
                    error = %e,
                    "Status query failed",
                );
                if failures >= ctx.max_poll_failures {
                    fail(
                        ctx,
                        job_id,
                        &format!("status query failed {failures} times in a row: {e}"),
                    )
                    .await;
                    return PollOutcome::Failed;
                }
                wait = retry_delay;
                retry_delay = next_delay(retry_delay, &ctx.backoff);
            }
        }
    }
}

/// Mark the job completed, then retrieve and record its outputs.
///
/// A retrieval failure leaves the job completed with no outputs and the
/// failure recorded in its error message.
async fn complete(ctx: &PollContext, job: &ArmedJob) {
    let job_id = job.job_id;
    match ctx.store.mark_completed(job_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(job_id, "Job was no longer in progress, skipping completion");
            return;
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed to mark job completed");
            return;
        }
    }

    match ctx.retriever.retrieve(&job.remote_payload_id).await {
        Ok(outputs) => {
            tracing::info!(job_id, count = outputs.len(), "Outputs retrieved");
            if let Err(e) = ctx.store.set_outputs(job_id, &outputs).await {
                tracing::error!(job_id, error = %e, "Failed to record outputs");
            }
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Output retrieval failed");
            let message = format!("output retrieval failed: {e}");
            if let Err(e) = ctx.store.set_error_message(job_id, &message).await {
                tracing::error!(job_id, error = %e, "Failed to record retrieval error");
            }
        }
    }
}

async fn fail(ctx: &PollContext, job_id: DbId, reason: &str) {
    match ctx.store.mark_failed(job_id, reason).await {
        Ok(true) => tracing::info!(job_id, reason, "Job marked failed"),
        Ok(false) => tracing::warn!(job_id, "Job was no longer in progress, not marking failed"),
        Err(e) => tracing::error!(job_id, error = %e, "Failed to mark job failed"),
    }
}
