use std::path::{Path, PathBuf};

use seriesflow_clara::error::RemoteError;
use seriesflow_core::error::CoreError;
use seriesflow_core::types::DbId;
use seriesflow_db::store::StoreError;

/// Errors from the orchestration engine.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A call to the remote execution service failed.
    #[error("Remote service error: {0}")]
    Remote(#[from] RemoteError),

    /// The job store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A local filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Series job {0} not found")]
    NotFound(DbId),

    /// The operation is not allowed in the job's current state.
    #[error("{0}")]
    Rejected(String),

    /// An uploaded file does not belong to the job's checklist.
    #[error("SOP instance '{sop_instance_uid}' is not in the checklist of job {job_id}")]
    ChecklistMismatch {
        job_id: DbId,
        sop_instance_uid: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Two selected outputs would be written to the same local file.
    #[error("Outputs '{first}' and '{second}' share the local file name '{file_name}'")]
    DuplicateOutput {
        first: String,
        second: String,
        file_name: String,
    },

    /// A background engine task ended without producing a result.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => PipelineError::Validation(msg),
        }
    }
}

/// Map an I/O error to [`PipelineError::Io`] tagged with `path`.
pub(crate) fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}
