use std::path::PathBuf;
use std::time::Duration;

use seriesflow_core::naming::DEFAULT_OUTPUT_MARKER;

/// Default interval between status polls of a running job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of consecutive failed status queries before a job is
/// marked failed.
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 5;

/// Settings shared by the coordinator, transfer engine, and reconciliation
/// supervisor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the per-job staging directories.
    pub staging_root: PathBuf,
    /// Root of the per-payload output directories.
    pub output_root: PathBuf,
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    /// Substring that marks a remote payload file as a pipeline output.
    pub output_marker: String,
    /// Upper bound on simultaneous uploads and downloads. `None` means
    /// unbounded.
    pub max_concurrent_transfers: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("input"),
            output_root: PathBuf::from("output"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
            output_marker: DEFAULT_OUTPUT_MARKER.to_string(),
            max_concurrent_transfers: None,
        }
    }
}
