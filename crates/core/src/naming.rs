//! Naming rules for staged inputs, remote jobs, and downloaded outputs.
//!
//! A job's staging directory and its remote job name share the same key,
//! `<series_instance_uid>-<pipeline_id>`, so uploads for unrelated jobs
//! never land in the same directory.

/// Extension appended to every staged SOP instance file.
pub const STAGED_FILE_EXTENSION: &str = "dcm";

/// Default substring that marks a remote payload file as a pipeline output.
pub const DEFAULT_OUTPUT_MARKER: &str = "/segmentation";

/// Deterministic key for a `(series, pipeline)` pair.
///
/// Used both as the staging directory name and as the remote job name.
pub fn job_key(series_instance_uid: &str, pipeline_id: &str) -> String {
    format!("{series_instance_uid}-{pipeline_id}")
}

/// File name under which an uploaded SOP instance is staged.
pub fn staged_file_name(sop_instance_uid: &str) -> String {
    format!("{sop_instance_uid}.{STAGED_FILE_EXTENSION}")
}

/// Remote payload paths are reported with a leading `/`, but download
/// requests expect the path without it.
pub fn remote_request_name(remote_name: &str) -> &str {
    remote_name.strip_prefix('/').unwrap_or(remote_name)
}

/// Base name of a remote payload path, used as the local output file name.
pub fn output_file_name(remote_name: &str) -> &str {
    remote_name
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(remote_name)
}

/// Whether a remote payload path is a pipeline output under `marker`.
pub fn is_output(remote_name: &str, marker: &str) -> bool {
    remote_name.contains(marker)
}
