//! The remote execution service as seen by the orchestration engine.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RemoteError;
use crate::stream::{FrameStream, UploadSink};

/// Identifiers returned when a remote job is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedJob {
    pub remote_job_id: String,
    pub remote_payload_id: String,
}

/// Lifecycle state of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteJobState {
    Unknown,
    Pending,
    Running,
    Stopped,
}

/// Outcome of a remote job. Only meaningful once the job is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteJobStatus {
    Unknown,
    Healthy,
    Faulted,
    Canceled,
}

impl fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "UNKNOWN",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        })
    }
}

impl fmt::Display for RemoteJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "UNKNOWN",
            Self::Healthy => "HEALTHY",
            Self::Faulted => "FAULTED",
            Self::Canceled => "CANCELED",
        })
    }
}

/// One status observation of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteJobReport {
    pub state: RemoteJobState,
    pub status: RemoteJobStatus,
}

/// One chunk of a payload file sent on the upload stream.
///
/// `file_size` is the total size of the file; `data` is the chunk at the
/// current offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFrame {
    pub payload_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub data: Vec<u8>,
}

/// A file stored in a remote payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    pub name: String,
    pub size: u64,
    pub mode: u32,
}

/// A pipeline registered on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub pipeline_id: String,
    pub name: String,
}

/// Operations the engine needs from the remote execution service.
///
/// Streaming operations return as soon as the stream is open; failures
/// that happen mid-stream are reported through the stream's terminal
/// status.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Create a job for `pipeline_id` under a caller-chosen display name.
    async fn create_job(&self, pipeline_id: &str, name: &str) -> Result<CreatedJob, RemoteError>;

    /// Start a created job whose payload has been uploaded.
    async fn start_job(&self, remote_job_id: &str) -> Result<(), RemoteError>;

    async fn job_status(&self, remote_job_id: &str) -> Result<RemoteJobReport, RemoteError>;

    /// Open a client-streamed upload into a payload.
    async fn upload_payload(&self) -> Result<UploadSink, RemoteError>;

    /// Stream the details of every file in a payload.
    async fn list_payload_files(
        &self,
        remote_payload_id: &str,
    ) -> Result<FrameStream<PayloadFile>, RemoteError>;

    /// Stream the bytes of one payload file, chunk by chunk.
    async fn download_payload_file(
        &self,
        remote_payload_id: &str,
        name: &str,
    ) -> Result<FrameStream<Vec<u8>>, RemoteError>;

    async fn list_pipelines(&self) -> Result<FrameStream<PipelineSummary>, RemoteError>;
}
