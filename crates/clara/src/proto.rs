//! Wire messages for the consumed subset of the `nvidia.clara.platform`
//! gRPC services.
//!
//! Declared by hand with `prost` derives; only the fields this service
//! reads or writes are present. Unknown fields sent by the server are
//! skipped by the decoder.

/// Fully-qualified gRPC method paths.
pub mod paths {
    pub const JOBS_CREATE: &str = "/nvidia.clara.platform.Jobs/Create";
    pub const JOBS_START: &str = "/nvidia.clara.platform.Jobs/Start";
    pub const JOBS_STATUS: &str = "/nvidia.clara.platform.Jobs/Status";
    pub const PAYLOADS_UPLOAD: &str = "/nvidia.clara.platform.Payloads/Upload";
    pub const PAYLOADS_DETAILS: &str = "/nvidia.clara.platform.Payloads/Details";
    pub const PAYLOADS_DOWNLOAD: &str = "/nvidia.clara.platform.Payloads/Download";
    pub const PIPELINES_LIST: &str = "/nvidia.clara.platform.Pipelines/List";
}

/// API version advertised in every request header.
pub const API_VERSION: (i32, i32, i32) = (10, 10, 10);

/// Label and user agent advertised in every request header.
pub const USER_AGENT: &str = "AI-Server";

#[derive(Clone, PartialEq, prost::Message)]
pub struct Version {
    #[prost(int32, tag = "1")]
    pub major: i32,
    #[prost(int32, tag = "2")]
    pub minor: i32,
    #[prost(int32, tag = "3")]
    pub patch: i32,
    #[prost(string, tag = "4")]
    pub label: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RequestHeader {
    #[prost(message, optional, tag = "1")]
    pub api_version: Option<Version>,
    #[prost(string, tag = "2")]
    pub user_agent: String,
}

impl RequestHeader {
    /// The header this service sends with every call.
    pub fn standard() -> Self {
        let (major, minor, patch) = API_VERSION;
        Self {
            api_version: Some(Version {
                major,
                minor,
                patch,
                label: USER_AGENT.to_string(),
            }),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Response header. A negative `code` signals failure.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseHeader {
    #[prost(sint32, tag = "1")]
    pub code: i32,
    #[prost(string, repeated, tag = "2")]
    pub messages: Vec<String>,
}

/// Opaque identifier wrapper used for job, payload, and pipeline ids.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Identifier {
    #[prost(string, tag = "1")]
    pub value: String,
}

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum JobState {
    Unknown = 0,
    Pending = 1,
    Running = 2,
    Stopped = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum JobStatus {
    Unknown = 0,
    Healthy = 1,
    Faulted = 2,
    Canceled = 3,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct JobsCreateRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
    #[prost(message, optional, tag = "2")]
    pub pipeline_id: Option<Identifier>,
    #[prost(string, tag = "3")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JobsCreateResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(message, optional, tag = "2")]
    pub job_id: Option<Identifier>,
    #[prost(message, optional, tag = "3")]
    pub payload_id: Option<Identifier>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JobsStartRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
    #[prost(message, optional, tag = "2")]
    pub job_id: Option<Identifier>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JobsStartResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(enumeration = "JobState", tag = "2")]
    pub state: i32,
    #[prost(enumeration = "JobStatus", tag = "3")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JobsStatusRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
    #[prost(message, optional, tag = "2")]
    pub job_id: Option<Identifier>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JobsStatusResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(message, optional, tag = "2")]
    pub job_id: Option<Identifier>,
    #[prost(message, optional, tag = "3")]
    pub pipeline_id: Option<Identifier>,
    #[prost(message, optional, tag = "4")]
    pub payload_id: Option<Identifier>,
    #[prost(enumeration = "JobState", tag = "5")]
    pub state: i32,
    #[prost(enumeration = "JobStatus", tag = "6")]
    pub status: i32,
    #[prost(string, tag = "7")]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadFileDetails {
    #[prost(uint32, tag = "1")]
    pub mode: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint64, tag = "3")]
    pub size: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadsUploadRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
    #[prost(message, optional, tag = "2")]
    pub payload_id: Option<Identifier>,
    #[prost(message, optional, tag = "3")]
    pub details: Option<PayloadFileDetails>,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadsUploadResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(message, optional, tag = "2")]
    pub payload_id: Option<Identifier>,
    #[prost(message, optional, tag = "3")]
    pub details: Option<PayloadFileDetails>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadsDetailsRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
    #[prost(message, optional, tag = "2")]
    pub payload_id: Option<Identifier>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadsDetailsResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(message, optional, tag = "2")]
    pub payload_id: Option<Identifier>,
    #[prost(message, optional, tag = "3")]
    pub file: Option<PayloadFileDetails>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadsDownloadRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
    #[prost(message, optional, tag = "2")]
    pub payload_id: Option<Identifier>,
    #[prost(string, tag = "3")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadsDownloadResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(message, optional, tag = "2")]
    pub details: Option<PayloadFileDetails>,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct PipelinesListRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PipelineDetails {
    #[prost(message, optional, tag = "1")]
    pub pipeline_id: Option<Identifier>,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PipelinesListResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(message, optional, tag = "2")]
    pub details: Option<PipelineDetails>,
}
