//! gRPC implementation of [`ExecutionService`].
//!
//! Calls go through a raw [`tonic::client::Grpc`] with the prost codec and
//! the method paths in [`proto::paths`], so no build-time code generation
//! is needed. Every response header is checked; a negative code fails the
//! call (or, for streams, ends the stream with an error status).

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::error::RemoteError;
use crate::proto::{self, paths, Identifier, RequestHeader, ResponseHeader};
use crate::service::{
    CreatedJob, ExecutionService, PayloadFile, PipelineSummary, RemoteJobReport, RemoteJobState,
    RemoteJobStatus,
};
use crate::stream::{frame_channel, upload_channel, FrameStream, UploadSink};

/// Buffered items per server stream before the forwarding task waits.
const STREAM_BUFFER: usize = 8;

/// Responses that carry a [`ResponseHeader`].
trait WithHeader {
    fn response_header(&self) -> Option<&ResponseHeader>;
}

macro_rules! impl_with_header {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WithHeader for $ty {
                fn response_header(&self) -> Option<&ResponseHeader> {
                    self.header.as_ref()
                }
            }
        )*
    };
}

impl_with_header!(
    proto::JobsCreateResponse,
    proto::JobsStartResponse,
    proto::JobsStatusResponse,
    proto::PayloadsUploadResponse,
    proto::PayloadsDetailsResponse,
    proto::PayloadsDownloadResponse,
    proto::PipelinesListResponse,
);

/// Fail with [`RemoteError::NegativeCode`] when the header carries a
/// negative response code.
fn check_header(operation: &'static str, header: Option<&ResponseHeader>) -> Result<(), RemoteError> {
    match header {
        Some(header) if header.code < 0 => {
            tracing::warn!(
                operation,
                code = header.code,
                messages = ?header.messages,
                "Execution service returned a negative response code",
            );
            Err(RemoteError::NegativeCode {
                operation,
                code: header.code,
            })
        }
        _ => Ok(()),
    }
}

fn id_value(id: Option<Identifier>, field: &str) -> Result<String, RemoteError> {
    id.map(|id| id.value)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RemoteError::Protocol(format!("response is missing {field}")))
}

fn job_state(raw: i32) -> RemoteJobState {
    match proto::JobState::try_from(raw).unwrap_or(proto::JobState::Unknown) {
        proto::JobState::Unknown => RemoteJobState::Unknown,
        proto::JobState::Pending => RemoteJobState::Pending,
        proto::JobState::Running => RemoteJobState::Running,
        proto::JobState::Stopped => RemoteJobState::Stopped,
    }
}

fn job_status(raw: i32) -> RemoteJobStatus {
    match proto::JobStatus::try_from(raw).unwrap_or(proto::JobStatus::Unknown) {
        proto::JobStatus::Unknown => RemoteJobStatus::Unknown,
        proto::JobStatus::Healthy => RemoteJobStatus::Healthy,
        proto::JobStatus::Faulted => RemoteJobStatus::Faulted,
        proto::JobStatus::Canceled => RemoteJobStatus::Canceled,
    }
}

/// Client for the remote pipeline execution service.
///
/// Cheap to clone; clones share the underlying HTTP/2 channel.
#[derive(Clone, Debug)]
pub struct ClaraClient {
    channel: Channel,
}

impl ClaraClient {
    /// Connect eagerly, failing if the endpoint is unreachable.
    pub async fn connect(url: &str) -> Result<Self, RemoteError> {
        let channel = Self::endpoint(url)?
            .connect()
            .await
            .map_err(|e| RemoteError::Connection(format!("{url}: {e}")))?;
        tracing::info!(url, "Connected to execution service");
        Ok(Self { channel })
    }

    /// Build a client that connects on first use.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn connect_lazy(url: &str) -> Result<Self, RemoteError> {
        let channel = Self::endpoint(url)?.connect_lazy();
        Ok(Self { channel })
    }

    fn endpoint(url: &str) -> Result<Endpoint, RemoteError> {
        let endpoint = Endpoint::from_shared(url.to_string())
            .map_err(|e| RemoteError::Connection(format!("invalid endpoint {url}: {e}")))?;
        if url.starts_with("https://") {
            endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|e| RemoteError::Connection(format!("TLS setup for {url}: {e}")))
        } else {
            Ok(endpoint)
        }
    }

    async fn ready(&self) -> Result<tonic::client::Grpc<Channel>, RemoteError> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| RemoteError::Connection(format!("service not ready: {e}")))?;
        Ok(grpc)
    }

    async fn unary<Req, Resp>(
        &self,
        operation: &'static str,
        path: &'static str,
        request: Req,
    ) -> Result<Resp, RemoteError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + WithHeader + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await?
            .into_inner();
        check_header(operation, response.response_header())?;
        Ok(response)
    }

    /// Open a server stream and forward converted items into a
    /// [`FrameStream`] from a background task.
    ///
    /// `convert` may drop a message by returning `Ok(None)`.
    async fn server_streaming<Req, Resp, T, F>(
        &self,
        operation: &'static str,
        path: &'static str,
        request: Req,
        mut convert: F,
    ) -> Result<FrameStream<T>, RemoteError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + WithHeader + Send + Sync + 'static,
        T: Send + 'static,
        F: FnMut(Resp) -> Result<Option<T>, RemoteError> + Send + 'static,
    {
        let mut grpc = self.ready().await?;
        let mut streaming = grpc
            .server_streaming(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await?
            .into_inner();

        let (tx, stream) = frame_channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let result = loop {
                match streaming.message().await {
                    Ok(Some(message)) => {
                        if let Err(e) = check_header(operation, message.response_header()) {
                            break Err(e);
                        }
                        match convert(message) {
                            Ok(Some(item)) => {
                                if !tx.send(item).await {
                                    tracing::debug!(operation, "Stream consumer went away");
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => break Err(e),
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(status) => break Err(RemoteError::Rpc(status)),
                }
            };
            tx.finish(result).await;
        });

        Ok(stream)
    }
}

#[async_trait]
impl ExecutionService for ClaraClient {
    async fn create_job(&self, pipeline_id: &str, name: &str) -> Result<CreatedJob, RemoteError> {
        let response: proto::JobsCreateResponse = self
            .unary(
                "Jobs.Create",
                paths::JOBS_CREATE,
                proto::JobsCreateRequest {
                    header: Some(RequestHeader::standard()),
                    pipeline_id: Some(Identifier::new(pipeline_id)),
                    name: name.to_string(),
                },
            )
            .await?;
        Ok(CreatedJob {
            remote_job_id: id_value(response.job_id, "job_id")?,
            remote_payload_id: id_value(response.payload_id, "payload_id")?,
        })
    }

    async fn start_job(&self, remote_job_id: &str) -> Result<(), RemoteError> {
        let _: proto::JobsStartResponse = self
            .unary(
                "Jobs.Start",
                paths::JOBS_START,
                proto::JobsStartRequest {
                    header: Some(RequestHeader::standard()),
                    job_id: Some(Identifier::new(remote_job_id)),
                },
            )
            .await?;
        Ok(())
    }

    async fn job_status(&self, remote_job_id: &str) -> Result<RemoteJobReport, RemoteError> {
        let response: proto::JobsStatusResponse = self
            .unary(
                "Jobs.Status",
                paths::JOBS_STATUS,
                proto::JobsStatusRequest {
                    header: Some(RequestHeader::standard()),
                    job_id: Some(Identifier::new(remote_job_id)),
                },
            )
            .await?;
        Ok(RemoteJobReport {
            state: job_state(response.state),
            status: job_status(response.status),
        })
    }

    async fn upload_payload(&self) -> Result<UploadSink, RemoteError> {
        let mut grpc = self.ready().await?;
        let (sink, source) = upload_channel();
        let (frames, mut completion) = source.into_parts();

        tokio::spawn(async move {
            let requests = ReceiverStream::new(frames).map(|frame| proto::PayloadsUploadRequest {
                header: Some(RequestHeader::standard()),
                payload_id: Some(Identifier::new(frame.payload_id)),
                details: Some(proto::PayloadFileDetails {
                    mode: 0,
                    name: frame.file_name,
                    size: frame.file_size,
                }),
                data: frame.data,
            });

            let call = grpc.client_streaming(
                tonic::Request::new(requests),
                PathAndQuery::from_static(paths::PAYLOADS_UPLOAD),
                ProstCodec::<proto::PayloadsUploadRequest, proto::PayloadsUploadResponse>::default(),
            );

            // Dropping `call` resets the HTTP/2 stream, so the server never
            // sees a clean end of a partial upload.
            let result = tokio::select! {
                biased;
                () = completion.aborted() => {
                    tracing::warn!("Payload upload aborted by producer");
                    return;
                }
                result = call => result
                    .map_err(RemoteError::from)
                    .and_then(|response| {
                        check_header("Payloads.Upload", response.get_ref().response_header())
                    }),
            };
            completion.complete(result);
        });

        Ok(sink)
    }

    async fn list_payload_files(
        &self,
        remote_payload_id: &str,
    ) -> Result<FrameStream<PayloadFile>, RemoteError> {
        self.server_streaming(
            "Payloads.Details",
            paths::PAYLOADS_DETAILS,
            proto::PayloadsDetailsRequest {
                header: Some(RequestHeader::standard()),
                payload_id: Some(Identifier::new(remote_payload_id)),
            },
            |response: proto::PayloadsDetailsResponse| {
                Ok(response.file.map(|file| PayloadFile {
                    name: file.name,
                    size: file.size,
                    mode: file.mode,
                }))
            },
        )
        .await
    }

    async fn download_payload_file(
        &self,
        remote_payload_id: &str,
        name: &str,
    ) -> Result<FrameStream<Vec<u8>>, RemoteError> {
        self.server_streaming(
            "Payloads.Download",
            paths::PAYLOADS_DOWNLOAD,
            proto::PayloadsDownloadRequest {
                header: Some(RequestHeader::standard()),
                payload_id: Some(Identifier::new(remote_payload_id)),
                name: name.to_string(),
            },
            |response: proto::PayloadsDownloadResponse| Ok(Some(response.data)),
        )
        .await
    }

    async fn list_pipelines(&self) -> Result<FrameStream<PipelineSummary>, RemoteError> {
        self.server_streaming(
            "Pipelines.List",
            paths::PIPELINES_LIST,
            proto::PipelinesListRequest {
                header: Some(RequestHeader::standard()),
            },
            |response: proto::PipelinesListResponse| {
                Ok(response.details.map(|details| PipelineSummary {
                    pipeline_id: details.pipeline_id.map(|id| id.value).unwrap_or_default(),
                    name: details.name,
                }))
            },
        )
        .await
    }
}
