//! Shared helpers for HTTP integration tests: an in-process execution
//! service, an in-memory job store, and request/response shortcuts.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use seriesflow_api::config::ServerConfig;
use seriesflow_api::router::build_app_router;
use seriesflow_api::state::AppState;
use seriesflow_clara::error::RemoteError;
use seriesflow_clara::service::{
    CreatedJob, ExecutionService, PayloadFile, PipelineSummary, RemoteJobReport, RemoteJobState,
    RemoteJobStatus, UploadFrame,
};
use seriesflow_clara::stream::{upload_channel, FrameStream, UploadSink};
use seriesflow_db::store::MemoryJobStore;
use seriesflow_pipeline::config::EngineConfig;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "seriesflow-test-boundary";

/// Execution service that accepts every call and reports jobs as running.
#[derive(Default)]
pub struct AcceptingService {
    pub create_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub frames: Arc<Mutex<Vec<UploadFrame>>>,
}

#[async_trait]
impl ExecutionService for AcceptingService {
    async fn create_job(&self, _pipeline_id: &str, _name: &str) -> Result<CreatedJob, RemoteError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedJob {
            remote_job_id: format!("rj-{n}"),
            remote_payload_id: format!("rp-{n}"),
        })
    }

    async fn start_job(&self, _remote_job_id: &str) -> Result<(), RemoteError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn job_status(&self, _remote_job_id: &str) -> Result<RemoteJobReport, RemoteError> {
        Ok(RemoteJobReport {
            state: RemoteJobState::Running,
            status: RemoteJobStatus::Unknown,
        })
    }

    async fn upload_payload(&self) -> Result<UploadSink, RemoteError> {
        let (sink, mut source) = upload_channel();
        let frames = Arc::clone(&self.frames);
        tokio::spawn(async move {
            while let Some(frame) = source.recv().await {
                frames.lock().unwrap().push(frame);
            }
            source.complete(Ok(()));
        });
        Ok(sink)
    }

    async fn list_payload_files(
        &self,
        _remote_payload_id: &str,
    ) -> Result<FrameStream<PayloadFile>, RemoteError> {
        Ok(FrameStream::from_items(Vec::new()))
    }

    async fn download_payload_file(
        &self,
        _remote_payload_id: &str,
        name: &str,
    ) -> Result<FrameStream<Vec<u8>>, RemoteError> {
        Err(RemoteError::Protocol(format!("no payload file {name}")))
    }

    async fn list_pipelines(&self) -> Result<FrameStream<PipelineSummary>, RemoteError> {
        Ok(FrameStream::from_items(vec![PipelineSummary {
            pipeline_id: "liver".into(),
            name: "Liver segmentation".into(),
        }]))
    }
}

/// A wired application plus the pieces tests inspect.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub service: Arc<AcceptingService>,
    _root: TempDir,
}

/// Build a test `ServerConfig` rooted in `root`.
pub fn test_config(root: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        database_url: None,
        clara_grpc_url: "http://localhost:30031".to_string(),
        engine: EngineConfig {
            staging_root: root.path().join("input"),
            output_root: root.path().join("output"),
            poll_interval: Duration::from_secs(3600),
            ..EngineConfig::default()
        },
    }
}

/// Build the full application router over an in-memory store.
pub fn build_test_app() -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(&root);
    let service = Arc::new(AcceptingService::default());
    let state = AppState::new(
        config.clone(),
        Arc::new(MemoryJobStore::new()),
        Arc::clone(&service) as Arc<dyn ExecutionService>,
    );
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        service,
        _root: root,
    }
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &TestApp, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_empty(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

/// POST a multipart body with one field per `(name, bytes)` pair.
pub async fn post_files(app: &TestApp, uri: &str, files: &[(&str, &[u8])]) -> Response<Body> {
    let mut body = Vec::new();
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                 filename=\"{name}.dcm\"\r\nContent-Type: application/dicom\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn submission(series: &str, sops: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "studyInstanceUid": "1.2.840.1",
        "seriesInstanceUid": series,
        "sopInstanceUids": sops,
        "pipelineId": "liver",
    })
}
