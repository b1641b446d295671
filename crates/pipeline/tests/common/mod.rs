//! Shared test helpers: a scripted in-process execution service and a
//! fully wired engine over the in-memory job store.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use seriesflow_clara::error::RemoteError;
use seriesflow_clara::service::{
    CreatedJob, ExecutionService, PayloadFile, PipelineSummary, RemoteJobReport, RemoteJobState,
    RemoteJobStatus, UploadFrame,
};
use seriesflow_clara::stream::{upload_channel, FrameStream, UploadSink};
use seriesflow_core::job_status::JobStatus;
use seriesflow_core::types::DbId;
use seriesflow_db::models::job::{NewSeriesJob, SeriesJob};
use seriesflow_db::store::{JobStore, MemoryJobStore};
use seriesflow_pipeline::config::EngineConfig;
use seriesflow_pipeline::coordinator::JobCoordinator;
use seriesflow_pipeline::reconcile::ReconcileSupervisor;
use seriesflow_pipeline::transfer::TransferEngine;
use tempfile::TempDir;

/// Chunk size the stub uses when serving payload files.
pub const STUB_DOWNLOAD_CHUNK: usize = 4096;

/// One scripted answer to a status query.
#[derive(Debug, Clone, Copy)]
pub enum StatusStep {
    Report(RemoteJobState, RemoteJobStatus),
    Error,
}

pub fn running() -> StatusStep {
    StatusStep::Report(RemoteJobState::Running, RemoteJobStatus::Unknown)
}

pub fn stopped(status: RemoteJobStatus) -> StatusStep {
    StatusStep::Report(RemoteJobState::Stopped, status)
}

/// In-process [`ExecutionService`] with call counters and scripted
/// status answers.
#[derive(Default)]
pub struct StubService {
    pub create_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    /// Negative response code returned by `create_job`, if set.
    pub create_code: Mutex<Option<i32>>,
    pub fail_upload: AtomicBool,
    /// How long `upload_payload` takes before handing out the sink.
    pub upload_delay: Mutex<Option<Duration>>,
    pub fail_listing: AtomicBool,
    /// Remote names whose download ends with an error after one chunk.
    pub failing_downloads: Mutex<Vec<String>>,
    statuses: Mutex<VecDeque<StatusStep>>,
    frames: Arc<Mutex<Vec<UploadFrame>>>,
    payload_files: Mutex<Vec<(String, Vec<u8>)>>,
}

impl StubService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue status answers. Once the script runs out, the job reports
    /// running forever.
    pub fn script(&self, steps: impl IntoIterator<Item = StatusStep>) {
        self.statuses.lock().unwrap().extend(steps);
    }

    pub fn add_payload_file(&self, name: &str, data: Vec<u8>) {
        self.payload_files.lock().unwrap().push((name.to_string(), data));
    }

    /// Every frame received on any upload stream, in arrival order.
    pub fn frames(&self) -> Vec<UploadFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// Concatenated bytes uploaded under `file_name`.
    pub fn uploaded_bytes(&self, file_name: &str) -> Vec<u8> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.file_name == file_name)
            .flat_map(|frame| frame.data.iter().copied())
            .collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionService for StubService {
    async fn create_job(&self, _pipeline_id: &str, _name: &str) -> Result<CreatedJob, RemoteError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let code = *self.create_code.lock().unwrap();
        if let Some(code) = code {
            return Err(RemoteError::NegativeCode {
                operation: "Jobs.Create",
                code,
            });
        }
        // Yield so concurrent starts interleave.
        tokio::task::yield_now().await;
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
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.statuses.lock().unwrap().pop_front().unwrap_or_else(running);
        match step {
            StatusStep::Report(state, status) => Ok(RemoteJobReport { state, status }),
            StatusStep::Error => Err(RemoteError::Connection("connection refused".into())),
        }
    }

    async fn upload_payload(&self) -> Result<UploadSink, RemoteError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let (sink, mut source) = upload_channel();
        let frames = Arc::clone(&self.frames);
        let fail = self.fail_upload.load(Ordering::SeqCst);

        tokio::spawn(async move {
            while let Some(frame) = source.recv().await {
                frames.lock().unwrap().push(frame);
            }
            let result = if fail {
                Err(RemoteError::NegativeCode {
                    operation: "Payloads.Upload",
                    code: -1,
                })
            } else {
                Ok(())
            };
            source.complete(result);
        });

        Ok(sink)
    }

    async fn list_payload_files(
        &self,
        _remote_payload_id: &str,
    ) -> Result<FrameStream<PayloadFile>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let files: Vec<_> = self
            .payload_files
            .lock()
            .unwrap()
            .iter()
            .map(|(name, data)| PayloadFile {
                name: name.clone(),
                size: data.len() as u64,
                mode: 0o644,
            })
            .collect();
        if self.fail_listing.load(Ordering::SeqCst) {
            return Ok(FrameStream::from_items_then(
                files,
                Err(RemoteError::Protocol("listing aborted".into())),
            ));
        }
        Ok(FrameStream::from_items(files))
    }

    async fn download_payload_file(
        &self,
        _remote_payload_id: &str,
        name: &str,
    ) -> Result<FrameStream<Vec<u8>>, RemoteError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let data = self
            .payload_files
            .lock()
            .unwrap()
            .iter()
            .find(|(remote, _)| remote.trim_start_matches('/') == name)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| RemoteError::Protocol(format!("no payload file {name}")))?;
        let chunks: Vec<Vec<u8>> = data.chunks(STUB_DOWNLOAD_CHUNK).map(<[u8]>::to_vec).collect();

        let failing = self
            .failing_downloads
            .lock()
            .unwrap()
            .iter()
            .any(|remote| remote.trim_start_matches('/') == name);
        if failing {
            let partial = chunks.into_iter().take(1).collect();
            return Ok(FrameStream::from_items_then(
                partial,
                Err(RemoteError::Protocol("download interrupted".into())),
            ));
        }
        Ok(FrameStream::from_items(chunks))
    }

    async fn list_pipelines(&self) -> Result<FrameStream<PipelineSummary>, RemoteError> {
        Ok(FrameStream::from_items(vec![PipelineSummary {
            pipeline_id: "liver".into(),
            name: "Liver segmentation".into(),
        }]))
    }
}

/// A wired engine over temporary staging and output roots.
pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub service: Arc<StubService>,
    pub coordinator: JobCoordinator,
    pub supervisor: Arc<ReconcileSupervisor>,
    pub transfer: TransferEngine,
    pub config: EngineConfig,
    _root: TempDir,
}

pub fn harness(service: StubService) -> Harness {
    harness_with(service, |_| {})
}

pub fn harness_with(service: StubService, tweak: impl FnOnce(&mut EngineConfig)) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let mut config = EngineConfig {
        staging_root: root.path().join("input"),
        output_root: root.path().join("output"),
        ..EngineConfig::default()
    };
    tweak(&mut config);

    let store = Arc::new(MemoryJobStore::new());
    let service = Arc::new(service);
    let transfer = TransferEngine::new(service.clone(), &config);
    let supervisor = Arc::new(ReconcileSupervisor::new(
        store.clone(),
        transfer.clone(),
        &config,
    ));
    let coordinator = JobCoordinator::new(store.clone(), transfer.clone(), supervisor.clone(), &config);

    Harness {
        store,
        service,
        coordinator,
        supervisor,
        transfer,
        config,
        _root: root,
    }
}

pub fn new_job(series: &str, pipeline: &str, sops: &[&str]) -> NewSeriesJob {
    NewSeriesJob {
        study_instance_uid: "1.2.840.study".to_string(),
        series_instance_uid: series.to_string(),
        pipeline_id: pipeline.to_string(),
        sop_instance_uids: sops.iter().map(|s| s.to_string()).collect(),
    }
}

/// Sleep in one-second steps until the job reaches `status`.
///
/// Under a paused clock the sleeps complete instantly.
pub async fn wait_for_status(store: &MemoryJobStore, job_id: DbId, status: JobStatus) -> SeriesJob {
    wait_until(store, job_id, |job| job.status == status).await
}

/// Sleep in one-second steps until the job has recorded outputs.
pub async fn wait_for_outputs(store: &MemoryJobStore, job_id: DbId) -> SeriesJob {
    wait_until(store, job_id, |job| job.outputs.is_some()).await
}

/// Sleep in one-second steps until the job has an error message.
pub async fn wait_for_error(store: &MemoryJobStore, job_id: DbId) -> SeriesJob {
    wait_until(store, job_id, |job| job.error_message.is_some()).await
}

async fn wait_until(
    store: &MemoryJobStore,
    job_id: DbId,
    done: impl Fn(&SeriesJob) -> bool,
) -> SeriesJob {
    for _ in 0..3600 {
        let job = store.find_by_id(job_id).await.unwrap().unwrap();
        if done(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("job {job_id} never reached the expected state");
}
