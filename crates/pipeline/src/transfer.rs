//! Chunked streaming of staged files to a remote payload, and of payload
//! files back to local disk.
//!
//! Uploads hold at most one chunk in memory: the upload channel has a
//! single slot, so the next chunk is only read after the transport has
//! taken the previous frame.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use seriesflow_clara::service::{ExecutionService, UploadFrame};
use seriesflow_core::naming::{output_file_name, remote_request_name};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::EngineConfig;
use crate::error::{io_at, PipelineError};

/// Size of every upload frame except the last frame of a file.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Counts reported by a finished upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub files: usize,
    pub frames: usize,
    pub bytes: u64,
}

/// Moves file content between local disk and remote payloads.
///
/// Cheap to clone; clones share the service handle and the optional
/// transfer limit.
#[derive(Clone)]
pub struct TransferEngine {
    service: Arc<dyn ExecutionService>,
    output_root: PathBuf,
    limit: Option<Arc<Semaphore>>,
}

impl TransferEngine {
    pub fn new(service: Arc<dyn ExecutionService>, config: &EngineConfig) -> Self {
        Self {
            service,
            output_root: config.output_root.clone(),
            limit: config
                .max_concurrent_transfers
                .map(|max| Arc::new(Semaphore::new(max.max(1)))),
        }
    }

    /// The execution service this engine transfers through.
    pub fn service(&self) -> &Arc<dyn ExecutionService> {
        &self.service
    }

    async fn permit(&self) -> Option<OwnedSemaphorePermit> {
        match &self.limit {
            // The semaphore is never closed, so acquisition only fails if
            // that changes; treat it as unbounded.
            Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
            None => None,
        }
    }

    /// Upload every regular file under `local_dir` to `payload_id`.
    ///
    /// Files are sent one after another in lexical path order, each as a
    /// run of [`CHUNK_SIZE`] frames in offset order. Every frame of a file
    /// carries the file's total size. Succeeds only once the
    /// transport reports a success status for the whole stream.
    pub async fn upload(
        &self,
        local_dir: &Path,
        payload_id: &str,
    ) -> Result<UploadSummary, PipelineError> {
        let _permit = self.permit().await;
        let files = collect_files(local_dir).await?;
        let mut sink = self.service.upload_payload().await?;
        let mut summary = UploadSummary::default();
        let mut buf = vec![0u8; CHUNK_SIZE];

        for path in &files {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut file = File::open(path).await.map_err(io_at(path))?;
            let file_size = file.metadata().await.map_err(io_at(path))?.len();

            loop {
                let filled = read_chunk(&mut file, &mut buf).await.map_err(io_at(path))?;
                if filled == 0 {
                    break;
                }
                sink.send(UploadFrame {
                    payload_id: payload_id.to_string(),
                    file_name: file_name.clone(),
                    file_size,
                    data: buf[..filled].to_vec(),
                })
                .await?;
                summary.frames += 1;
                summary.bytes += filled as u64;
                if filled < CHUNK_SIZE {
                    break;
                }
            }
            summary.files += 1;
        }

        sink.finish().await?;

        tracing::info!(
            payload_id,
            files = summary.files,
            frames = summary.frames,
            bytes = summary.bytes,
            "Payload upload complete",
        );
        Ok(summary)
    }

    /// Download one payload file into `<output_root>/<payload_id>/`.
    ///
    /// Chunks are appended in arrival order. The file is flushed and the
    /// call succeeds only after the stream ends with a success status; on
    /// failure the partial file is left in place.
    pub async fn download(
        &self,
        payload_id: &str,
        remote_name: &str,
    ) -> Result<PathBuf, PipelineError> {
        let _permit = self.permit().await;
        let dir = self.output_root.join(payload_id);
        fs::create_dir_all(&dir).await.map_err(io_at(&dir))?;
        let path = dir.join(output_file_name(remote_name));

        let mut stream = self
            .service
            .download_payload_file(payload_id, remote_request_name(remote_name))
            .await?;
        let mut file = File::create(&path).await.map_err(io_at(&path))?;

        let mut bytes = 0u64;
        while let Some(chunk) = stream.next().await? {
            file.write_all(&chunk).await.map_err(io_at(&path))?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(io_at(&path))?;

        tracing::debug!(payload_id, remote_name, path = %path.display(), bytes, "Downloaded payload file");
        Ok(path)
    }
}

/// Regular files under `root`, recursively, in lexical path order.
async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = fs::read_dir(&dir).await.map_err(io_at(&dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_at(&dir))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(io_at(&path))?;
            if file_type.is_dir() {
                dirs.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Fill `buf` from `reader`, stopping early only at end of input.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
