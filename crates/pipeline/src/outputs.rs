//! Retrieval of pipeline outputs from a completed job's payload.

use std::collections::HashMap;
use std::path::PathBuf;

use futures::future::try_join_all;
use seriesflow_clara::service::PayloadFile;
use seriesflow_core::naming::{is_output, output_file_name};

use crate::error::PipelineError;
use crate::transfer::TransferEngine;

/// Lists a payload, picks the output files, and downloads them.
#[derive(Clone)]
pub struct OutputRetriever {
    transfer: TransferEngine,
    marker: String,
}

impl OutputRetriever {
    pub fn new(transfer: TransferEngine, marker: impl Into<String>) -> Self {
        Self {
            transfer,
            marker: marker.into(),
        }
    }

    /// Every file in the payload. Succeeds only if the listing stream ends
    /// with a success status.
    pub async fn list_remote_files(&self, payload_id: &str) -> Result<Vec<PayloadFile>, PipelineError> {
        let stream = self.transfer.service().list_payload_files(payload_id).await?;
        Ok(stream.collect_all().await?)
    }

    /// Names of the files that are pipeline outputs, in listing order.
    ///
    /// Outputs are written to one directory under their base names, so two
    /// outputs with the same base name are an error.
    pub fn select_outputs(&self, files: &[PayloadFile]) -> Result<Vec<String>, PipelineError> {
        let mut by_file_name: HashMap<&str, &str> = HashMap::new();
        let mut selected = Vec::new();

        for file in files
            .iter()
            .filter(|file| is_output(&file.name, &self.marker))
        {
            let file_name = output_file_name(&file.name);
            if let Some(first) = by_file_name.insert(file_name, &file.name) {
                return Err(PipelineError::DuplicateOutput {
                    first: first.to_string(),
                    second: file.name.clone(),
                    file_name: file_name.to_string(),
                });
            }
            selected.push(file.name.clone());
        }
        Ok(selected)
    }

    /// Download all `names` concurrently. Fails as soon as any download
    /// fails.
    pub async fn download_all(
        &self,
        payload_id: &str,
        names: &[String],
    ) -> Result<Vec<PathBuf>, PipelineError> {
        try_join_all(
            names
                .iter()
                .map(|name| self.transfer.download(payload_id, name)),
        )
        .await
    }

    /// List, select, and download the outputs of `payload_id`.
    ///
    /// Returns the remote names of the downloaded outputs.
    pub async fn retrieve(&self, payload_id: &str) -> Result<Vec<String>, PipelineError> {
        let files = self.list_remote_files(payload_id).await?;
        let selected = self.select_outputs(&files)?;
        tracing::info!(
            payload_id,
            listed = files.len(),
            selected = selected.len(),
            "Retrieving pipeline outputs",
        );

        self.download_all(payload_id, &selected).await?;
        Ok(selected)
    }
}
