//! Series job entity models and DTOs.

use serde::Serialize;
use seriesflow_core::job_status::{JobStatus, StatusId};
use seriesflow_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// One processing request for an image series.
///
/// Serialized with camelCase keys, which is what HTTP clients of the
/// service expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesJob {
    pub id: DbId,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub pipeline_id: String,
    pub checklist: Vec<ChecklistEntry>,
    pub remote_job_id: Option<String>,
    pub remote_payload_id: Option<String>,
    pub status: JobStatus,
    pub outputs: Option<Vec<String>>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SeriesJob {
    /// The checklist entry for `sop_instance_uid`, if it is part of this job.
    pub fn checklist_entry(&self, sop_instance_uid: &str) -> Option<&ChecklistEntry> {
        self.checklist
            .iter()
            .find(|entry| entry.sop_instance_uid == sop_instance_uid)
    }

    /// Number of checklist entries already uploaded.
    pub fn uploaded_count(&self) -> usize {
        self.checklist.iter().filter(|entry| entry.uploaded).count()
    }
}

/// Upload state of one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistEntry {
    pub sop_instance_uid: String,
    pub uploaded: bool,
}

impl ChecklistEntry {
    pub fn pending(sop_instance_uid: impl Into<String>) -> Self {
        Self {
            sop_instance_uid: sop_instance_uid.into(),
            uploaded: false,
        }
    }
}

/// Input for creating a series job.
#[derive(Debug, Clone)]
pub struct NewSeriesJob {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub pipeline_id: String,
    /// Ordered, unique SOP instance ids. One checklist entry each.
    pub sop_instance_uids: Vec<String>,
}

/// A row from the `series_jobs` table, without its checklist.
#[derive(Debug, Clone, FromRow)]
pub struct SeriesJobRow {
    pub id: DbId,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub pipeline_id: String,
    pub remote_job_id: Option<String>,
    pub remote_payload_id: Option<String>,
    pub status_id: StatusId,
    pub outputs: Option<Vec<String>>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `series_job_checklist` table.
#[derive(Debug, Clone, FromRow)]
pub struct ChecklistRow {
    pub job_id: DbId,
    pub position: i32,
    pub sop_instance_uid: String,
    pub uploaded: bool,
}

impl SeriesJobRow {
    /// Attach the checklist rows (already ordered by position).
    ///
    /// Returns `None` when the stored status ID is not a known [`JobStatus`].
    pub fn into_job(self, checklist: Vec<ChecklistRow>) -> Option<SeriesJob> {
        let status = JobStatus::from_id(self.status_id)?;
        Some(SeriesJob {
            id: self.id,
            study_instance_uid: self.study_instance_uid,
            series_instance_uid: self.series_instance_uid,
            pipeline_id: self.pipeline_id,
            checklist: checklist
                .into_iter()
                .map(|row| ChecklistEntry {
                    sop_instance_uid: row.sop_instance_uid,
                    uploaded: row.uploaded,
                })
                .collect(),
            remote_job_id: self.remote_job_id,
            remote_payload_id: self.remote_payload_id,
            status,
            outputs: self.outputs,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
