//! Behaviour of the in-memory job store against the `JobStore` contract.

use std::sync::Arc;

use assert_matches::assert_matches;
use seriesflow_core::job_status::JobStatus;
use seriesflow_db::models::job::{ChecklistEntry, NewSeriesJob};
use seriesflow_db::store::{JobStore, MemoryJobStore};

fn new_job(series: &str, pipeline: &str, sops: &[&str]) -> NewSeriesJob {
    NewSeriesJob {
        study_instance_uid: "study1".to_string(),
        series_instance_uid: series.to_string(),
        pipeline_id: pipeline.to_string(),
        sop_instance_uids: sops.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn create_if_absent_returns_existing_job_for_same_key() {
    let store = MemoryJobStore::new();

    let (first, created) = store
        .create_if_absent(&new_job("series1", "p1", &["a", "b"]))
        .await
        .unwrap();
    assert!(created);
    assert_eq!(first.status, JobStatus::Pending);
    assert_eq!(
        first.checklist,
        vec![ChecklistEntry::pending("a"), ChecklistEntry::pending("b")]
    );

    let (second, created) = store
        .create_if_absent(&new_job("series1", "p1", &["x"]))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(second.id, first.id);
    assert_eq!(second.checklist.len(), 2);

    let (other, created) = store
        .create_if_absent(&new_job("series1", "p2", &["a"]))
        .await
        .unwrap();
    assert!(created);
    assert_ne!(other.id, first.id);
    assert_eq!(store.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_creates_for_same_key_resolve_to_one_job() {
    let store = Arc::new(MemoryJobStore::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .create_if_absent(&new_job("series1", "p1", &["a"]))
                    .await
                    .unwrap()
                    .0
                    .id
            })
        })
        .collect();

    let ids: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_checklist_updates_do_not_lose_entries() {
    let store = Arc::new(MemoryJobStore::new());
    let (job, _) = store
        .create_if_absent(&new_job("series1", "p1", &["a", "b", "c", "d"]))
        .await
        .unwrap();
    let job_id = job.id;

    let handles: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|sop| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.mark_uploaded(job_id, sop).await.unwrap() })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let job = store.find_by_id(job_id).await.unwrap().unwrap();
    let uploaded: Vec<_> = job
        .checklist
        .iter()
        .map(|e| (e.sop_instance_uid.as_str(), e.uploaded))
        .collect();
    assert_eq!(
        uploaded,
        vec![("a", true), ("b", true), ("c", true), ("d", false)]
    );
}

#[tokio::test]
async fn mark_uploaded_reports_unknown_entry() {
    let store = MemoryJobStore::new();
    let (job, _) = store
        .create_if_absent(&new_job("series1", "p1", &["a"]))
        .await
        .unwrap();

    assert!(!store.mark_uploaded(job.id, "zzz").await.unwrap());
    assert!(!store.mark_uploaded(job.id + 100, "a").await.unwrap());
    let job = store.find_by_id(job.id).await.unwrap().unwrap();
    assert!(!job.checklist[0].uploaded);
}

#[tokio::test]
async fn lifecycle_transitions_are_conditional() {
    let store = MemoryJobStore::new();
    let (job, _) = store
        .create_if_absent(&new_job("series1", "p1", &["a"]))
        .await
        .unwrap();

    // Cannot complete or fail a pending job.
    assert!(!store.mark_completed(job.id).await.unwrap());
    assert!(!store.mark_failed(job.id, "boom").await.unwrap());

    assert!(store.mark_in_progress(job.id, "rj", "rp").await.unwrap());
    // Second start is refused and identifiers are not overwritten.
    assert!(!store.mark_in_progress(job.id, "rj2", "rp2").await.unwrap());
    assert_eq!(store.list_in_progress().await.unwrap().len(), 1);

    assert!(store.mark_completed(job.id).await.unwrap());
    assert!(!store.mark_failed(job.id, "late").await.unwrap());

    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.remote_job_id.as_deref(), Some("rj"));
    assert_eq!(stored.remote_payload_id.as_deref(), Some("rp"));
    assert_matches!(stored.error_message, None);
    assert!(store.list_in_progress().await.unwrap().is_empty());
}

#[tokio::test]
async fn outputs_are_written_once_on_completed_jobs() {
    let store = MemoryJobStore::new();
    let (job, _) = store
        .create_if_absent(&new_job("series1", "p1", &["a"]))
        .await
        .unwrap();
    let outputs = vec!["liver.mhd".to_string()];

    assert!(!store.set_outputs(job.id, &outputs).await.unwrap());

    store.mark_in_progress(job.id, "rj", "rp").await.unwrap();
    store.mark_completed(job.id).await.unwrap();
    assert!(store.set_outputs(job.id, &outputs).await.unwrap());
    assert!(!store.set_outputs(job.id, &["other".to_string()]).await.unwrap());

    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.outputs, Some(outputs));
}

#[tokio::test]
async fn failed_job_keeps_reason() {
    let store = MemoryJobStore::new();
    let (job, _) = store
        .create_if_absent(&new_job("series1", "p1", &["a"]))
        .await
        .unwrap();
    store.mark_in_progress(job.id, "rj", "rp").await.unwrap();
    assert!(store.mark_failed(job.id, "remote status FAULTED").await.unwrap());

    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("remote status FAULTED"));
}

#[tokio::test]
async fn serializes_with_camel_case_keys() {
    let store = MemoryJobStore::new();
    let (job, _) = store
        .create_if_absent(&new_job("series1", "p1", &["a"]))
        .await
        .unwrap();

    let json = serde_json::to_value(&job).unwrap();
    assert_eq!(json["seriesInstanceUid"], "series1");
    assert_eq!(json["status"], "pending");
    assert_eq!(json["checklist"][0]["sopInstanceUid"], "a");
    assert_eq!(json["checklist"][0]["uploaded"], false);
    assert!(json["remoteJobId"].is_null());
}
