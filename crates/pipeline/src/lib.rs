//! Orchestration engine for series processing jobs.
//!
//! - [`coordinator::JobCoordinator`] handles submission, staged uploads, and
//!   the single start of each job.
//! - [`transfer::TransferEngine`] streams staged files to a remote payload
//!   in fixed-size chunks and streams outputs back to disk.
//! - [`reconcile::ReconcileSupervisor`] owns one poll task per running job
//!   and drives it to a terminal status.
//! - [`outputs::OutputRetriever`] lists, selects, and downloads pipeline
//!   outputs once a job completes.

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod outputs;
pub mod reconcile;
pub mod transfer;
