//! Domain types shared by every seriesflow crate.
//!
//! Holds the job lifecycle state machine, naming rules for staged inputs
//! and downloaded outputs, submission validation, and the common error
//! type. Nothing here performs I/O.

pub mod error;
pub mod job_status;
pub mod naming;
pub mod types;
pub mod validation;
