//! Client library for the remote pipeline execution service.
//!
//! [`service::ExecutionService`] is the seam the orchestration engine
//! depends on. [`client::ClaraClient`] implements it over gRPC using the
//! hand-declared messages in [`proto`]. Streaming calls are exposed
//! through the channel types in [`stream`], which carry an explicit
//! terminal status.

pub mod client;
pub mod error;
pub mod proto;
pub mod service;
pub mod stream;
