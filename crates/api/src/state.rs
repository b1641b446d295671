use std::sync::Arc;

use seriesflow_clara::service::ExecutionService;
use seriesflow_db::store::JobStore;
use seriesflow_pipeline::coordinator::JobCoordinator;
use seriesflow_pipeline::reconcile::ReconcileSupervisor;
use seriesflow_pipeline::transfer::TransferEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job store (PostgreSQL or in-memory).
    pub store: Arc<dyn JobStore>,
    /// Submission, upload, and start of series jobs.
    pub coordinator: Arc<JobCoordinator>,
    /// Poll tasks of running jobs.
    pub supervisor: Arc<ReconcileSupervisor>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the engine around a store and an execution service.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn JobStore>,
        service: Arc<dyn ExecutionService>,
    ) -> Self {
        let transfer = TransferEngine::new(service, &config.engine);
        let supervisor = Arc::new(ReconcileSupervisor::new(
            Arc::clone(&store),
            transfer.clone(),
            &config.engine,
        ));
        let coordinator = Arc::new(JobCoordinator::new(
            Arc::clone(&store),
            transfer,
            Arc::clone(&supervisor),
            &config.engine,
        ));

        Self {
            store,
            coordinator,
            supervisor,
            config: Arc::new(config),
        }
    }
}
