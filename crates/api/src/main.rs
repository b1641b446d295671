use std::net::SocketAddr;
use std::sync::Arc;

use seriesflow_clara::client::ClaraClient;
use seriesflow_db::store::{JobStore, MemoryJobStore, PgJobStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seriesflow_api::config::ServerConfig;
use seriesflow_api::router::build_app_router;
use seriesflow_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "seriesflow_api=debug,seriesflow_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Job store ---
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            let pool = seriesflow_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            seriesflow_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory only");
            Arc::new(MemoryJobStore::new())
        }
    };

    // --- Execution service ---
    let client = ClaraClient::connect_lazy(&config.clara_grpc_url)
        .expect("Invalid CLARA_GRPC_URL");
    tracing::info!(url = %config.clara_grpc_url, "Execution service client configured");

    // --- App state ---
    let state = AppState::new(config.clone(), store, Arc::new(client));
    let supervisor = Arc::clone(&state.supervisor);

    match supervisor.recover().await {
        Ok(count) => tracing::info!(count, "Reconciliation re-armed for in-progress jobs"),
        Err(e) => tracing::error!(error = %e, "Failed to re-arm reconciliation"),
    }

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let active = supervisor.active_count().await;
    supervisor.shutdown().await;
    tracing::info!(active, "Reconciliation tasks stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
