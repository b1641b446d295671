use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use seriesflow_core::naming::DEFAULT_OUTPUT_MARKER;
use seriesflow_pipeline::config::EngineConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// PostgreSQL connection string. Jobs are kept in memory when unset.
    pub database_url: Option<String>,
    /// Endpoint of the pipeline execution service.
    pub clara_grpc_url: String,
    /// Staging, output, polling, and transfer settings for the engine.
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                    |
    /// |----------------------------|----------------------------|
    /// | `HOST`                     | `0.0.0.0`                  |
    /// | `PORT`                     | `3000`                     |
    /// | `CORS_ORIGINS`             | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`                       |
    /// | `DATABASE_URL`             | unset (in-memory store)    |
    /// | `CLARA_GRPC_URL`           | `http://localhost:30031`   |
    /// | `STAGING_ROOT`             | `input`                    |
    /// | `OUTPUT_ROOT`              | `output`                   |
    /// | `POLL_INTERVAL_SECS`       | `30`                       |
    /// | `MAX_POLL_FAILURES`        | `5`                        |
    /// | `OUTPUT_MARKER`            | `/segmentation`            |
    /// | `MAX_CONCURRENT_TRANSFERS` | unset (unbounded)          |
    ///
    /// Panics on values that do not parse; misconfiguration should stop
    /// startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_env("PORT", "3000");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_env("REQUEST_TIMEOUT_SECS", "30");

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let clara_grpc_url =
            std::env::var("CLARA_GRPC_URL").unwrap_or_else(|_| "http://localhost:30031".into());

        let engine = EngineConfig {
            staging_root: PathBuf::from(
                std::env::var("STAGING_ROOT").unwrap_or_else(|_| "input".into()),
            ),
            output_root: PathBuf::from(
                std::env::var("OUTPUT_ROOT").unwrap_or_else(|_| "output".into()),
            ),
            poll_interval: Duration::from_secs(parse_env("POLL_INTERVAL_SECS", "30")),
            max_poll_failures: parse_env("MAX_POLL_FAILURES", "5"),
            output_marker: std::env::var("OUTPUT_MARKER")
                .unwrap_or_else(|_| DEFAULT_OUTPUT_MARKER.into()),
            max_concurrent_transfers: std::env::var("MAX_CONCURRENT_TRANSFERS")
                .ok()
                .map(|raw| {
                    raw.parse()
                        .expect("MAX_CONCURRENT_TRANSFERS must be a valid usize")
                }),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            database_url,
            clara_grpc_url,
            engine,
        }
    }
}

fn parse_env<T: FromStr>(name: &str, default: &str) -> T {
    std::env::var(name)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>()))
}
