//! # Initialization
//!
//! Controller start-up: rustls setup, tracing, metrics, probe server and
//! Kubernetes client.

use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::observability::{self, logging::LogFormat};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Install the rustls crypto provider. Must run before any TLS connection.
pub fn install_crypto_provider() {
    // Err means a provider is already installed
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

/// Set up logging from the configured level and format
pub fn init_logging(config: &ControllerConfig) -> Result<()> {
    observability::logging::init(&config.log_level, LogFormat::parse(&config.log_format))
}

/// Initialize the controller runtime
///
/// - metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - reconciler setup
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    info!("Starting Bundle Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let state = server_state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, state).await {
            error!("HTTP server error: {:#}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!(
        "Cache directory {}, search directories {:?}",
        config.cache_dir.display(),
        config.search_dirs
    );
    let reconciler = Arc::new(Reconciler::from_client(&client, config)?);

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}
