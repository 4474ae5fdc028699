//! Deploy API Service
//!
//! REST API for checking container images and deploying them to the cluster

use anyhow::{Context, Result};
use deploy_api::{config::Config, create_router, AppState};
use image_inspector::{HttpRegistryClient, ManifestInspector};
use leash_common::Validator;
use stack_deployer::{KubeCluster, StackApplier, StackComposer};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deploy_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Deploy API Service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Deploying to namespace {} as {} (cluster access: {:?})",
        config.defaults.namespace, config.defaults.username, config.cluster_access
    );

    let registry = HttpRegistryClient::new(
        config.registry_credentials.clone(),
        config.request_timeout,
    )
    .context("Failed to create registry client")?;

    let cluster = KubeCluster::connect(config.cluster_access)
        .await
        .context("Failed to create Kubernetes client")?;

    let shutdown = CancellationToken::new();

    // Create application state
    let state = AppState {
        validator: Validator::new(),
        inspector: ManifestInspector::new(Arc::new(registry)),
        composer: StackComposer::new(config.route.clone()),
        applier: StackApplier::new(Arc::new(cluster)),
        defaults: config.defaults.clone(),
        required_platforms: config.required_platforms.clone(),
        shutdown: shutdown.clone(),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.api_address())
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_address()))?;

    info!("Deploy API running on http://{}", config.api_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    Ok(())
}

/// Wait for Ctrl+C, then cancel in-flight requests
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }

    info!("Received Ctrl+C, shutting down");
    shutdown.cancel();
}
