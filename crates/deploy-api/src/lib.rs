//! Deploy API
//!
//! HTTP front end that checks container images for multi-architecture
//! support and deploys them as a workload, endpoint and TLS route on the
//! cluster.
//!
//! ## Endpoints
//!
//! - `GET /` - Service banner
//! - `GET /health` - Health check
//! - `GET /validate?container=<ref>` - Check an image's platforms
//! - `POST /deployments` - Validate, inspect and deploy
//! - `GET /deployments?user=<name>` - List a user's workloads
//! - `POST /deployments/{namespace}/{name}/restart` - Rolling restart

pub mod config;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use image_inspector::{ManifestInspector, RegistryClient};
use leash_common::{DeploymentDefaults, Platform, Validator};
use stack_deployer::{ClusterApi, StackApplier, StackComposer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Application state shared across handlers
pub struct AppState {
    pub validator: Validator,
    pub inspector: ManifestInspector,
    pub composer: StackComposer,
    pub applier: StackApplier,

    /// Namespace, TLS secret and owner of every deployment
    pub defaults: DeploymentDefaults,

    /// Platforms every deployed image must provide
    pub required_platforms: Vec<Platform>,

    /// Cancelled on shutdown; each request works under a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// State with default composition settings and platform requirements
    pub fn new(registry: Arc<dyn RegistryClient>, cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            validator: Validator::new(),
            inspector: ManifestInspector::new(registry),
            composer: StackComposer::default(),
            applier: StackApplier::new(cluster),
            defaults: DeploymentDefaults::default(),
            required_platforms: Platform::default_required(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/", get(handlers::root_handler))
        .route("/health", get(handlers::health_handler))
        .route("/validate", get(handlers::validate_handler))
        .route(
            "/deployments",
            post(handlers::create_deployment_handler).get(handlers::list_deployments_handler),
        )
        .route(
            "/deployments/{namespace}/{name}/restart",
            post(handlers::restart_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
