//! API request handlers for deployment operations

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use k8s_openapi::api::apps::v1::Deployment;
use leash_common::{
    ClusterError, DeploymentConfig, DeploymentRequest, Error, FieldError, Platform, Stage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::AppState;

/// Query of the platform check endpoint
#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    /// Image reference to inspect
    pub container: Option<String>,
}

/// Response from a successful platform check
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub supported: bool,

    /// Every platform the image index lists
    pub platforms: Vec<Platform>,
}

/// Response from a created deployment
#[derive(Debug, Serialize)]
pub struct DeploymentCreated {
    pub message: String,
    pub config: DeploymentConfig,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Owning user, defaults to the configured one
    pub user: Option<String>,
}

/// One workload in a listing
#[derive(Debug, Serialize)]
pub struct DeploymentSummary {
    pub namespace: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

impl From<Deployment> for DeploymentSummary {
    fn from(workload: Deployment) -> Self {
        let spec = workload.spec;
        Self {
            namespace: workload.metadata.namespace.unwrap_or_default(),
            name: workload.metadata.name.unwrap_or_default(),
            image: spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .and_then(|p| p.containers.first())
                .and_then(|c| c.image.clone()),
            replicas: spec.and_then(|s| s.replicas),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeploymentList {
    pub deployments: Vec<DeploymentSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct RestartResponse {
    pub message: String,
    pub namespace: String,
    pub name: String,
}

/// Error body; fields beyond `message` depend on the failure
#[derive(Debug, Default, Serialize)]
pub struct ErrorBody {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_platforms: Option<Vec<Platform>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_platforms: Option<Vec<Platform>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: ErrorBody {
                message: message.to_string(),
                ..Default::default()
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let kind = Some(err.kind());
        let detail = Some(err.to_string());

        let (status, body) = match err {
            Error::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    message: "Validation failed".to_string(),
                    errors: Some(errors),
                    ..Default::default()
                },
            ),
            Error::InvalidReference { .. } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    message: "Invalid container image reference".to_string(),
                    error: detail,
                    ..Default::default()
                },
            ),
            Error::RegistryFetch(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    message: "Failed to fetch container image metadata".to_string(),
                    error: detail,
                    ..Default::default()
                },
            ),
            Error::RegistryUnavailable(_) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    message: "Image registry unavailable".to_string(),
                    error: detail,
                    ..Default::default()
                },
            ),
            Error::ManifestDecode(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    message: "Invalid container manifest".to_string(),
                    error: detail,
                    ..Default::default()
                },
            ),
            Error::MissingPlatforms { required, missing } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    message: "Container image missing required platform support".to_string(),
                    required_platforms: Some(required),
                    missing_platforms: Some(missing),
                    ..Default::default()
                },
            ),
            Error::Apply {
                stage,
                cause: ClusterError::Cancelled,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    message: "Request cancelled".to_string(),
                    error: detail,
                    stage: Some(stage),
                    ..Default::default()
                },
            ),
            Error::Apply { stage, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    message: "Failed to create deployment".to_string(),
                    error: detail,
                    stage: Some(stage),
                    ..Default::default()
                },
            ),
            Error::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    message: "Deployment not found".to_string(),
                    error: detail,
                    ..Default::default()
                },
            ),
            Error::UpdateConflict { .. } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    message: "Deployment was modified concurrently, retry the request".to_string(),
                    error: detail,
                    ..Default::default()
                },
            ),
            Error::Orchestrator(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    message: "Orchestrator request failed".to_string(),
                    error: detail,
                    ..Default::default()
                },
            ),
            Error::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    message: "Request cancelled".to_string(),
                    error: detail,
                    ..Default::default()
                },
            ),
        };

        ApiError {
            status,
            body: ErrorBody { kind, ..body },
        }
    }
}

/// Service banner
pub async fn root_handler() -> &'static str {
    "scripts.mkr.cx"
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "deploy-api"
    }))
}

/// Check an image against the required platforms without deploying it
pub async fn validate_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ValidateQuery>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let container = query.container.unwrap_or_default();
    state
        .validator
        .validate_image("container", &container)
        .map_err(Error::Validation)?;

    info!("Checking platforms of {}", container);

    let cancel = state.shutdown.child_token();
    let check = state
        .inspector
        .require_platforms(&container, &state.required_platforms, &cancel)
        .await
        .map_err(|e| {
            info!("Image {} rejected: {}", container, e);
            e
        })?;

    Ok(Json(ValidateResponse {
        supported: true,
        platforms: check.discovered.into_iter().collect(),
    }))
}

/// Validate, inspect, compose and apply a deployment
pub async fn create_deployment_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeploymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeploymentCreated>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected deployment body: {}", rejection.body_text());
        ApiError {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                error: Some(rejection.body_text()),
                ..ApiError::new(StatusCode::BAD_REQUEST, "Invalid request body").body
            },
        }
    })?;

    let validated = state.validator.validate(&request).map_err(|errors| {
        info!("Deployment request failed validation on {} field(s)", errors.len());
        Error::Validation(errors)
    })?;

    let cancel = state.shutdown.child_token();
    state
        .inspector
        .require_platforms(validated.image(), &state.required_platforms, &cancel)
        .await?;

    let config = DeploymentConfig::from_request(&validated, &state.defaults);
    let stack = state.composer.compose(&config);

    info!(
        "Deploying {} ({}) to namespace {}",
        config.project_name, config.image, config.namespace
    );

    state
        .applier
        .apply(&stack, &config.namespace, &cancel)
        .await
        .map_err(|e| {
            error!("Deployment of {} failed: {}", config.project_name, e);
            e
        })?;

    Ok((
        StatusCode::CREATED,
        Json(DeploymentCreated {
            message: "Deployment created successfully".to_string(),
            config,
        }),
    ))
}

/// List workloads owned by a user across all namespaces
pub async fn list_deployments_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeploymentList>, ApiError> {
    let user = query
        .user
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| state.defaults.username.clone());

    let deployments: Vec<DeploymentSummary> = state
        .applier
        .list_by_owner(&user)
        .await?
        .into_iter()
        .map(DeploymentSummary::from)
        .collect();

    info!("Listed {} deployment(s) for {}", deployments.len(), user);

    Ok(Json(DeploymentList {
        total: deployments.len(),
        deployments,
    }))
}

/// Trigger a rolling restart of a workload
pub async fn restart_handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<RestartResponse>, ApiError> {
    let cancel = state.shutdown.child_token();
    state.applier.restart(&namespace, &name, &cancel).await?;

    Ok(Json(RestartResponse {
        message: "Deployment restarted".to_string(),
        namespace,
        name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Validation(Vec::new()), StatusCode::BAD_REQUEST),
            (
                Error::RegistryFetch("ghcr.io returned 404 Not Found".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::RegistryUnavailable("request to ghcr.io timed out".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                Error::Apply {
                    stage: Stage::Route,
                    cause: ClusterError::Api {
                        code: 500,
                        message: "etcd unavailable".to_string(),
                    },
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                Error::Apply {
                    stage: Stage::Endpoint,
                    cause: ClusterError::Cancelled,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::NotFound {
                    namespace: "default".to_string(),
                    name: "shop".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                Error::UpdateConflict {
                    namespace: "default".to_string(),
                    name: "shop".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::Orchestrator("down".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_apply_error_body_names_stage() {
        let err = ApiError::from(Error::Apply {
            stage: Stage::Endpoint,
            cause: ClusterError::Api {
                code: 500,
                message: "boom".to_string(),
            },
        });

        let body = serde_json::to_value(&err.body).unwrap();
        assert_eq!(body["stage"], "endpoint");
        assert_eq!(body["kind"], "apply_error");
        assert_eq!(body["message"], "Failed to create deployment");
        assert!(body["error"].as_str().unwrap().contains("boom"));
        assert!(body.get("errors").is_none());
    }

    #[test]
    fn test_cancelled_apply_matches_cancelled_check() {
        let during_apply = ApiError::from(Error::Apply {
            stage: Stage::Endpoint,
            cause: ClusterError::Cancelled,
        });
        let during_check = ApiError::from(Error::Cancelled);

        assert_eq!(during_apply.status, during_check.status);
        assert_eq!(during_apply.body.message, during_check.body.message);
        assert_eq!(during_apply.body.stage, Some(Stage::Endpoint));
    }

    #[test]
    fn test_summary_from_workload() {
        use k8s_openapi::api::apps::v1::DeploymentSpec;
        use k8s_openapi::api::core::v1::{Container, PodSpec};
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

        let workload = Deployment {
            metadata: ObjectMeta {
                name: Some("shop".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                template: k8s_openapi::api::core::v1::PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "shop".to_string(),
                            image: Some("nginx:latest".to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let summary = DeploymentSummary::from(workload);
        assert_eq!(summary.namespace, "default");
        assert_eq!(summary.name, "shop");
        assert_eq!(summary.image.as_deref(), Some("nginx:latest"));
        assert_eq!(summary.replicas, Some(2));
    }
}
