//! Builds the workload, endpoint and route for a deployment
//!
//! Composition is pure: the same [`DeploymentConfig`] always yields the same
//! objects. All three objects are named after the project, which is how the
//! lifecycle operations find them again later.

use crate::labels;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use leash_common::DeploymentConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// Port the endpoint exposes inside the cluster
pub const SERVICE_PORT: i32 = 80;

/// Route settings fixed per installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOptions {
    /// cert-manager cluster issuer that signs route certificates
    pub cluster_issuer: String,

    /// Ingress controller class handling the route
    pub ingress_class: String,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            cluster_issuer: "letsencrypt-prod".to_string(),
            ingress_class: "nginx".to_string(),
        }
    }
}

/// The three objects making up one application stack
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedStack {
    pub workload: Deployment,
    pub endpoint: Service,
    pub route: Ingress,
}

impl ComposedStack {
    /// Name shared by all three objects
    pub fn name(&self) -> &str {
        self.workload.metadata.name.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StackComposer {
    options: RouteOptions,
}

impl StackComposer {
    pub fn new(options: RouteOptions) -> Self {
        Self { options }
    }

    pub fn compose(&self, config: &DeploymentConfig) -> ComposedStack {
        ComposedStack {
            workload: self.workload(config),
            endpoint: self.endpoint(config),
            route: self.route(config),
        }
    }

    fn metadata(&self, config: &DeploymentConfig) -> ObjectMeta {
        ObjectMeta {
            name: Some(config.project_name.clone()),
            labels: Some(labels::common_labels(config)),
            ..Default::default()
        }
    }

    pub fn workload(&self, config: &DeploymentConfig) -> Deployment {
        let container = Container {
            name: config.project_name.clone(),
            image: Some(config.image.clone()),
            // Tags are mutable; a restart must pick up the newest push
            image_pull_policy: Some("Always".to_string()),
            ports: Some(vec![ContainerPort {
                container_port: config.container_port,
                ..Default::default()
            }]),
            ..Default::default()
        };

        Deployment {
            metadata: self.metadata(config),
            spec: Some(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(labels::selector(config)),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels::common_labels(config)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn endpoint(&self, config: &DeploymentConfig) -> Service {
        Service {
            metadata: self.metadata(config),
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: SERVICE_PORT,
                    target_port: Some(IntOrString::Int(config.container_port)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                selector: Some(labels::selector(config)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn route(&self, config: &DeploymentConfig) -> Ingress {
        let mut metadata = self.metadata(config);
        metadata.annotations = Some(BTreeMap::from([(
            labels::CLUSTER_ISSUER.to_string(),
            self.options.cluster_issuer.clone(),
        )]));

        let backend = IngressBackend {
            service: Some(IngressServiceBackend {
                name: config.project_name.clone(),
                port: Some(ServiceBackendPort {
                    number: Some(SERVICE_PORT),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };

        Ingress {
            metadata,
            spec: Some(IngressSpec {
                ingress_class_name: Some(self.options.ingress_class.clone()),
                tls: Some(vec![IngressTLS {
                    hosts: Some(vec![config.domain_name.clone()]),
                    secret_name: Some(config.tls_secret_name.clone()),
                }]),
                rules: Some(vec![IngressRule {
                    host: Some(config.domain_name.clone()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend,
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
