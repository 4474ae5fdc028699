//! Kubernetes-backed [`ClusterApi`]

use crate::cluster::{ClusterApi, ClusterResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use leash_common::{ClusterError, Error, Result};
use tracing::{debug, info};

/// How the service reaches the cluster API, decided once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAccess {
    /// Service account mounted into the pod
    InCluster,
    /// Local kubeconfig, for development
    Kubeconfig,
}

impl ClusterAccess {
    pub fn from_dev_flag(dev: bool) -> Self {
        if dev {
            ClusterAccess::Kubeconfig
        } else {
            ClusterAccess::InCluster
        }
    }
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub async fn connect(access: ClusterAccess) -> Result<Self> {
        let config = match access {
            ClusterAccess::InCluster => Config::incluster().map_err(|e| {
                Error::Orchestrator(format!("failed to load in-cluster config: {}", e))
            })?,
            ClusterAccess::Kubeconfig => Config::from_kubeconfig(&KubeConfigOptions::default())
                .await
                .map_err(|e| Error::Orchestrator(format!("failed to load local kubeconfig: {}", e)))?,
        };

        info!("Connecting to cluster API at {}", config.cluster_url);

        let client = Client::try_from(config)
            .map_err(|e| Error::Orchestrator(format!("failed to create client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Which meaning a 409 carries for the call being made
#[derive(Clone, Copy)]
enum Write {
    Create,
    Replace,
}

fn map_error(err: kube::Error, write: Write, kind: &'static str, namespace: &str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(response) => match (response.code, write) {
            (404, _) => ClusterError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            (409, Write::Create) => ClusterError::AlreadyExists {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            (409, Write::Replace) => ClusterError::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            (code, _) => ClusterError::Api {
                code,
                message: response.message,
            },
        },
        other => ClusterError::Api {
            code: 0,
            message: other.to_string(),
        },
    }
}

fn object_name(metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> &str {
    metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        let name = object_name(&workload.metadata);
        debug!("Creating Deployment {}/{}", namespace, name);

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), workload)
            .await
            .map_err(|e| map_error(e, Write::Create, "Deployment", namespace, name))?;
        Ok(())
    }

    async fn create_endpoint(&self, namespace: &str, endpoint: &Service) -> ClusterResult<()> {
        let name = object_name(&endpoint.metadata);
        debug!("Creating Service {}/{}", namespace, name);

        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), endpoint)
            .await
            .map_err(|e| map_error(e, Write::Create, "Service", namespace, name))?;
        Ok(())
    }

    async fn create_route(&self, namespace: &str, route: &Ingress) -> ClusterResult<()> {
        let name = object_name(&route.metadata);
        debug!("Creating Ingress {}/{}", namespace, name);

        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), route)
            .await
            .map_err(|e| map_error(e, Write::Create, "Ingress", namespace, name))?;
        Ok(())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| map_error(e, Write::Replace, "Deployment", namespace, name))
    }

    async fn replace_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        let name = object_name(&workload.metadata);
        debug!("Replacing Deployment {}/{}", namespace, name);

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), workload)
            .await
            .map_err(|e| map_error(e, Write::Replace, "Deployment", namespace, name))?;
        Ok(())
    }

    async fn list_workloads(&self, label_selector: &str) -> ClusterResult<Vec<Deployment>> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| map_error(e, Write::Replace, "Deployment", "", label_selector))?;
        Ok(list.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_conflict_depends_on_write() {
        assert!(matches!(
            map_error(api_error(409), Write::Create, "Service", "default", "shop"),
            ClusterError::AlreadyExists { kind: "Service", .. }
        ));
        assert!(matches!(
            map_error(api_error(409), Write::Replace, "Deployment", "default", "shop"),
            ClusterError::Conflict { kind: "Deployment", .. }
        ));
    }

    #[test]
    fn test_not_found_and_other_codes() {
        assert!(matches!(
            map_error(api_error(404), Write::Replace, "Deployment", "default", "shop"),
            ClusterError::NotFound { .. }
        ));
        assert_eq!(
            map_error(api_error(422), Write::Create, "Ingress", "default", "shop"),
            ClusterError::Api {
                code: 422,
                message: "status 422".to_string()
            }
        );
    }

    #[test]
    fn test_access_from_dev_flag() {
        assert_eq!(ClusterAccess::from_dev_flag(true), ClusterAccess::Kubeconfig);
        assert_eq!(ClusterAccess::from_dev_flag(false), ClusterAccess::InCluster);
    }
}
