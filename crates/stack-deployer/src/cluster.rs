//! Orchestrator access used by the stack applier

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use leash_common::ClusterError;

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Create, read, update and list operations over the three stack object kinds
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()>;

    async fn create_endpoint(&self, namespace: &str, endpoint: &Service) -> ClusterResult<()>;

    async fn create_route(&self, namespace: &str, route: &Ingress) -> ClusterResult<()>;

    /// `Ok(None)` when no workload of that name exists
    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Option<Deployment>>;

    /// Replace a workload. The object's `resourceVersion` must match the stored one.
    async fn replace_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()>;

    /// Workloads in all namespaces matching an equality label selector
    async fn list_workloads(&self, label_selector: &str) -> ClusterResult<Vec<Deployment>>;
}
