//! In-memory [`ClusterApi`] for tests and dry runs

use crate::cluster::{ClusterApi, ClusterResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use leash_common::{ClusterError, Stage};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

type Key = (String, String);

#[derive(Default)]
struct MemoryState {
    workloads: BTreeMap<Key, Deployment>,
    endpoints: BTreeMap<Key, Service>,
    routes: BTreeMap<Key, Ingress>,
    failures: HashMap<Stage, ClusterError>,
    conflict_on_replace: bool,
    version: u64,
    calls: Vec<String>,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Keeps objects in maps keyed by namespace and name, with resource versions
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<MemoryState>,
}

fn key(namespace: &str, metadata: &ObjectMeta) -> Key {
    (
        namespace.to_string(),
        metadata.name.clone().unwrap_or_default(),
    )
}

/// Labels of the form `k=v[,k=v...]`
fn matches_selector(metadata: &ObjectMeta, selector: &str) -> bool {
    let labels = metadata.labels.as_ref();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|l| l.get(k.trim())).map(String::as_str) == Some(v.trim()),
            None => false,
        })
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next submission of `stage` fail with `error`
    pub async fn fail_stage(&self, stage: Stage, error: ClusterError) {
        self.state.lock().await.failures.insert(stage, error);
    }

    /// Simulate another writer updating the workload right before the next replace
    pub async fn conflict_on_next_replace(&self) {
        self.state.lock().await.conflict_on_replace = true;
    }

    pub async fn workload(&self, namespace: &str, name: &str) -> Option<Deployment> {
        let state = self.state.lock().await;
        state
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn endpoint(&self, namespace: &str, name: &str) -> Option<Service> {
        let state = self.state.lock().await;
        state
            .endpoints
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn route(&self, namespace: &str, name: &str) -> Option<Ingress> {
        let state = self.state.lock().await;
        state
            .routes
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Write calls received so far, e.g. `create workload default/shop`
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    async fn create<T: Clone>(
        &self,
        stage: Stage,
        kind: &'static str,
        namespace: &str,
        object: &T,
        metadata: impl Fn(&mut T) -> &mut ObjectMeta,
        store: impl Fn(&mut MemoryState) -> &mut BTreeMap<Key, T>,
    ) -> ClusterResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut object = object.clone();
        let key = key(namespace, metadata(&mut object));

        state
            .calls
            .push(format!("create {} {}/{}", stage, key.0, key.1));

        if let Some(err) = state.failures.remove(&stage) {
            return Err(err);
        }

        if store(&mut *state).contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind,
                namespace: key.0,
                name: key.1,
            });
        }

        let version = state.next_version();
        let meta = metadata(&mut object);
        meta.namespace = Some(namespace.to_string());
        meta.resource_version = Some(version);

        store(&mut *state).insert(key, object);
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        self.create(
            Stage::Workload,
            "Deployment",
            namespace,
            workload,
            |o| &mut o.metadata,
            |s| &mut s.workloads,
        )
        .await
    }

    async fn create_endpoint(&self, namespace: &str, endpoint: &Service) -> ClusterResult<()> {
        self.create(
            Stage::Endpoint,
            "Service",
            namespace,
            endpoint,
            |o| &mut o.metadata,
            |s| &mut s.endpoints,
        )
        .await
    }

    async fn create_route(&self, namespace: &str, route: &Ingress) -> ClusterResult<()> {
        self.create(
            Stage::Route,
            "Ingress",
            namespace,
            route,
            |o| &mut o.metadata,
            |s| &mut s.routes,
        )
        .await
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Option<Deployment>> {
        Ok(self.workload(namespace, name).await)
    }

    async fn replace_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        let mut state = self.state.lock().await;
        let key = key(namespace, &workload.metadata);

        state
            .calls
            .push(format!("replace workload {}/{}", key.0, key.1));

        if !state.workloads.contains_key(&key) {
            return Err(ClusterError::NotFound {
                kind: "Deployment",
                namespace: key.0,
                name: key.1,
            });
        }

        if std::mem::take(&mut state.conflict_on_replace) {
            let version = state.next_version();
            if let Some(stored) = state.workloads.get_mut(&key) {
                stored.metadata.resource_version = Some(version);
            }
        }

        let stored_version = state
            .workloads
            .get(&key)
            .and_then(|w| w.metadata.resource_version.clone());
        if stored_version != workload.metadata.resource_version {
            return Err(ClusterError::Conflict {
                kind: "Deployment",
                namespace: key.0,
                name: key.1,
            });
        }

        let mut updated = workload.clone();
        updated.metadata.namespace = Some(namespace.to_string());
        updated.metadata.resource_version = Some(state.next_version());
        state.workloads.insert(key, updated);
        Ok(())
    }

    async fn list_workloads(&self, label_selector: &str) -> ClusterResult<Vec<Deployment>> {
        let state = self.state.lock().await;
        Ok(state
            .workloads
            .values()
            .filter(|w| matches_selector(&w.metadata, label_selector))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(name: &str, owner: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    "leashUser".to_string(),
                    owner.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_namespace_and_version() {
        let cluster = MemoryCluster::new();
        cluster
            .create_workload("default", &workload("shop", "alice"))
            .await
            .unwrap();

        let stored = cluster.workload("default", "shop").await.unwrap();
        assert_eq!(stored.metadata.namespace.as_deref(), Some("default"));
        assert!(stored.metadata.resource_version.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let cluster = MemoryCluster::new();
        cluster
            .create_workload("default", &workload("shop", "alice"))
            .await
            .unwrap();

        let err = cluster
            .create_workload("default", &workload("shop", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_stale_replace_conflicts() {
        let cluster = MemoryCluster::new();
        cluster
            .create_workload("default", &workload("shop", "alice"))
            .await
            .unwrap();

        let current = cluster.workload("default", "shop").await.unwrap();
        cluster.replace_workload("default", &current).await.unwrap();

        // `current` now carries an outdated version
        let err = cluster.replace_workload("default", &current).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_list_by_label() {
        let cluster = MemoryCluster::new();
        cluster
            .create_workload("default", &workload("shop", "alice"))
            .await
            .unwrap();
        cluster
            .create_workload("other", &workload("blog", "bob"))
            .await
            .unwrap();

        let alice = cluster.list_workloads("leashUser=alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].metadata.name.as_deref(), Some("shop"));

        assert!(cluster.list_workloads("leashUser=carol").await.unwrap().is_empty());
    }
}
