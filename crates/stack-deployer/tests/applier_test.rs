use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use leash_common::{ClusterError, DeploymentConfig, Error, Stage};
use stack_deployer::{
    labels, ClusterApi, ClusterResult, MemoryCluster, StackApplier, StackComposer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cluster whose caller goes away once the workload is created
struct CancelAfterWorkload {
    inner: Arc<MemoryCluster>,
    cancel: CancellationToken,
}

#[async_trait]
impl ClusterApi for CancelAfterWorkload {
    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        let result = self.inner.create_workload(namespace, workload).await;
        self.cancel.cancel();
        result
    }

    async fn create_endpoint(&self, namespace: &str, endpoint: &Service) -> ClusterResult<()> {
        self.inner.create_endpoint(namespace, endpoint).await
    }

    async fn create_route(&self, namespace: &str, route: &Ingress) -> ClusterResult<()> {
        self.inner.create_route(namespace, route).await
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Option<Deployment>> {
        self.inner.get_workload(namespace, name).await
    }

    async fn replace_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        self.inner.replace_workload(namespace, workload).await
    }

    async fn list_workloads(&self, label_selector: &str) -> ClusterResult<Vec<Deployment>> {
        self.inner.list_workloads(label_selector).await
    }
}

fn config(project: &str, user: &str) -> DeploymentConfig {
    DeploymentConfig {
        project_name: project.to_string(),
        username: user.to_string(),
        domain_name: format!("{}.example.com", project),
        image: "nginx:latest".to_string(),
        container_port: 8080,
        namespace: "default".to_string(),
        tls_secret_name: "wildcard-mkr-certs".to_string(),
    }
}

fn setup() -> (Arc<MemoryCluster>, StackApplier) {
    let cluster = Arc::new(MemoryCluster::new());
    let applier = StackApplier::new(cluster.clone());
    (cluster, applier)
}

async fn deploy(applier: &StackApplier, cfg: &DeploymentConfig) {
    let stack = StackComposer::default().compose(cfg);
    applier
        .apply(&stack, &cfg.namespace, &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_apply_creates_stages_in_order() {
    let (cluster, applier) = setup();
    deploy(&applier, &config("shop", "alice")).await;

    assert_eq!(
        cluster.calls().await,
        vec![
            "create workload default/shop",
            "create endpoint default/shop",
            "create route default/shop",
        ]
    );
    assert!(cluster.workload("default", "shop").await.is_some());
    assert!(cluster.endpoint("default", "shop").await.is_some());
    assert!(cluster.route("default", "shop").await.is_some());
}

#[tokio::test]
async fn test_endpoint_failure_stops_before_route() {
    let (cluster, applier) = setup();
    cluster
        .fail_stage(
            Stage::Endpoint,
            ClusterError::Api {
                code: 500,
                message: "etcd unavailable".to_string(),
            },
        )
        .await;

    let stack = StackComposer::default().compose(&config("shop", "alice"));
    let err = applier
        .apply(&stack, "default", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::Apply { stage, cause } => {
            assert_eq!(stage, Stage::Endpoint);
            assert_eq!(
                cause,
                ClusterError::Api {
                    code: 500,
                    message: "etcd unavailable".to_string()
                }
            );
        }
        other => panic!("expected apply error, got {:?}", other),
    }

    // Earlier stages are not rolled back
    assert!(cluster.workload("default", "shop").await.is_some());
    assert!(cluster.endpoint("default", "shop").await.is_none());
    assert!(cluster.route("default", "shop").await.is_none());
    assert_eq!(cluster.calls().await.len(), 2);
}

#[tokio::test]
async fn test_existing_workload_fails_first_stage() {
    let (cluster, applier) = setup();
    deploy(&applier, &config("shop", "alice")).await;

    let stack = StackComposer::default().compose(&config("shop", "alice"));
    let err = applier
        .apply(&stack, "default", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Apply {
            stage: Stage::Workload,
            cause: ClusterError::AlreadyExists { .. }
        }
    ));
    assert_eq!(cluster.calls().await.len(), 4);
}

#[tokio::test]
async fn test_cancelled_apply_submits_nothing() {
    let (cluster, applier) = setup();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stack = StackComposer::default().compose(&config("shop", "alice"));
    let err = applier.apply(&stack, "default", &cancel).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Apply {
            stage: Stage::Workload,
            cause: ClusterError::Cancelled
        }
    ));
    assert!(cluster.calls().await.is_empty());
}

#[tokio::test]
async fn test_cancel_between_stages_skips_remaining() {
    let cluster = Arc::new(MemoryCluster::new());
    let cancel = CancellationToken::new();
    let applier = StackApplier::new(Arc::new(CancelAfterWorkload {
        inner: cluster.clone(),
        cancel: cancel.clone(),
    }));

    let stack = StackComposer::default().compose(&config("shop", "alice"));
    let err = applier.apply(&stack, "default", &cancel).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Apply {
            stage: Stage::Endpoint,
            cause: ClusterError::Cancelled
        }
    ));
    assert_eq!(cluster.calls().await, vec!["create workload default/shop"]);
    assert!(cluster.workload("default", "shop").await.is_some());
    assert!(cluster.endpoint("default", "shop").await.is_none());
    assert!(cluster.route("default", "shop").await.is_none());
}

#[tokio::test]
async fn test_restart_sets_annotation() {
    let (cluster, applier) = setup();
    deploy(&applier, &config("shop", "alice")).await;

    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
    applier
        .restart_at("default", "shop", at, &CancellationToken::new())
        .await
        .unwrap();

    let workload = cluster.workload("default", "shop").await.unwrap();
    let annotations = workload
        .spec
        .unwrap()
        .template
        .metadata
        .unwrap()
        .annotations
        .unwrap();
    assert_eq!(annotations[labels::RESTARTED_AT], "2024-03-01T12:30:00Z");
}

#[tokio::test]
async fn test_restart_twice_updates_annotation() {
    let (cluster, applier) = setup();
    deploy(&applier, &config("shop", "alice")).await;

    let cancel = CancellationToken::new();
    let first = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
    applier.restart_at("default", "shop", first, &cancel).await.unwrap();
    applier.restart_at("default", "shop", second, &cancel).await.unwrap();

    let workload = cluster.workload("default", "shop").await.unwrap();
    let template = workload.spec.unwrap().template;
    assert_eq!(
        template.metadata.unwrap().annotations.unwrap()[labels::RESTARTED_AT],
        "2024-03-01T13:00:00Z"
    );
}

#[tokio::test]
async fn test_restart_missing_workload() {
    let (cluster, applier) = setup();

    let err = applier
        .restart("default", "ghost", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { ref name, .. } if name == "ghost"));
    assert!(cluster.calls().await.is_empty());
}

#[tokio::test]
async fn test_restart_conflict() {
    let (cluster, applier) = setup();
    deploy(&applier, &config("shop", "alice")).await;
    cluster.conflict_on_next_replace().await;

    let err = applier
        .restart("default", "shop", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UpdateConflict { .. }));

    let workload = cluster.workload("default", "shop").await.unwrap();
    let template = workload.spec.unwrap().template;
    let annotations = template.metadata.unwrap().annotations;
    assert!(annotations.map_or(true, |a| !a.contains_key(labels::RESTARTED_AT)));
}

#[tokio::test]
async fn test_list_by_owner() {
    let (cluster, applier) = setup();
    deploy(&applier, &config("shop", "alice")).await;
    deploy(&applier, &config("blog", "alice")).await;

    let mut other = config("wiki", "bob");
    other.namespace = "tenants".to_string();
    deploy(&applier, &other).await;

    let mut names: Vec<String> = applier
        .list_by_owner("alice")
        .await
        .unwrap()
        .into_iter()
        .filter_map(|w| w.metadata.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["blog", "shop"]);

    let bob = applier.list_by_owner("bob").await.unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].metadata.namespace.as_deref(), Some("tenants"));

    assert!(applier.list_by_owner("carol").await.unwrap().is_empty());
    assert!(cluster.list_workloads("leashUser=alice").await.unwrap().len() == 2);
}
