//! Submits composed stacks and manages their workloads afterwards

use crate::cluster::{ClusterApi, ClusterResult};
use crate::composer::ComposedStack;
use crate::labels;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use leash_common::{ClusterError, Error, Result, Stage};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Applies stacks to a cluster in workload, endpoint, route order
#[derive(Clone)]
pub struct StackApplier {
    cluster: Arc<dyn ClusterApi>,
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = ClusterResult<T>>,
) -> ClusterResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClusterError::Cancelled),
        result = call => result,
    }
}

impl StackApplier {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Create all three objects of `stack` in `namespace`
    ///
    /// Stops at the first failing stage. Objects created by earlier stages are
    /// left in place; the error names the stage so the caller can clean up or
    /// re-apply.
    pub async fn apply(
        &self,
        stack: &ComposedStack,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for stage in Stage::ORDER {
            let call = async {
                match stage {
                    Stage::Workload => self.cluster.create_workload(namespace, &stack.workload).await,
                    Stage::Endpoint => self.cluster.create_endpoint(namespace, &stack.endpoint).await,
                    Stage::Route => self.cluster.create_route(namespace, &stack.route).await,
                }
            };

            if let Err(cause) = cancellable(cancel, call).await {
                error!(
                    "Failed to create {} for {}/{}: {}",
                    stage,
                    namespace,
                    stack.name(),
                    cause
                );
                if stage != Stage::Workload {
                    warn!(
                        "Stack {}/{} left partially applied (failed at {})",
                        namespace,
                        stack.name(),
                        stage
                    );
                }
                return Err(Error::Apply { stage, cause });
            }

            info!("Created {} {}/{}", stage, namespace, stack.name());
        }

        Ok(())
    }

    /// Workloads owned by `username`, across all namespaces
    pub async fn list_by_owner(&self, username: &str) -> Result<Vec<Deployment>> {
        let selector = labels::owner_selector(username);
        self.cluster
            .list_workloads(&selector)
            .await
            .map_err(|e| Error::Orchestrator(e.to_string()))
    }

    /// Force a rolling recreation of a workload's pods
    pub async fn restart(&self, namespace: &str, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.restart_at(namespace, name, Utc::now(), cancel).await
    }

    /// [`restart`](Self::restart) with an explicit restart timestamp
    pub async fn restart_at(
        &self,
        namespace: &str,
        name: &str,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lifecycle_error = |err: ClusterError| match err {
            ClusterError::NotFound { .. } => Error::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            ClusterError::Conflict { .. } => Error::UpdateConflict {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            ClusterError::Cancelled => Error::Cancelled,
            other => Error::Orchestrator(other.to_string()),
        };

        let mut workload = cancellable(cancel, self.cluster.get_workload(namespace, name))
            .await
            .map_err(lifecycle_error)?
            .ok_or_else(|| Error::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        workload
            .spec
            .get_or_insert_with(Default::default)
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                labels::RESTARTED_AT.to_string(),
                at.to_rfc3339_opts(SecondsFormat::Secs, true),
            );

        cancellable(cancel, self.cluster.replace_workload(namespace, &workload))
            .await
            .map_err(lifecycle_error)?;

        info!("Restarted workload {}/{}", namespace, name);
        Ok(())
    }
}
