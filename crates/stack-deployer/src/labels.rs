//! Labels and annotations placed on composed objects

use leash_common::DeploymentConfig;
use std::collections::BTreeMap;

/// Workload identity, also the pod selector
pub const APP: &str = "app";

/// Owning user; the key owner listings select on
pub const OWNER: &str = "leashUser";

pub const MANAGED_BY: &str = "managedBy";

pub const CREATED_BY: &str = "created-by";

/// Requests a certificate for the route from the named cluster issuer
pub const CLUSTER_ISSUER: &str = "cert-manager.io/cluster-issuer";

/// Pod template annotation whose change triggers a rolling restart
pub const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

/// Labels shared by every object of one stack
pub fn common_labels(config: &DeploymentConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP.to_string(), config.project_name.clone()),
        (OWNER.to_string(), config.username.clone()),
        (MANAGED_BY.to_string(), config.username.clone()),
        (CREATED_BY.to_string(), config.username.clone()),
    ])
}

/// Pod selector for the stack's workload
pub fn selector(config: &DeploymentConfig) -> BTreeMap<String, String> {
    BTreeMap::from([(APP.to_string(), config.project_name.clone())])
}

/// Label selector matching every workload owned by `username`
pub fn owner_selector(username: &str) -> String {
    format!("{}={}", OWNER, username)
}
