//! Stack composition and submission
//!
//! [`StackComposer`] turns a [`leash_common::DeploymentConfig`] into a
//! workload, an endpoint and a route. [`StackApplier`] submits them through a
//! [`ClusterApi`] and handles the restart and listing operations on workloads
//! it created earlier.

pub mod applier;
pub mod cluster;
pub mod composer;
pub mod kube_client;
pub mod labels;
pub mod memory;

pub use applier::StackApplier;
pub use cluster::{ClusterApi, ClusterResult};
pub use composer::{ComposedStack, RouteOptions, StackComposer, SERVICE_PORT};
pub use kube_client::{ClusterAccess, KubeCluster};
pub use memory::MemoryCluster;
