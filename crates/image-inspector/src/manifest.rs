//! Multi-platform image index as served by a registry

use leash_common::{Platform, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media types accepted when fetching a manifest, index types first
pub const ACCEPTED_MEDIA_TYPES: [&str; 4] =
    [OCI_INDEX, DOCKER_MANIFEST_LIST, OCI_MANIFEST, DOCKER_MANIFEST];

/// Image index (OCI) or manifest list (Docker)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    #[serde(default)]
    pub schema_version: u32,

    #[serde(default)]
    pub media_type: String,

    /// Per-platform manifests. Absent for single-platform image manifests.
    #[serde(default)]
    pub manifests: Vec<ImageManifest>,
}

/// One entry of an image index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    #[serde(default)]
    pub media_type: String,

    #[serde(default)]
    pub digest: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<ManifestPlatform>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPlatform {
    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub os: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl ImageIndex {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Distinct `(os, arch)` pairs listed in the index. Variants are ignored.
    pub fn platforms(&self) -> BTreeSet<Platform> {
        self.manifests
            .iter()
            .filter_map(|m| m.platform.as_ref())
            .map(|p| Platform::new(&p.os, &p.architecture))
            .collect()
    }

    /// True when the payload was a single-image manifest rather than an index
    pub fn is_single_image(&self) -> bool {
        self.manifests.is_empty()
            && matches!(self.media_type.as_str(), OCI_MANIFEST | DOCKER_MANIFEST)
    }
}
