//! Platform support check for container images

use crate::manifest::ImageIndex;
use crate::reference::ImageReference;
use crate::registry_client::RegistryClient;
use leash_common::{Error, Platform, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of comparing required platforms against an image index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformCheck {
    pub required: Vec<Platform>,
    pub discovered: BTreeSet<Platform>,
    pub missing: Vec<Platform>,
}

impl PlatformCheck {
    /// Set containment of `required` in `discovered`
    pub fn evaluate(required: &[Platform], discovered: BTreeSet<Platform>) -> Self {
        let mut seen = BTreeSet::new();
        let required: Vec<Platform> = required
            .iter()
            .filter(|p| seen.insert(*p))
            .cloned()
            .collect();

        let missing = required
            .iter()
            .filter(|p| !discovered.contains(*p))
            .cloned()
            .collect();

        Self {
            required,
            discovered,
            missing,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.missing.is_empty()
    }

    /// Turn an unsupported result into [`Error::MissingPlatforms`]
    pub fn into_result(self) -> Result<Self> {
        if self.is_supported() {
            Ok(self)
        } else {
            Err(Error::MissingPlatforms {
                required: self.required,
                missing: self.missing,
            })
        }
    }
}

/// Checks images against a required platform set
#[derive(Clone)]
pub struct ManifestInspector {
    client: Arc<dyn RegistryClient>,
}

impl ManifestInspector {
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self { client }
    }

    /// Resolve an image and decode its top-level manifest as an index
    pub async fn fetch_index(&self, image: &str, cancel: &CancellationToken) -> Result<ImageIndex> {
        let reference = ImageReference::parse(image)?;
        debug!("Fetching manifest for {}", reference);

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            bytes = self.fetch(&reference) => bytes?,
        };

        let index = ImageIndex::from_slice(&bytes)?;
        if index.is_single_image() {
            warn!(
                "{} is a single-platform image manifest; no platforms can be read from it",
                reference
            );
        }

        Ok(index)
    }

    async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        let descriptor = self.client.resolve(reference).await?;
        self.client.fetch_manifest(&descriptor).await
    }

    /// Report which of `required` the image provides
    pub async fn check_platforms(
        &self,
        image: &str,
        required: &[Platform],
        cancel: &CancellationToken,
    ) -> Result<PlatformCheck> {
        let index = self.fetch_index(image, cancel).await?;
        let check = PlatformCheck::evaluate(required, index.platforms());

        info!(
            "Image {} provides {} platform(s), {} required missing",
            image,
            check.discovered.len(),
            check.missing.len()
        );

        Ok(check)
    }

    /// Like [`check_platforms`](Self::check_platforms), failing when any platform is missing
    pub async fn require_platforms(
        &self,
        image: &str,
        required: &[Platform],
        cancel: &CancellationToken,
    ) -> Result<PlatformCheck> {
        self.check_platforms(image, required, cancel)
            .await?
            .into_result()
    }
}
