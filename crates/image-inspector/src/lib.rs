//! Image Inspector
//!
//! Checks that a container image is published for every platform a
//! deployment requires. The image's top-level manifest is fetched from its
//! registry, decoded as a multi-platform index, and the `(os, arch)` pairs it
//! lists are compared against the required set.

pub mod inspector;
pub mod manifest;
pub mod reference;
pub mod registry_client;

pub use inspector::{ManifestInspector, PlatformCheck};
pub use manifest::{ImageIndex, ImageManifest, ManifestPlatform};
pub use reference::ImageReference;
pub use registry_client::{Descriptor, HttpRegistryClient, RegistryClient, RegistryCredentials};
