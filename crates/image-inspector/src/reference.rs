//! Container image references
//!
//! Accepts the usual `[registry/]repository[:tag][@digest]` forms. References
//! without a registry host resolve to Docker Hub, and single-component Docker
//! Hub repositories get the `library/` prefix.

use leash_common::{Error, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

pub const DOCKER_HUB: &str = "index.docker.io";
pub const DEFAULT_TAG: &str = "latest";

static REPOSITORY_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*$").expect("repository pattern is valid")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern is valid"));

static DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
        .expect("digest pattern is valid")
});

static REGISTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\[[0-9a-fA-F:]+\]|[a-zA-Z0-9](?:[a-zA-Z0-9.-]*[a-zA-Z0-9])?)(?::[0-9]+)?$")
        .expect("registry pattern is valid")
});

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if input.chars().any(char::is_whitespace) {
            return Err(invalid("reference contains whitespace"));
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST.is_match(digest) {
                    return Err(invalid("digest must be algorithm:hex"));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A colon after the last slash starts the tag; earlier ones are ports
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name[split + 1..];
                if !TAG.is_match(tag) {
                    return Err(invalid("tag contains invalid characters"));
                }
                (&name[..split], Some(tag.to_string()))
            }
            None => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => (host.to_string(), rest.to_string()),
            _ => (DOCKER_HUB.to_string(), name.to_string()),
        };

        if !REGISTRY.is_match(&registry) {
            return Err(invalid("registry host is malformed"));
        }

        let registry = if registry == "docker.io" {
            DOCKER_HUB.to_string()
        } else {
            registry
        };

        let repository = if registry == DOCKER_HUB && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        if repository.is_empty() || repository.len() > 255 {
            return Err(invalid("repository must be between 1 and 255 characters"));
        }
        if !repository.split('/').all(|c| REPOSITORY_COMPONENT.is_match(c)) {
            return Err(invalid(
                "repository must be lowercase alphanumeric components separated by '/'",
            ));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The manifest reference sent to the registry: the digest when pinned, else the tag
    pub fn reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// `http` for local registries, `https` for everything else
    pub fn scheme(&self) -> &'static str {
        let host = match self.registry.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => self.registry.as_str(),
        };

        if matches!(host, "localhost" | "127.0.0.1" | "[::1]") || host.ends_with(".local") {
            "http"
        } else {
            "https"
        }
    }

    /// Base URL of the registry's distribution API for this repository
    pub fn api_url(&self) -> String {
        format!("{}://{}/v2/{}", self.scheme(), self.registry, self.repository)
    }

    pub fn manifest_url(&self, reference: &str) -> String {
        format!("{}/manifests/{}", self.api_url(), reference)
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
