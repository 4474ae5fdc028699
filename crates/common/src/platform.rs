//! Target platform of a container image

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An `(os, architecture)` pair, written as `os/arch`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid platform {0:?}, expected os/arch")]
pub struct ParsePlatformError(pub String);

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
        }
    }

    /// Platforms every deployed image has to provide
    pub fn default_required() -> Vec<Platform> {
        vec![Platform::new("linux", "amd64"), Platform::new("linux", "arm64")]
    }

    /// Parse a comma separated list such as `linux/amd64,linux/arm64`
    pub fn parse_list(s: &str) -> Result<Vec<Platform>, ParsePlatformError> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Platform::from_str)
            .collect()
    }
}

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('/') => {
                Ok(Platform::new(os, arch))
            }
            _ => Err(ParsePlatformError(s.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

impl Serialize for Platform {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
