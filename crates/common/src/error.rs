use crate::platform::Platform;
use crate::request::FieldError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stage of a stack submission, in the order the stages run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Workload,
    Endpoint,
    Route,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::Workload, Stage::Endpoint, Stage::Route];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Workload => "workload",
            Stage::Endpoint => "endpoint",
            Stage::Route => "route",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an orchestrator backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("orchestrator API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("request validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    /// The registry answered and refused: unknown image, denied access
    #[error("failed to fetch image metadata: {0}")]
    RegistryFetch(String),

    /// The registry could not be reached or failed on its side
    #[error("image registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("invalid image manifest: {0}")]
    ManifestDecode(#[from] serde_json::Error),

    #[error("image is missing required platforms: {}", join_platforms(.missing))]
    MissingPlatforms {
        required: Vec<Platform>,
        missing: Vec<Platform>,
    },

    #[error("failed to create {stage}: {cause}")]
    Apply {
        stage: Stage,
        #[source]
        cause: ClusterError,
    },

    #[error("deployment {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("deployment {namespace}/{name} changed during update")]
    UpdateConflict { namespace: String, name: String },

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Short machine-readable identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::InvalidReference { .. } => "invalid_reference",
            Error::RegistryFetch(_) => "registry_fetch_error",
            Error::RegistryUnavailable(_) => "registry_unavailable",
            Error::ManifestDecode(_) => "manifest_decode_error",
            Error::MissingPlatforms { .. } => "missing_platforms",
            Error::Apply { .. } => "apply_error",
            Error::NotFound { .. } => "not_found",
            Error::UpdateConflict { .. } => "update_conflict",
            Error::Orchestrator(_) => "orchestrator_error",
            Error::Cancelled => "cancelled",
        }
    }
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(Platform::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
