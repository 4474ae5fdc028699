pub mod config;
pub mod error;
pub mod platform;
pub mod request;

pub use config::{DeploymentConfig, DeploymentDefaults};
pub use error::{ClusterError, Error, Result, Stage};
pub use platform::{ParsePlatformError, Platform};
pub use request::{DeploymentRequest, FieldError, ValidatedRequest, Validator};
