//! Deployment requests and their validation

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Deployment request as supplied by a caller
///
/// Missing fields decode to empty values so that the [`Validator`] reports
/// them as `required` instead of the body failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentRequest {
    /// Project name, used as the name of every created object
    #[serde(rename = "project")]
    pub project_name: String,

    /// Fully-qualified domain the route answers on
    #[serde(rename = "domain")]
    pub domain_name: String,

    /// Port the container listens on
    #[serde(rename = "port")]
    pub container_port: i64,

    /// Container image reference
    #[serde(rename = "image")]
    pub image: String,
}

/// A single failed constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Request field that failed, by its wire name
    pub field: String,

    /// Constraint that failed (`required`, `alphanum`, `dns1123`, `min`, `max`, `fqdn`)
    pub tag: String,

    /// Constraint parameter, empty when the constraint takes none
    pub param: String,
}

impl FieldError {
    fn new(field: &str, tag: &str, param: &str) -> Self {
        Self {
            field: field.to_string(),
            tag: tag.to_string(),
            param: param.to_string(),
        }
    }
}

/// A request that passed validation. Fields are read-only from here on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    project_name: String,
    domain_name: String,
    container_port: i32,
    image: String,
}

impl ValidatedRequest {
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    pub fn container_port(&self) -> i32 {
        self.container_port
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

/// Checks deployment requests against the naming, domain and port rules
#[derive(Debug, Clone)]
pub struct Validator {
    fqdn: Regex,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub const PROJECT_MIN_LEN: usize = 3;
    pub const PROJECT_MAX_LEN: usize = 63;
    pub const DOMAIN_MAX_LEN: usize = 253;

    pub fn new() -> Self {
        Self {
            fqdn: Regex::new(
                r"^([a-zA-Z0-9][a-zA-Z0-9-]{0,62})(\.[a-zA-Z0-9][a-zA-Z0-9-]{0,62})*?(\.[a-zA-Z][a-zA-Z0-9]{0,62})\.?$",
            )
            .expect("fqdn pattern is valid"),
        }
    }

    /// Validate a request, collecting one error per failing field
    pub fn validate(&self, request: &DeploymentRequest) -> Result<ValidatedRequest, Vec<FieldError>> {
        let mut errors = Vec::new();

        if let Some(err) = self.check_project_name(&request.project_name) {
            errors.push(err);
        }
        if let Some(err) = self.check_domain(&request.domain_name) {
            errors.push(err);
        }
        if let Some(err) = Self::check_port(request.container_port) {
            errors.push(err);
        }
        if request.image.trim().is_empty() {
            errors.push(FieldError::new("image", "required", ""));
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ValidatedRequest {
            project_name: request.project_name.clone(),
            domain_name: normalize_domain(&request.domain_name),
            container_port: request.container_port as i32,
            image: request.image.trim().to_string(),
        })
    }

    /// Validate just an image reference field, as used by the platform check
    pub fn validate_image(&self, field: &str, image: &str) -> Result<(), Vec<FieldError>> {
        if image.trim().is_empty() {
            return Err(vec![FieldError::new(field, "required", "")]);
        }
        Ok(())
    }

    fn check_project_name(&self, name: &str) -> Option<FieldError> {
        if name.is_empty() {
            return Some(FieldError::new("project", "required", ""));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Some(FieldError::new("project", "alphanum", ""));
        }
        // Object names are DNS-1123 labels
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Some(FieldError::new("project", "dns1123", ""));
        }
        if name.len() < Self::PROJECT_MIN_LEN {
            return Some(FieldError::new(
                "project",
                "min",
                &Self::PROJECT_MIN_LEN.to_string(),
            ));
        }
        if name.len() > Self::PROJECT_MAX_LEN {
            return Some(FieldError::new(
                "project",
                "max",
                &Self::PROJECT_MAX_LEN.to_string(),
            ));
        }
        None
    }

    fn check_domain(&self, domain: &str) -> Option<FieldError> {
        if domain.is_empty() {
            return Some(FieldError::new("domain", "required", ""));
        }
        if domain.len() > Self::DOMAIN_MAX_LEN || !self.fqdn.is_match(domain) {
            return Some(FieldError::new("domain", "fqdn", ""));
        }
        None
    }

    fn check_port(port: i64) -> Option<FieldError> {
        match port {
            0 => Some(FieldError::new("port", "required", "")),
            p if p < 1 => Some(FieldError::new("port", "min", "1")),
            p if p > 65535 => Some(FieldError::new("port", "max", "65535")),
            _ => None,
        }
    }
}

/// Route hosts must be lowercase and carry no root dot
fn normalize_domain(domain: &str) -> String {
    domain
        .strip_suffix('.')
        .unwrap_or(domain)
        .to_ascii_lowercase()
}
