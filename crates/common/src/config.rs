//! Resolved deployment configuration

use crate::request::ValidatedRequest;
use serde::{Deserialize, Serialize};

/// Operator-fixed fields merged into every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDefaults {
    pub namespace: String,
    pub tls_secret_name: String,
    pub username: String,
}

impl Default for DeploymentDefaults {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            tls_secret_name: "wildcard-mkr-certs".to_string(),
            username: "system".to_string(),
        }
    }
}

/// Everything needed to compose and apply one stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub project_name: String,
    pub username: String,
    pub domain_name: String,
    pub image: String,
    pub container_port: i32,
    pub namespace: String,
    pub tls_secret_name: String,
}

impl DeploymentConfig {
    pub fn from_request(request: &ValidatedRequest, defaults: &DeploymentDefaults) -> Self {
        Self {
            project_name: request.project_name().to_string(),
            username: defaults.username.clone(),
            domain_name: request.domain_name().to_string(),
            image: request.image().to_string(),
            container_port: request.container_port(),
            namespace: defaults.namespace.clone(),
            tls_secret_name: defaults.tls_secret_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{DeploymentRequest, Validator};

    #[test]
    fn test_merge_with_defaults() {
        let request = DeploymentRequest {
            project_name: "shop".to_string(),
            domain_name: "shop.example.com".to_string(),
            container_port: 3000,
            image: "nginx:latest".to_string(),
        };
        let validated = Validator::new().validate(&request).unwrap();

        let defaults = DeploymentDefaults {
            namespace: "tenants".to_string(),
            tls_secret_name: "wildcard-certs".to_string(),
            username: "alice".to_string(),
        };
        let config = DeploymentConfig::from_request(&validated, &defaults);

        assert_eq!(config.project_name, "shop");
        assert_eq!(config.domain_name, "shop.example.com");
        assert_eq!(config.container_port, 3000);
        assert_eq!(config.namespace, "tenants");
        assert_eq!(config.tls_secret_name, "wildcard-certs");
        assert_eq!(config.username, "alice");
    }

    #[test]
    fn test_domain_reaches_config_normalized() {
        let request = DeploymentRequest {
            project_name: "shop".to_string(),
            domain_name: "Shop.Example.com.".to_string(),
            container_port: 3000,
            image: "nginx:latest".to_string(),
        };
        let validated = Validator::new().validate(&request).unwrap();
        let config = DeploymentConfig::from_request(&validated, &DeploymentDefaults::default());

        assert_eq!(config.domain_name, "shop.example.com");
    }
}
