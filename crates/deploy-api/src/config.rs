//! Configuration management for the deploy API
//!
//! Loads configuration from environment variables with defaults matching the
//! shared hosting installation.

use anyhow::{Context, Result};
use image_inspector::RegistryCredentials;
use leash_common::{DeploymentDefaults, Platform};
use stack_deployer::{ClusterAccess, RouteOptions};
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Namespace, TLS secret and owner applied to every deployment
    pub defaults: DeploymentDefaults,

    /// Certificate issuer and ingress class for routes
    pub route: RouteOptions,

    /// Platforms every image must provide
    pub required_platforms: Vec<Platform>,

    /// Registry login, anonymous when unset
    pub registry_credentials: Option<RegistryCredentials>,

    /// How the cluster API is reached
    pub cluster_access: ClusterAccess,

    /// Timeout for registry HTTP calls
    pub request_timeout: Duration,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let defaults = DeploymentDefaults::default();
        let route = RouteOptions::default();

        let registry_credentials = match (
            env::var("REGISTRY_USERNAME").ok(),
            env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Some(RegistryCredentials { username, password }),
            (None, None) => None,
            _ => anyhow::bail!("REGISTRY_USERNAME and REGISTRY_PASSWORD must be set together"),
        };

        let config = Config {
            api_host: var_or("API_HOST", "0.0.0.0"),

            api_port: var_or("API_PORT", "3000")
                .parse()
                .context("Invalid API_PORT")?,

            defaults: DeploymentDefaults {
                namespace: var_or("DEPLOY_NAMESPACE", &defaults.namespace),
                tls_secret_name: var_or("TLS_SECRET_NAME", &defaults.tls_secret_name),
                username: var_or("DEPLOY_USERNAME", &defaults.username),
            },

            route: RouteOptions {
                cluster_issuer: var_or("CLUSTER_ISSUER", &route.cluster_issuer),
                ingress_class: var_or("INGRESS_CLASS", &route.ingress_class),
            },

            required_platforms: Platform::parse_list(&var_or(
                "REQUIRED_PLATFORMS",
                "linux/amd64,linux/arm64",
            ))
            .context("Invalid REQUIRED_PLATFORMS")?,

            registry_credentials,

            cluster_access: ClusterAccess::from_dev_flag(var_or("DEV", "false") == "true"),

            request_timeout: Duration::from_secs(
                var_or("REQUEST_TIMEOUT_SECS", "30")
                    .parse()
                    .context("Invalid REQUEST_TIMEOUT_SECS")?,
            ),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.required_platforms.is_empty() {
            anyhow::bail!("REQUIRED_PLATFORMS must name at least one platform");
        }

        if self.defaults.namespace.is_empty() {
            anyhow::bail!("DEPLOY_NAMESPACE must not be empty");
        }

        if self.defaults.username.is_empty() {
            anyhow::bail!("DEPLOY_USERNAME must not be empty");
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be greater than 0");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            api_host: "0.0.0.0".to_string(),
            api_port: 3000,
            defaults: DeploymentDefaults::default(),
            route: RouteOptions::default(),
            required_platforms: Platform::default_required(),
            registry_credentials: None,
            cluster_access: ClusterAccess::InCluster,
            request_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_config_defaults() {
        for name in [
            "API_HOST",
            "API_PORT",
            "DEPLOY_NAMESPACE",
            "TLS_SECRET_NAME",
            "DEPLOY_USERNAME",
            "CLUSTER_ISSUER",
            "INGRESS_CLASS",
            "REQUIRED_PLATFORMS",
            "REGISTRY_USERNAME",
            "REGISTRY_PASSWORD",
            "DEV",
            "REQUEST_TIMEOUT_SECS",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env().expect("Failed to load config");

        assert_eq!(config.api_address(), "0.0.0.0:3000");
        assert_eq!(config.defaults, DeploymentDefaults::default());
        assert_eq!(config.route, RouteOptions::default());
        assert_eq!(config.required_platforms, Platform::default_required());
        assert!(config.registry_credentials.is_none());
        assert_eq!(config.cluster_access, ClusterAccess::InCluster);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_api_address() {
        let config = Config {
            api_host: "127.0.0.1".to_string(),
            api_port: 9000,
            ..config()
        };

        assert_eq!(config.api_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_invalid_port() {
        let config = Config {
            api_port: 0,
            ..config()
        };

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("API_PORT must be greater than 0"));
    }

    #[test]
    fn test_validate_requires_platforms() {
        let config = Config {
            required_platforms: Vec::new(),
            ..config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_namespace() {
        let mut config = config();
        config.defaults.namespace.clear();

        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("DEPLOY_NAMESPACE"));
    }
}
