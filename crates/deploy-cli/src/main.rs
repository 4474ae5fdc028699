//! Single-tenant deployment utility
//!
//! Commands:
//! - deploy: Check an image and create its workload, endpoint and route
//! - check: Report which required platforms an image provides
//! - list: List workloads owned by a user
//! - restart: Trigger a rolling restart of a workload

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image_inspector::{HttpRegistryClient, ManifestInspector, RegistryCredentials};
use leash_common::{DeploymentConfig, DeploymentDefaults, DeploymentRequest, Platform, Validator};
use stack_deployer::{
    ClusterAccess, ClusterApi, KubeCluster, MemoryCluster, RouteOptions, StackApplier,
    StackComposer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "deploy-cli")]
#[command(about = "Deploy multi-architecture container images to the cluster")]
struct Cli {
    /// Use the local kubeconfig instead of the in-cluster service account
    #[arg(long, env = "DEV", global = true)]
    dev: bool,

    /// Apply against an in-memory cluster and print what would be created
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(flatten)]
    registry: RegistryArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct RegistryArgs {
    /// Registry username
    #[arg(long, env = "REGISTRY_USERNAME", requires = "registry_password", global = true)]
    registry_username: Option<String>,

    /// Registry password
    #[arg(
        long,
        env = "REGISTRY_PASSWORD",
        hide_env_values = true,
        requires = "registry_username",
        global = true
    )]
    registry_password: Option<String>,

    /// Timeout for registry requests, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout: u64,
}

impl RegistryArgs {
    fn credentials(&self) -> Option<RegistryCredentials> {
        match (&self.registry_username, &self.registry_password) {
            (Some(username), Some(password)) => Some(RegistryCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check an image and create its workload, endpoint and route
    Deploy(DeployArgs),

    /// Report which required platforms an image provides
    Check {
        /// Container image reference
        image: String,

        /// Platforms the image must provide
        #[arg(long, value_delimiter = ',', default_value = "linux/amd64,linux/arm64")]
        platforms: Vec<Platform>,
    },

    /// List workloads owned by a user across all namespaces
    List {
        /// Owning user
        #[arg(short, long, default_value = "system")]
        user: String,
    },

    /// Trigger a rolling restart of a workload
    Restart {
        /// Workload name
        name: String,

        #[arg(short, long, default_value = "default")]
        namespace: String,
    },
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Project name, used for every created object
    #[arg(short, long)]
    project: String,

    /// Domain the route answers on
    #[arg(short, long)]
    domain: String,

    /// Container image reference
    #[arg(short, long)]
    image: String,

    /// Port the container listens on
    #[arg(long, default_value_t = 80)]
    port: i64,

    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Secret holding the route's TLS certificate
    #[arg(long, default_value = "wildcard-mkr-certs")]
    tls_secret: String,

    /// Owning user recorded on the objects
    #[arg(short, long, default_value = "system")]
    username: String,

    #[arg(long, env = "CLUSTER_ISSUER", default_value = "letsencrypt-prod")]
    cluster_issuer: String,

    #[arg(long, env = "INGRESS_CLASS", default_value = "nginx")]
    ingress_class: String,

    /// Platforms the image must provide
    #[arg(long, value_delimiter = ',', default_value = "linux/amd64,linux/arm64")]
    platforms: Vec<Platform>,

    /// Deploy without checking the image's platforms
    #[arg(long)]
    skip_platform_check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deploy_cli=info,stack_deployer=info,image_inspector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl+C, cancelling");
                cancel.cancel();
            }
        }
    });

    match &cli.command {
        Commands::Deploy(args) => deploy(&cli, args, &cancel).await?,
        Commands::Check { image, platforms } => check(&cli, image, platforms, &cancel).await?,
        Commands::List { user } => list(&cli, user).await?,
        Commands::Restart { name, namespace } => restart(&cli, namespace, name, &cancel).await?,
    }

    Ok(())
}

fn inspector(cli: &Cli) -> Result<ManifestInspector> {
    let client = HttpRegistryClient::new(
        cli.registry.credentials(),
        Duration::from_secs(cli.registry.timeout),
    )
    .context("Failed to create registry client")?;
    Ok(ManifestInspector::new(Arc::new(client)))
}

async fn cluster(cli: &Cli) -> Result<Arc<dyn ClusterApi>> {
    if cli.dry_run {
        info!("Dry run: using an in-memory cluster");
        return Ok(Arc::new(MemoryCluster::new()));
    }

    let cluster = KubeCluster::connect(ClusterAccess::from_dev_flag(cli.dev))
        .await
        .context("Failed to create Kubernetes client")?;
    Ok(Arc::new(cluster))
}

async fn deploy(cli: &Cli, args: &DeployArgs, cancel: &CancellationToken) -> Result<()> {
    let request = DeploymentRequest {
        project_name: args.project.clone(),
        domain_name: args.domain.clone(),
        container_port: args.port,
        image: args.image.clone(),
    };

    let validated = Validator::new().validate(&request).map_err(|errors| {
        let fields: Vec<String> = errors
            .iter()
            .map(|e| format!("{} ({})", e.field, e.tag))
            .collect();
        anyhow::anyhow!("Invalid deployment: {}", fields.join(", "))
    })?;

    if args.skip_platform_check {
        warn!("Skipping platform check for {}", validated.image());
    } else {
        let check = inspector(cli)?
            .require_platforms(validated.image(), &args.platforms, cancel)
            .await?;
        info!(
            "Image {} supports {} required platform(s)",
            validated.image(),
            check.required.len()
        );
    }

    let defaults = DeploymentDefaults {
        namespace: args.namespace.clone(),
        tls_secret_name: args.tls_secret.clone(),
        username: args.username.clone(),
    };
    let config = DeploymentConfig::from_request(&validated, &defaults);

    let composer = StackComposer::new(RouteOptions {
        cluster_issuer: args.cluster_issuer.clone(),
        ingress_class: args.ingress_class.clone(),
    });
    let stack = composer.compose(&config);

    StackApplier::new(cluster(cli).await?)
        .apply(&stack, &config.namespace, cancel)
        .await
        .with_context(|| format!("Failed to deploy {}", config.project_name))?;

    if cli.dry_run {
        println!("{}", serde_json::to_string_pretty(&stack)?);
    } else {
        println!(
            "Deployed {} to https://{} (namespace {})",
            config.project_name, config.domain_name, config.namespace
        );
    }

    Ok(())
}

async fn check(
    cli: &Cli,
    image: &str,
    platforms: &[Platform],
    cancel: &CancellationToken,
) -> Result<()> {
    let check = inspector(cli)?
        .check_platforms(image, platforms, cancel)
        .await?;

    println!("Platforms provided by {}:", image);
    for platform in &check.discovered {
        println!("  {}", platform);
    }

    check.into_result()?;
    println!("All required platforms are supported");
    Ok(())
}

async fn list(cli: &Cli, user: &str) -> Result<()> {
    let workloads = StackApplier::new(cluster(cli).await?)
        .list_by_owner(user)
        .await?;

    println!("{} deployment(s) owned by {}", workloads.len(), user);
    for workload in workloads {
        println!(
            "  {}/{}",
            workload.metadata.namespace.unwrap_or_default(),
            workload.metadata.name.unwrap_or_default()
        );
    }
    Ok(())
}

async fn restart(cli: &Cli, namespace: &str, name: &str, cancel: &CancellationToken) -> Result<()> {
    StackApplier::new(cluster(cli).await?)
        .restart(namespace, name, cancel)
        .await?;

    println!("Restarted {}/{}", namespace, name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_defaults() {
        let cli = Cli::try_parse_from([
            "deploy-cli",
            "deploy",
            "--project",
            "haylinmoore",
            "--domain",
            "haylin.script.mkr.cx",
            "--image",
            "nginx:latest",
        ])
        .unwrap();

        let Commands::Deploy(args) = cli.command else {
            panic!("expected deploy command");
        };
        assert_eq!(args.port, 80);
        assert_eq!(args.namespace, "default");
        assert_eq!(args.tls_secret, "wildcard-mkr-certs");
        assert_eq!(args.platforms, Platform::default_required());
        assert!(!args.skip_platform_check);
    }

    #[test]
    fn test_platform_list_parsing() {
        let cli = Cli::try_parse_from([
            "deploy-cli",
            "check",
            "nginx",
            "--platforms",
            "linux/amd64,linux/arm/v7",
        ]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["deploy-cli", "--dry-run", "check", "nginx", "--platforms", "linux/s390x"])
            .unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::Check { platforms, .. } => {
                assert_eq!(platforms, vec![Platform::new("linux", "s390x")]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_registry_credentials_come_in_pairs() {
        let cli = Cli::try_parse_from(["deploy-cli", "--registry-password", "secret", "list"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["deploy-cli", "--registry-username", "bot", "list"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from([
            "deploy-cli",
            "--registry-username",
            "bot",
            "--registry-password",
            "secret",
            "list",
        ])
        .unwrap();
        let credentials = cli.registry.credentials().unwrap();
        assert_eq!(credentials.username, "bot");
        assert_eq!(credentials.password, "secret");
    }
}
