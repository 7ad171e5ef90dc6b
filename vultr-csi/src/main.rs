//! Vultr Block Storage CSI Driver
//!
//! Kubernetes CSI driver that provisions Vultr Block Storage volumes and
//! mounts them on Vultr instances.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vultr_csi::backend::DEFAULT_API_URL;
use vultr_csi::config::{DEFAULT_DRIVER_NAME, DRIVER_VERSION, DriverConfig};
use vultr_csi::metadata::{self, DEFAULT_METADATA_URL};
use vultr_csi::server::{self, NonBlockingServer};
use vultr_csi::{ControllerService, IdentityService, LinuxMounter, NodeService, VultrClient};

/// CLI arguments for the CSI driver
#[derive(Parser, Debug)]
#[command(name = "vultr-csi")]
#[command(about = "Vultr Block Storage CSI Driver for Kubernetes")]
#[command(version)]
struct Args {
    /// CSI endpoint (unix:///path/to/csi.sock or tcp://host:port)
    #[arg(long, env = "CSI_ENDPOINT", default_value = "unix:///csi/csi.sock")]
    endpoint: String,

    /// Vultr API key (required in controller mode)
    #[arg(long, env = "VULTR_API_KEY", hide_env_values = true)]
    token: Option<String>,

    /// Vultr API base URL
    #[arg(long, env = "VULTR_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Driver name
    #[arg(long, default_value = DEFAULT_DRIVER_NAME)]
    driver_name: String,

    /// Instance ID of this node (looked up from instance metadata if unset)
    #[arg(long, env = "CSI_NODE_ID")]
    node_id: Option<String>,

    /// Region of this node (looked up from instance metadata if unset)
    #[arg(long, env = "CSI_REGION")]
    region: Option<String>,

    /// Instance metadata document URL
    #[arg(long, default_value = DEFAULT_METADATA_URL)]
    metadata_url: String,

    /// Run in controller mode (enables controller service)
    #[arg(long, default_value = "false")]
    controller: bool,

    /// Run in node mode (enables node service)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    node: bool,

    /// Timeout for provider calls and operation polling, in seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics HTTP address (e.g., 0.0.0.0:9091)
    /// If not set, metrics endpoint is disabled
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize Prometheus metrics endpoint if configured
    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = vultr_csi::metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    if !args.controller && !args.node {
        return Err("at least one of --controller or --node must be enabled".into());
    }
    if args.controller && args.token.as_deref().is_none_or(str::is_empty) {
        return Err("--token (VULTR_API_KEY) is required in controller mode".into());
    }

    // Node identity comes from flags, else from instance metadata once
    let (node_id, region) = match (args.node_id.clone(), args.region.clone()) {
        (Some(node_id), Some(region)) => (node_id, region),
        (node_id, region) => {
            let meta = metadata::fetch(&args.metadata_url)
                .await
                .map_err(|e| format!("Failed to read instance metadata: {}", e))?;
            (
                node_id.unwrap_or(meta.instance_id),
                region.unwrap_or(meta.region),
            )
        }
    };

    let timeout = Duration::from_secs(args.timeout_secs);
    let config = Arc::new(
        DriverConfig::new(node_id, region)
            .with_name(args.driver_name.clone())
            .with_timeout(timeout),
    );

    info!(
        driver_name = %config.name,
        version = %DRIVER_VERSION,
        endpoint = %args.endpoint,
        node_id = %config.node_id,
        region = %config.region,
        controller_mode = %args.controller,
        node_mode = %args.node,
        "Starting Vultr CSI Driver"
    );

    let shutdown = CancellationToken::new();

    let controller = match args.token.as_deref() {
        Some(token) if args.controller => {
            let client = VultrClient::new(&args.api_url, token, DRIVER_VERSION, timeout)?;
            Some(ControllerService::new(
                config.clone(),
                Arc::new(client),
                shutdown.clone(),
            ))
        }
        _ => None,
    };
    let node = args
        .node
        .then(|| NodeService::new(config.clone(), Arc::new(LinuxMounter::new())));
    let identity = IdentityService::new(config.clone(), shutdown.clone());

    let server =
        match NonBlockingServer::start(&args.endpoint, identity, controller, node, shutdown.clone())
            .await
        {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, endpoint = %args.endpoint, "Failed to start CSI server");
                return Err(e.into());
            }
        };

    tokio::spawn(async move {
        server::shutdown_signal().await;
        shutdown.cancel();
    });

    server.wait().await?;

    info!("Vultr CSI Driver shutdown complete");
    Ok(())
}
