//! vcp-scale - vSphere volume plugin scale run.
//!
//! Volume counts and storage policy come from the environment
//! (`VCP_SCALE_VOLUME_COUNT`, `VCP_SCALE_VOLUME_PER_POD`, `VCP_SCALE_INSTANCES`,
//! `VSPHERE_SPBM_POLICY_NAME`, `VSPHERE_DATASTORE`); everything else is a flag.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vcp_scale::config::{
    DEFAULT_CLAIM_SIZE, DEFAULT_MAX_VOLUMES_PER_NODE, DEFAULT_MIN_NODES, DEFAULT_POD_IMAGE,
    DEFAULT_PROVIDER,
};
use vcp_scale::provider::resolve_provider;
use vcp_scale::{KubeCluster, ScaleConfig, ScaleOutcome, ScaleSettings, Scenario};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Provision, attach and detach vSphere volumes at scale.
#[derive(Parser)]
#[command(name = "vcp-scale")]
#[command(about = "Scale test for the vSphere volume plugin")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, env = "VCP_SCALE_JSON_LOGS")]
    json_logs: bool,

    /// Existing namespace to run in (a fresh one is created and removed otherwise).
    #[arg(long, env = "VCP_SCALE_NAMESPACE")]
    namespace: Option<String>,

    /// Storage requested by every claim.
    #[arg(long, env = "VCP_SCALE_CLAIM_SIZE", default_value = DEFAULT_CLAIM_SIZE)]
    claim_size: String,

    /// Image of the pods mounting the volumes.
    #[arg(long, env = "VCP_SCALE_POD_IMAGE", default_value = DEFAULT_POD_IMAGE)]
    image: String,

    /// Attach limit per node.
    #[arg(long, default_value_t = DEFAULT_MAX_VOLUMES_PER_NODE)]
    max_volumes_per_node: usize,

    /// Minimum ready schedulable nodes.
    #[arg(long, default_value_t = DEFAULT_MIN_NODES)]
    min_nodes: usize,

    /// Do not require vsphere:// provider IDs on the nodes.
    #[arg(long)]
    skip_provider_check: bool,

    /// Seconds to wait for claims to bind.
    #[arg(long, default_value = "300")]
    bind_timeout_secs: u64,

    /// Seconds to wait for a pod to start.
    #[arg(long, default_value = "300")]
    pod_start_timeout_secs: u64,

    /// Seconds to wait for a deleted pod to disappear.
    #[arg(long, default_value = "300")]
    pod_delete_timeout_secs: u64,

    /// Seconds to wait for volumes to detach.
    #[arg(long, default_value = "300")]
    detach_timeout_secs: u64,

    /// Seconds between claim and pod state polls.
    #[arg(long, default_value = "2")]
    poll_interval_secs: u64,

    /// Seconds between detach polls.
    #[arg(long, default_value = "10")]
    detach_poll_interval_secs: u64,

    /// Report format.
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
}

impl Cli {
    fn settings(&self) -> ScaleSettings {
        ScaleSettings {
            namespace: self.namespace.clone(),
            claim_size: self.claim_size.clone(),
            pod_image: self.image.clone(),
            max_volumes_per_node: self.max_volumes_per_node,
            min_nodes: self.min_nodes,
            required_provider: (!self.skip_provider_check).then(|| DEFAULT_PROVIDER.to_string()),
            claim_bound_timeout: Duration::from_secs(self.bind_timeout_secs),
            pod_start_timeout: Duration::from_secs(self.pod_start_timeout_secs),
            pod_delete_timeout: Duration::from_secs(self.pod_delete_timeout_secs),
            detach_timeout: Duration::from_secs(self.detach_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            detach_poll_interval: Duration::from_secs(self.detach_poll_interval_secs),
        }
    }
}

/// Exit code used when a second interrupt cuts teardown short.
const EXIT_INTERRUPTED: i32 = 130;

/// Resolve on the first interrupt and keep listening: a second interrupt
/// calls `force_exit` while teardown is still running.
async fn first_interrupt<S, Fut, X>(mut signal: S, force_exit: X)
where
    S: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = std::io::Result<()>> + Send,
    X: FnOnce() + Send + 'static,
{
    if signal().await.is_err() {
        std::future::pending::<()>().await;
    }
    warn!("🛑 Interrupted, cleaning up. Press Ctrl-C again to exit without cleanup");

    tokio::spawn(async move {
        if signal().await.is_ok() {
            error!("Second interrupt, exiting before teardown finished");
            force_exit();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ScaleConfig::from_env().context("Failed to read scale configuration")?;
    let settings = cli.settings();

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cluster = KubeCluster::new(client.clone()).with_poll_interval(settings.poll_interval);
    let provider = resolve_provider(client);
    info!(provider = provider.name(), "Using volume provider");

    let scenario = Scenario::new(Arc::new(cluster), provider, config, settings);
    let outcome = scenario
        .run_until(first_interrupt(
            tokio::signal::ctrl_c,
            || std::process::exit(EXIT_INTERRUPTED),
        ))
        .await
        .context("Scale run failed")?;

    match outcome {
        ScaleOutcome::Completed(report) => match cli.output {
            OutputFormat::Text => println!("{report}"),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        },
        ScaleOutcome::Skipped(reason) => {
            warn!(%reason, "Scale run skipped");
            println!("Skipped: {reason}");
        }
    }

    Ok(())
}
