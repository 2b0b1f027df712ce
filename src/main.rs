//! VWA operator - Kubernetes controller applying VPA recommendations
//! in-place under VerticalWorkloadAutoscaler policy

use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vwa_operator::controller;
use vwa_operator::crd::VerticalWorkloadAutoscaler;
use vwa_operator::DEFAULT_RECONCILE_TIMEOUT_SECS;

/// VWA operator - in-place vertical scaling under operator policy
#[derive(Parser, Debug)]
#[command(name = "vwa-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Deadline for a single reconcile pass, in seconds
    #[arg(long, default_value_t = DEFAULT_RECONCILE_TIMEOUT_SECS)]
    reconcile_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&VerticalWorkloadAutoscaler::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    controller::run(client, Duration::from_secs(cli.reconcile_timeout_secs)).await;

    tracing::info!("VWA operator shutting down");
    Ok(())
}
