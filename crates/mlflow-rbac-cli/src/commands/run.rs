//! Run command - execute the permission scenarios

use std::sync::Arc;

use anyhow::{anyhow, bail};
use clap::Args;
use tracing::info;

use mlflow_rbac_harness::harness::SuiteRunner;
use mlflow_rbac_harness::scenarios::{all_cases, filter_cases};
use mlflow_rbac_harness::HarnessEnvironment;

use super::{harness_config, ClusterArgs, TrackingArgs, VerifyTuning};

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub tracking: TrackingArgs,

    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[command(flatten)]
    pub tuning: VerifyTuning,

    /// Only run cases whose name contains this text (case-insensitive)
    #[arg(long, short = 'f')]
    pub filter: Option<String>,

    /// List the selected cases and exit
    #[arg(long)]
    pub list: bool,
}

/// Run the selected cases and fail if any of them failed
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let cases = filter_cases(all_cases(), args.filter.as_deref());
    if cases.is_empty() {
        bail!("no cases match filter {:?}", args.filter.unwrap_or_default());
    }

    if args.list {
        for case in &cases {
            println!("{}", case.name);
        }
        return Ok(());
    }

    let config = harness_config(&args.tracking, &args.cluster, &args.tuning);
    let env = Arc::new(HarnessEnvironment::connect(&config).await?);
    info!(cases = cases.len(), workspaces = ?config.workspaces, "Running scenarios");

    let mut runner = SuiteRunner::seeded("mlflow rbac", env).await?;
    runner.run_all(&cases).await;
    runner.finish().await.into_result().map_err(|e| anyhow!(e))
}
