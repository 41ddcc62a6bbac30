//! mlflow-rbac
//!
//! Provisions scoped identities, proves their grants are enforced, and checks
//! the tracking service allows and denies exactly what RBAC says.

use anyhow::Context;
use clap::Parser;

use mlflow_rbac_cli::Cli;
use mlflow_rbac_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format).context("failed to initialize logging")?;
    cli.run().await
}
