//! MLflow RBAC harness CLI library

pub mod commands;

use clap::{Parser, Subcommand};
use mlflow_rbac_common::telemetry::LogFormat;

/// mlflow-rbac - verify Kubernetes RBAC enforcement in an MLflow tracking service
#[derive(Parser, Debug)]
#[command(name = "mlflow-rbac")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the permission scenarios against a live cluster and tracking service
    Run(commands::run::RunArgs),
    /// Print the Role rules a capability produces, as JSON
    Rules(commands::rules::RulesArgs),
    /// Check once that a service account's grant is enforced
    Verify(commands::verify::VerifyArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Run(args) => commands::run::run(args).await,
            Commands::Rules(args) => commands::rules::run(args),
            Commands::Verify(args) => commands::verify::run(args).await,
        }
    }
}
