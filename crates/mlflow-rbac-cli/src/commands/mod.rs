//! CLI commands

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use mlflow_rbac_harness::config::{parse_workspaces, HarnessConfig, DEFAULT_WORKSPACES};
use mlflow_rbac_harness::VerificationPolicy;

pub mod rules;
pub mod run;
pub mod verify;

/// Cluster access shared by commands that talk to the API server
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Path to kubeconfig; in-cluster or default config when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

/// Authorization verification tuning
#[derive(Args, Debug, Clone)]
pub struct VerifyTuning {
    /// What to do when a grant cannot be verified (enforce or advisory)
    #[arg(long = "verification", env = "VERIFICATION_POLICY", default_value = "enforce")]
    pub policy: VerificationPolicy,

    /// Access reviews per API group qualifier
    #[arg(long, default_value_t = 10)]
    pub verify_retries: u32,

    /// First delay between access reviews, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub verify_delay_ms: u64,
}

/// Everything needed to reach the tracking service
#[derive(Args, Debug, Clone)]
pub struct TrackingArgs {
    /// Base URI of the MLflow tracking service
    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    pub tracking_uri: String,

    /// Comma-separated workspaces; the first is the primary
    #[arg(long, env = "WORKSPACES", default_value = DEFAULT_WORKSPACES)]
    pub workspaces: String,

    /// Bearer token of the administrative identity
    #[arg(long, env = "KUBE_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, env = "DISABLE_TLS")]
    pub insecure_tls: bool,

    /// Additional PEM bundle to trust
    #[arg(long, env = "CA_BUNDLE")]
    pub ca_bundle: Option<PathBuf>,
}

/// Assemble a harness config from parsed arguments
pub fn harness_config(
    tracking: &TrackingArgs,
    cluster: &ClusterArgs,
    tuning: &VerifyTuning,
) -> HarnessConfig {
    let mut config = HarnessConfig::new(tracking.tracking_uri.clone());
    config.workspaces = parse_workspaces(&tracking.workspaces);
    config.admin_token = tracking.admin_token.clone();
    config.kubeconfig = cluster.kubeconfig.clone();
    config.tracking.insecure_tls = tracking.insecure_tls;
    config.tracking.ca_bundle = tracking.ca_bundle.clone();
    apply_tuning(&mut config.verifier, tuning);
    config
}

/// Overlay tuning flags on a verifier config
pub fn apply_tuning(verifier: &mut mlflow_rbac_harness::VerifierConfig, tuning: &VerifyTuning) {
    verifier.policy = tuning.policy;
    verifier.max_retries = tuning.verify_retries;
    verifier.initial_delay = Duration::from_millis(tuning.verify_delay_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracking() -> TrackingArgs {
        TrackingArgs {
            tracking_uri: "https://mlflow.example.com".to_string(),
            workspaces: " team-a, team-b ,team-a".to_string(),
            admin_token: Some("admin".to_string()),
            insecure_tls: true,
            ca_bundle: None,
        }
    }

    #[test]
    fn config_carries_every_flag() {
        let tuning = VerifyTuning {
            policy: VerificationPolicy::Advisory,
            verify_retries: 3,
            verify_delay_ms: 250,
        };
        let config = harness_config(&tracking(), &ClusterArgs { kubeconfig: None }, &tuning);

        assert_eq!(config.workspaces, vec!["team-a", "team-b"]);
        assert!(config.tracking.insecure_tls);
        assert_eq!(config.verifier.policy, VerificationPolicy::Advisory);
        assert_eq!(config.verifier.max_retries, 3);
        assert_eq!(config.verifier.initial_delay, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_admin_token_fails_validation() {
        let mut args = tracking();
        args.admin_token = None;
        let tuning = VerifyTuning {
            policy: VerificationPolicy::Enforce,
            verify_retries: 10,
            verify_delay_ms: 1000,
        };
        let config = harness_config(&args, &ClusterArgs { kubeconfig: None }, &tuning);
        assert!(config.validate().is_err());
    }
}
