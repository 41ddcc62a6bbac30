//! Verify command - one-shot enforcement check for an existing service account

use std::sync::Arc;

use clap::Args;

use mlflow_rbac_common::kube_utils::create_client_with_retry;
use mlflow_rbac_harness::authz::KubeAuthorizationBackend;
use mlflow_rbac_harness::verifier::AuthorizationVerifier;
use mlflow_rbac_harness::{KubeVerb, ResourceKind, VerificationOutcome, VerificationPolicy, VerifierConfig};

use super::{apply_tuning, ClusterArgs, VerifyTuning};

/// Verify command arguments
#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[command(flatten)]
    pub tuning: VerifyTuning,

    /// Service account name
    #[arg(long, short = 's')]
    pub service_account: String,

    /// Namespace of the service account and the resource
    #[arg(long, short = 'n')]
    pub namespace: String,

    /// Resource kind to check
    #[arg(long, short = 'r')]
    pub resource: ResourceKind,

    /// Verb to check
    #[arg(long, short = 'v', default_value = "get")]
    pub verb: KubeVerb,
}

/// Poll access reviews until the grant is visible; always enforces
pub async fn run(args: VerifyArgs) -> anyhow::Result<()> {
    let client = create_client_with_retry(args.cluster.kubeconfig.clone()).await?;
    let mut config = VerifierConfig::default();
    apply_tuning(&mut config, &args.tuning);

    let verifier = AuthorizationVerifier::new(Arc::new(KubeAuthorizationBackend::new(client)), config);
    let outcome = verifier
        .verify_with_policy(
            &args.service_account,
            &args.namespace,
            args.resource,
            args.verb,
            VerificationPolicy::Enforce,
        )
        .await?;

    if let VerificationOutcome::Verified { qualifier, attempts } = outcome {
        let group = if qualifier.is_empty() { "<core>" } else { qualifier.as_str() };
        println!(
            "{} may {} {} in {} (group {}, {} attempt(s))",
            args.service_account, args.verb, args.resource, args.namespace, group, attempts
        );
    }
    Ok(())
}
