//! The environment a test case runs against
//!
//! Bundles the identity backend, the provisioner, the verifier and the
//! tracking client factory. Establishing an identity walks the whole
//! protocol: create the ServiceAccount and credential, grant the capability,
//! and block until the authorizer enforces the grant.

use std::sync::Arc;

use tracing::{debug, info, warn};

use mlflow_rbac_common::kube_utils::{create_client_with_retry, ensure_namespace};
use mlflow_rbac_common::{Error, Result};

use crate::authz::{AuthorizationBackend, KubeAuthorizationBackend};
use crate::config::HarnessConfig;
use crate::identity::{
    generate_identity_name, Credential, Identity, IdentityBackend, KubeIdentityBackend,
};
use crate::permission::{Capability, KubeVerb, ResourceKind};
use crate::provisioner::PolicyProvisioner;
use crate::tracking::{TrackingClient, TrackingEndpoint};
use crate::verifier::{AuthorizationVerifier, VerificationOutcome, VerificationPolicy, VerifierConfig};

/// Name reported for the administrative identity
pub const ADMIN_IDENTITY: &str = "admin";

/// Builds tracking clients bound to one credential and workspace
pub trait TrackingClientFactory: Send + Sync {
    /// A client for `identity` using `credential`, scoped to `workspace`
    fn client_for(
        &self,
        identity: &str,
        credential: &Credential,
        workspace: &str,
    ) -> Arc<dyn TrackingClient>;
}

impl TrackingClientFactory for TrackingEndpoint {
    fn client_for(
        &self,
        identity: &str,
        credential: &Credential,
        workspace: &str,
    ) -> Arc<dyn TrackingClient> {
        Arc::new(self.bind(identity, credential.clone(), workspace))
    }
}

/// Backends and settings shared by every test case of a run
pub struct HarnessEnvironment {
    scopes: Vec<String>,
    identities: Arc<dyn IdentityBackend>,
    provisioner: PolicyProvisioner,
    verifier: AuthorizationVerifier,
    tracking: Arc<dyn TrackingClientFactory>,
    admin_credential: Credential,
    identity_prefix: String,
}

impl HarnessEnvironment {
    /// Assemble an environment from its backends
    pub fn new(
        scopes: Vec<String>,
        authz: Arc<dyn AuthorizationBackend>,
        identities: Arc<dyn IdentityBackend>,
        tracking: Arc<dyn TrackingClientFactory>,
        admin_credential: Credential,
        verifier: VerifierConfig,
    ) -> Self {
        Self {
            scopes,
            identities,
            provisioner: PolicyProvisioner::new(authz.clone()),
            verifier: AuthorizationVerifier::new(authz, verifier),
            tracking,
            admin_credential,
            identity_prefix: crate::config::DEFAULT_IDENTITY_PREFIX.to_string(),
        }
    }

    /// Override the prefix of generated identity names
    pub fn with_identity_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.identity_prefix = prefix.into();
        self
    }

    /// Connect to the cluster and tracking service described by `config`.
    ///
    /// Also ensures every configured workspace namespace exists.
    pub async fn connect(config: &HarnessConfig) -> Result<Self> {
        config.validate()?;

        let client = create_client_with_retry(config.kubeconfig.clone()).await?;
        for ws in &config.workspaces {
            ensure_namespace(&client, ws).await?;
        }

        let endpoint = TrackingEndpoint::new(&config.tracking)?;
        let admin = config
            .admin_token
            .clone()
            .ok_or_else(|| Error::validation_for_field("admin_token", "missing"))?;

        info!(
            workspaces = ?config.workspaces,
            tracking_uri = %config.tracking.base_url,
            policy = %config.verifier.policy,
            "Harness environment connected"
        );

        Ok(Self::new(
            config.workspaces.clone(),
            Arc::new(KubeAuthorizationBackend::new(client.clone())),
            Arc::new(KubeIdentityBackend::new(client)),
            Arc::new(endpoint),
            Credential::unvalidated(admin),
            config.verifier.clone(),
        )
        .with_identity_prefix(config.identity_prefix.clone()))
    }

    /// Configured workspaces, primary first
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// The verifier, for one-off checks
    pub fn verifier(&self) -> &AuthorizationVerifier {
        &self.verifier
    }

    /// Create an identity in `scope`, grant it `capability` and wait until the
    /// grant is enforced.
    ///
    /// If granting or verification fails the identity is retired before the
    /// error is returned.
    pub async fn establish(&self, scope: &str, capability: &Capability) -> Result<Identity> {
        let name = generate_identity_name(&self.identity_prefix);
        let identity = self.identities.create_identity(&name, scope).await?;

        if let Err(e) = self.authorize(&identity, capability).await {
            for failure in self.retire(&identity).await {
                warn!(identity = %identity.name, failure = %failure, "Cleanup after failed setup");
            }
            return Err(e);
        }

        info!(
            identity = %identity.name,
            scope = %scope,
            capability = %capability,
            "Identity established"
        );
        Ok(identity)
    }

    async fn authorize(&self, identity: &Identity, capability: &Capability) -> Result<()> {
        self.provisioner
            .grant(&identity.name, &identity.scope, capability)
            .await?;

        let Some(verb) = capability.verification_verb() else {
            debug!(identity = %identity.name, "Nothing to verify for empty capability");
            return Ok(());
        };
        // Each kind is checked separately; a partially propagated Role must
        // not pass as enforced.
        for resource in &capability.resources {
            self.verifier
                .verify(&identity.name, &identity.scope, *resource, verb)
                .await?;
        }
        Ok(())
    }

    /// One-shot enforced verification for an existing identity
    pub async fn verify_existing(
        &self,
        identity: &str,
        scope: &str,
        resource: ResourceKind,
        verb: KubeVerb,
    ) -> Result<VerificationOutcome> {
        self.verifier
            .verify_with_policy(identity, scope, resource, verb, VerificationPolicy::Enforce)
            .await
    }

    /// Revoke the grant and delete the identity. Never fails; returns a
    /// message for each step that did.
    pub async fn retire(&self, identity: &Identity) -> Vec<String> {
        let mut failures = self.provisioner.revoke(&identity.name, &identity.scope).await;
        if let Err(e) = self
            .identities
            .delete_identity(&identity.name, &identity.scope)
            .await
        {
            warn!(identity = %identity.name, scope = %identity.scope, error = %e, "Failed to delete identity");
            failures.push(format!(
                "delete serviceaccount {}/{}: {}",
                identity.scope, identity.name, e
            ));
        }
        failures
    }

    /// Tracking client acting as `identity` in `scope`
    pub fn client_for(&self, identity: &Identity, scope: &str) -> Arc<dyn TrackingClient> {
        self.tracking
            .client_for(&identity.name, &identity.credential, scope)
    }

    /// Tracking client acting as the administrative identity in `scope`
    pub fn admin_client_for(&self, scope: &str) -> Arc<dyn TrackingClient> {
        self.tracking
            .client_for(ADMIN_IDENTITY, &self.admin_credential, scope)
    }
}
