//! Authorization verification
//!
//! Writing a Role and RoleBinding does not make them effective: the API
//! server's authorizer observes them after a propagation delay. Before a
//! scenario relies on a grant, [`AuthorizationVerifier::verify`] polls access
//! reviews until the authorizer answers "allowed", turning that race into a
//! bounded wait.
//!
//! Polling walks an ordered list of API-group qualifiers because clusters
//! disagree on which group the MLflow resources are registered under. Each
//! qualifier gets up to `max_retries` queries with exponential backoff; the
//! delay restarts at `initial_delay` for every qualifier, so both the number
//! of queries and the total sleep are bounded.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use mlflow_rbac_common::{Error, Result, MLFLOW_API_GROUP};

use crate::authz::{AuthorizationBackend, Decision, DecisionQuery};
use crate::permission::{KubeVerb, ResourceKind};

/// Qualifiers tried in order when none are configured
pub const DEFAULT_QUALIFIERS: [&str; 4] = [MLFLOW_API_GROUP, "mlflow.org", "kubeflow.org", ""];

/// What to do when no qualifier produced an allow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerificationPolicy {
    /// Fail with [`Error::VerificationExhausted`]
    #[default]
    Enforce,
    /// Log a warning and carry on
    Advisory,
}

impl FromStr for VerificationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enforce" => Ok(Self::Enforce),
            "advisory" => Ok(Self::Advisory),
            other => Err(format!(
                "unknown verification policy '{}', expected enforce or advisory",
                other
            )),
        }
    }
}

impl fmt::Display for VerificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enforce => f.write_str("enforce"),
            Self::Advisory => f.write_str("advisory"),
        }
    }
}

/// Polling settings
#[derive(Clone, Debug)]
pub struct VerifierConfig {
    /// Queries per qualifier
    pub max_retries: u32,
    /// First delay after a negative answer, reset for each qualifier
    pub initial_delay: Duration,
    /// Delay multiplier after each negative answer
    pub backoff_multiplier: f64,
    /// API groups to try, in order
    pub qualifiers: Vec<String>,
    /// Default exhaustion policy
    pub policy: VerificationPolicy,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 1.2,
            qualifiers: DEFAULT_QUALIFIERS.iter().map(|q| q.to_string()).collect(),
            policy: VerificationPolicy::Enforce,
        }
    }
}

impl VerifierConfig {
    /// Upper bound on the total time spent sleeping in one `verify` call
    pub fn max_total_sleep(&self) -> Duration {
        let per_qualifier: f64 = (0..self.max_retries.saturating_sub(1))
            .map(|i| self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(i as i32))
            .sum();
        Duration::from_secs_f64(per_qualifier * self.qualifiers.len() as f64)
    }
}

/// Result of a verification that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The authorizer allowed the request under `qualifier`
    Verified {
        /// Qualifier that produced the allow
        qualifier: String,
        /// Queries issued in total, across qualifiers
        attempts: u32,
    },
    /// Advisory policy: nothing allowed the request
    Unverified {
        /// Every qualifier that was tried
        qualifiers: Vec<String>,
    },
}

impl VerificationOutcome {
    /// Whether the grant was proven effective
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

/// Polls access reviews until a grant is effective
pub struct AuthorizationVerifier {
    backend: Arc<dyn AuthorizationBackend>,
    config: VerifierConfig,
}

impl AuthorizationVerifier {
    /// Create a verifier
    pub fn new(backend: Arc<dyn AuthorizationBackend>, config: VerifierConfig) -> Self {
        Self { backend, config }
    }

    /// The polling settings
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify with the configured policy
    pub async fn verify(
        &self,
        identity: &str,
        scope: &str,
        resource: ResourceKind,
        verb: KubeVerb,
    ) -> Result<VerificationOutcome> {
        self.verify_with_policy(identity, scope, resource, verb, self.config.policy)
            .await
    }

    /// Verify with an explicit exhaustion policy
    pub async fn verify_with_policy(
        &self,
        identity: &str,
        scope: &str,
        resource: ResourceKind,
        verb: KubeVerb,
        policy: VerificationPolicy,
    ) -> Result<VerificationOutcome> {
        let max_retries = self.config.max_retries.max(1);
        let mut attempts = 0u32;
        let mut first_responding: Option<&str> = None;

        for qualifier in &self.config.qualifiers {
            let query = DecisionQuery {
                identity: identity.to_string(),
                scope: scope.to_string(),
                resource,
                verb,
                group: qualifier.clone(),
            };
            let mut delay = self.config.initial_delay;

            for attempt in 1..=max_retries {
                attempts += 1;
                match self.backend.query_decision(&query).await {
                    Ok(Decision::Allowed) => {
                        info!(
                            identity = %identity,
                            scope = %scope,
                            resource = %resource,
                            verb = %verb,
                            qualifier = %qualifier,
                            attempts = attempts,
                            "Authorization verified"
                        );
                        return Ok(VerificationOutcome::Verified {
                            qualifier: qualifier.clone(),
                            attempts,
                        });
                    }
                    Ok(Decision::Denied { reason }) => {
                        first_responding.get_or_insert(qualifier.as_str());
                        debug!(
                            identity = %identity,
                            qualifier = %qualifier,
                            attempt = attempt,
                            reason = reason.as_deref().unwrap_or(""),
                            "Not yet allowed"
                        );
                    }
                    Err(e) => {
                        debug!(
                            identity = %identity,
                            qualifier = %qualifier,
                            attempt = attempt,
                            error = %e,
                            "Access review failed"
                        );
                    }
                }

                if attempt < max_retries {
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.config.backoff_multiplier);
                }
            }
        }

        let qualifiers = self.config.qualifiers.clone();
        match policy {
            VerificationPolicy::Enforce => Err(Error::VerificationExhausted {
                identity: identity.to_string(),
                scope: scope.to_string(),
                resource: resource.to_string(),
                verb: verb.to_string(),
                qualifiers,
            }),
            VerificationPolicy::Advisory => {
                warn!(
                    identity = %identity,
                    scope = %scope,
                    resource = %resource,
                    verb = %verb,
                    qualifiers = ?qualifiers,
                    first_responding = first_responding.unwrap_or("none"),
                    attempts = attempts,
                    "Could not verify authorization, continuing"
                );
                Ok(VerificationOutcome::Unverified { qualifiers })
            }
        }
    }
}
