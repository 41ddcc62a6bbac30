//! Policy provisioning: one Role and one RoleBinding per identity per scope

use std::sync::Arc;

use tracing::{debug, info, warn};

use mlflow_rbac_common::{Error, Result};

use crate::authz::{AuthorizationBackend, CreateOutcome};
use crate::permission::{bootstrap_rules, Capability};

/// Name of the Role granted to `identity`
pub fn role_name(identity: &str) -> String {
    format!("{}-role", identity)
}

/// Name of the RoleBinding granted to `identity`
pub fn binding_name(identity: &str) -> String {
    format!("{}-binding", identity)
}

/// Creates and removes policy grants
pub struct PolicyProvisioner {
    backend: Arc<dyn AuthorizationBackend>,
}

impl PolicyProvisioner {
    /// Create a provisioner over an authorization backend
    pub fn new(backend: Arc<dyn AuthorizationBackend>) -> Self {
        Self { backend }
    }

    /// Grant `capability` plus the bootstrap rules to `identity` in `scope`.
    ///
    /// Creates the Role before the RoleBinding. Objects that already exist
    /// count as success; any other failure aborts. Success means the objects
    /// exist, not that the authorizer enforces them yet.
    pub async fn grant(&self, identity: &str, scope: &str, capability: &Capability) -> Result<()> {
        let role = role_name(identity);
        let binding = binding_name(identity);

        let mut rules = capability.rules();
        rules.extend(bootstrap_rules());

        let outcome = self
            .backend
            .create_role(scope, &role, &rules)
            .await
            .map_err(|e| Error::provisioning(identity, scope, format!("role {}: {}", role, e)))?;
        if outcome == CreateOutcome::AlreadyExists {
            debug!(identity = %identity, scope = %scope, role = %role, "Role already exists");
        }

        let outcome = self
            .backend
            .create_binding(scope, &binding, &role, identity)
            .await
            .map_err(|e| {
                Error::provisioning(identity, scope, format!("binding {}: {}", binding, e))
            })?;
        if outcome == CreateOutcome::AlreadyExists {
            debug!(identity = %identity, scope = %scope, binding = %binding, "RoleBinding already exists");
        }

        info!(
            identity = %identity,
            scope = %scope,
            capability = %capability,
            rules = rules.len(),
            "Granted policy"
        );
        Ok(())
    }

    /// Remove the grant for `identity` in `scope`, binding first.
    ///
    /// Never fails; returns a message for each deletion that did.
    pub async fn revoke(&self, identity: &str, scope: &str) -> Vec<String> {
        let mut failures = Vec::new();

        let binding = binding_name(identity);
        if let Err(e) = self.backend.delete_binding(scope, &binding).await {
            warn!(identity = %identity, scope = %scope, binding = %binding, error = %e, "Failed to delete RoleBinding");
            failures.push(format!("delete rolebinding {}/{}: {}", scope, binding, e));
        }

        let role = role_name(identity);
        if let Err(e) = self.backend.delete_role(scope, &role).await {
            warn!(identity = %identity, scope = %scope, role = %role, error = %e, "Failed to delete Role");
            failures.push(format!("delete role {}/{}: {}", scope, role, e));
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::MockAuthorizationBackend;
    use crate::permission::{KubeVerb, ResourceKind};
    use mockall::Sequence;

    fn read_experiments() -> Capability {
        Capability::new(
            vec![KubeVerb::Get, KubeVerb::List],
            vec![ResourceKind::Experiments],
        )
    }

    // ==========================================================================
    // Story Tests: Granting
    // ==========================================================================

    /// Story: a fresh grant creates the role, then binds it to the identity
    #[tokio::test]
    async fn story_grant_creates_role_then_binding() {
        let mut mock = MockAuthorizationBackend::new();
        let mut seq = Sequence::new();

        mock.expect_create_role()
            .withf(|scope, role, rules| {
                // main rule plus the two bootstrap rules
                scope == "workspace1" && role == "alice-role" && rules.len() == 3
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(CreateOutcome::Created));
        mock.expect_create_binding()
            .withf(|scope, binding, role, identity| {
                scope == "workspace1"
                    && binding == "alice-binding"
                    && role == "alice-role"
                    && identity == "alice"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(CreateOutcome::Created));

        let provisioner = PolicyProvisioner::new(Arc::new(mock));
        provisioner
            .grant("alice", "workspace1", &read_experiments())
            .await
            .unwrap();
    }

    /// Story: re-running a grant whose objects already exist succeeds
    #[tokio::test]
    async fn story_grant_is_idempotent() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_create_role()
            .times(2)
            .returning(|_, _, _| Ok(CreateOutcome::AlreadyExists));
        mock.expect_create_binding()
            .times(2)
            .returning(|_, _, _, _| Ok(CreateOutcome::AlreadyExists));

        let provisioner = PolicyProvisioner::new(Arc::new(mock));
        for _ in 0..2 {
            provisioner
                .grant("alice", "workspace1", &read_experiments())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn role_failure_aborts_before_binding() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_create_role()
            .returning(|_, _, _| Err(Error::internal("admission webhook rejected")));
        mock.expect_create_binding().never();

        let provisioner = PolicyProvisioner::new(Arc::new(mock));
        let err = provisioner
            .grant("alice", "workspace1", &read_experiments())
            .await
            .unwrap_err();
        match err {
            Error::Provisioning {
                identity,
                scope,
                message,
            } => {
                assert_eq!(identity, "alice");
                assert_eq!(scope, "workspace1");
                assert!(message.contains("alice-role"));
            }
            other => panic!("expected Provisioning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn binding_failure_is_propagated() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_create_role()
            .returning(|_, _, _| Ok(CreateOutcome::Created));
        mock.expect_create_binding()
            .returning(|_, _, _, _| Err(Error::internal("quota")));

        let provisioner = PolicyProvisioner::new(Arc::new(mock));
        let err = provisioner
            .grant("alice", "workspace1", &read_experiments())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("alice-binding"));
    }

    // ==========================================================================
    // Revoking
    // ==========================================================================

    #[tokio::test]
    async fn revoke_deletes_binding_then_role() {
        let mut mock = MockAuthorizationBackend::new();
        let mut seq = Sequence::new();
        mock.expect_delete_binding()
            .withf(|scope, binding| scope == "workspace1" && binding == "alice-binding")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_delete_role()
            .withf(|scope, role| scope == "workspace1" && role == "alice-role")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let provisioner = PolicyProvisioner::new(Arc::new(mock));
        assert!(provisioner.revoke("alice", "workspace1").await.is_empty());
    }

    #[tokio::test]
    async fn revoke_collects_failures_and_keeps_going() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_delete_binding()
            .returning(|_, _| Err(Error::internal("connection refused")));
        mock.expect_delete_role().times(1).returning(|_, _| Ok(()));

        let provisioner = PolicyProvisioner::new(Arc::new(mock));
        let failures = provisioner.revoke("alice", "workspace1").await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("alice-binding"));
    }

    #[test]
    fn grant_object_names() {
        assert_eq!(role_name("test-user-ab12"), "test-user-ab12-role");
        assert_eq!(binding_name("test-user-ab12"), "test-user-ab12-binding");
    }
}
