//! Per-test-case state
//!
//! A [`TestContext`] is owned by exactly one running test case. Actions read
//! and update it through `&mut`, validations inspect it through `&`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use mlflow_rbac_common::{Error, Result};

use crate::artifacts::{ArtifactFile, LinearModel};
use crate::classify::{classify, classify_in_context, ClassifiedError, ErrorCode};
use crate::environment::HarnessEnvironment;
use crate::identity::Identity;
use crate::permission::Capability;
use crate::tracking::TrackingClient;

/// Reported identity when none is active
pub const NO_IDENTITY: &str = "<none>";

/// A workspace referenced by position in the configured list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeRef {
    /// First configured workspace
    Primary,
    /// Second configured workspace
    Secondary,
}

impl ScopeRef {
    fn index(self) -> usize {
        match self {
            ScopeRef::Primary => 0,
            ScopeRef::Secondary => 1,
        }
    }
}

/// An identity a step should run as
#[derive(Clone, Debug)]
pub struct IdentitySpec {
    /// Workspace the identity and its grant live in
    pub scope: ScopeRef,
    /// What the identity is granted
    pub capability: Capability,
}

impl IdentitySpec {
    /// Identity in `scope` with `capability`
    pub fn new(scope: ScopeRef, capability: Capability) -> Self {
        Self { scope, capability }
    }
}

/// Resources seeded by the administrative identity in one workspace
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BaselineResources {
    /// Experiment every "get" scenario can target
    pub experiment_id: String,
    /// Run in the baseline experiment that run and artifact scenarios
    /// fall back to
    pub run_id: String,
    /// Registered model every "get" scenario can target
    pub model_name: String,
}

/// Result of the most recent action
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRecord {
    /// Action name
    pub name: String,
    /// Whether it returned an error
    pub failed: bool,
}

/// Outcome of a best-effort cleanup
#[derive(Clone, Debug, Default)]
pub struct CleanupReport {
    /// Deletions attempted
    pub attempted: usize,
    /// One message per deletion that failed
    pub failures: Vec<String>,
}

impl CleanupReport {
    /// Whether everything was removed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Mutable state of one running test case
pub struct TestContext {
    env: Arc<HarnessEnvironment>,
    baseline: BTreeMap<String, BaselineResources>,
    active_identity: Option<Identity>,
    active_scope: String,
    client: Option<Arc<dyn TrackingClient>>,
    /// Experiment the last experiment action produced or targeted
    pub experiment_id: Option<String>,
    /// Run the last run action produced
    pub run_id: Option<String>,
    /// Registered model the last model action produced or targeted
    pub model_name: Option<String>,
    /// Local artifact prepared for upload
    pub artifact: Option<ArtifactFile>,
    /// Artifact paths the last listing returned
    pub artifact_list: Option<Vec<String>>,
    /// Bytes the last download returned
    pub downloaded: Option<Vec<u8>>,
    /// Model trained locally, or loaded back from the server
    pub trained_model: Option<LinearModel>,
    /// URI of the model the last log produced
    pub logged_model_uri: Option<String>,
    /// Artifact root the last run lookup reported
    pub artifact_location: Option<String>,
    experiments_to_clean: BTreeMap<String, String>,
    runs_to_clean: BTreeMap<String, String>,
    models_to_clean: BTreeMap<String, String>,
    identities: Vec<Identity>,
    /// Most recent classified action failure; overwritten, never cleared
    pub last_error: Option<ClassifiedError>,
    last_action: Option<ActionRecord>,
}

impl TestContext {
    /// Fresh context over `env` with the seeded baseline
    pub fn new(env: Arc<HarnessEnvironment>, baseline: BTreeMap<String, BaselineResources>) -> Self {
        let active_scope = env.scopes().first().cloned().unwrap_or_default();
        Self {
            env,
            baseline,
            active_identity: None,
            active_scope,
            client: None,
            experiment_id: None,
            run_id: None,
            model_name: None,
            artifact: None,
            artifact_list: None,
            downloaded: None,
            trained_model: None,
            logged_model_uri: None,
            artifact_location: None,
            experiments_to_clean: BTreeMap::new(),
            runs_to_clean: BTreeMap::new(),
            models_to_clean: BTreeMap::new(),
            identities: Vec::new(),
            last_error: None,
            last_action: None,
        }
    }

    // =========================================================================
    // Identity and scope
    // =========================================================================

    /// Known workspaces
    pub fn scopes(&self) -> &[String] {
        self.env.scopes()
    }

    /// Workspace name for a reference
    pub fn resolve_scope(&self, scope: ScopeRef) -> Result<String> {
        self.scopes().get(scope.index()).cloned().ok_or_else(|| {
            Error::validation_for_field(
                "workspaces",
                format!(
                    "{:?} workspace requested but only {} configured",
                    scope,
                    self.scopes().len()
                ),
            )
        })
    }

    /// Create, grant and verify a new identity, then make it active in its
    /// own workspace.
    pub async fn establish_identity(&mut self, spec: &IdentitySpec) -> Result<()> {
        let scope = self.resolve_scope(spec.scope)?;
        let identity = self.env.establish(&scope, &spec.capability).await?;
        self.identities.push(identity.clone());
        self.active_identity = Some(identity);
        self.active_scope = scope;
        self.rebind();
        Ok(())
    }

    /// Switch the active workspace, keeping the active identity
    pub fn use_scope(&mut self, scope: ScopeRef) -> Result<()> {
        self.active_scope = self.resolve_scope(scope)?;
        self.rebind();
        debug!(identity = %self.identity_name(), scope = %self.active_scope, "Switched workspace");
        Ok(())
    }

    fn rebind(&mut self) {
        self.client = self
            .active_identity
            .as_ref()
            .map(|identity| self.env.client_for(identity, &self.active_scope));
    }

    /// Tracking client for the active identity and workspace
    pub fn client(&self) -> Result<Arc<dyn TrackingClient>> {
        self.client
            .clone()
            .ok_or_else(|| Error::validation("no active identity; establish one before acting"))
    }

    /// The active identity
    pub fn active_identity(&self) -> Option<&Identity> {
        self.active_identity.as_ref()
    }

    /// Name of the active identity, or [`NO_IDENTITY`]
    pub fn identity_name(&self) -> &str {
        self.active_identity
            .as_ref()
            .map(|i| i.name.as_str())
            .unwrap_or(NO_IDENTITY)
    }

    /// The active workspace
    pub fn active_scope(&self) -> &str {
        &self.active_scope
    }

    /// Baseline resources seeded in the active workspace
    pub fn baseline(&self) -> Option<&BaselineResources> {
        self.baseline.get(&self.active_scope)
    }

    // =========================================================================
    // Action bookkeeping
    // =========================================================================

    /// Record that `action` succeeded. Does not clear `last_error`.
    pub fn record_success(&mut self, action: &str) {
        self.last_action = Some(ActionRecord {
            name: action.to_string(),
            failed: false,
        });
    }

    /// Classify `err` with the active identity and workspace and store it
    pub fn record_failure(&mut self, action: &str, err: &Error) -> &ClassifiedError {
        let classified = classify_in_context(&err.to_string(), self.identity_name(), &self.active_scope);
        self.last_action = Some(ActionRecord {
            name: action.to_string(),
            failed: true,
        });
        self.last_error.insert(classified)
    }

    /// The most recent action, if any ran
    pub fn last_action(&self) -> Option<&ActionRecord> {
        self.last_action.as_ref()
    }

    // =========================================================================
    // Cleanup registries
    // =========================================================================

    fn register(
        registry: &mut BTreeMap<String, String>,
        field: &str,
        id: &str,
        scope: &str,
    ) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::validation_for_field(field, format!("{} cannot be empty", field)));
        }
        if scope.trim().is_empty() {
            return Err(Error::validation_for_field("workspace", "workspace cannot be empty"));
        }
        registry.insert(id.to_string(), scope.to_string());
        Ok(())
    }

    /// Delete `experiment_id` in `scope` at teardown
    pub fn add_experiment_for_cleanup(&mut self, experiment_id: &str, scope: &str) -> Result<()> {
        Self::register(&mut self.experiments_to_clean, "experiment_id", experiment_id, scope)
    }

    /// Delete `run_id` in `scope` at teardown
    pub fn add_run_for_cleanup(&mut self, run_id: &str, scope: &str) -> Result<()> {
        Self::register(&mut self.runs_to_clean, "run_id", run_id, scope)
    }

    /// Delete `model_name` in `scope` at teardown
    pub fn add_model_for_cleanup(&mut self, model_name: &str, scope: &str) -> Result<()> {
        Self::register(&mut self.models_to_clean, "model_name", model_name, scope)
    }

    /// Stop tracking an experiment that an action already deleted
    pub fn forget_experiment(&mut self, experiment_id: &str) {
        self.experiments_to_clean.remove(experiment_id);
    }

    /// Stop tracking a run that an action already deleted
    pub fn forget_run(&mut self, run_id: &str) {
        self.runs_to_clean.remove(run_id);
    }

    /// Stop tracking a model that an action already deleted
    pub fn forget_model(&mut self, model_name: &str) {
        self.models_to_clean.remove(model_name);
    }

    /// Resources and identities still awaiting teardown
    pub fn pending_cleanup(&self) -> usize {
        self.experiments_to_clean.len()
            + self.runs_to_clean.len()
            + self.models_to_clean.len()
            + self.identities.len()
    }

    /// Delete everything this case created, each in its own workspace with the
    /// administrative identity, then retire identities. Never fails.
    pub async fn teardown(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for (run_id, scope) in std::mem::take(&mut self.runs_to_clean) {
            report.attempted += 1;
            let client = self.env.admin_client_for(&scope);
            tolerate_missing(&mut report, "run", &run_id, &scope, client.delete_run(&run_id).await);
        }

        for (model, scope) in std::mem::take(&mut self.models_to_clean) {
            report.attempted += 1;
            let client = self.env.admin_client_for(&scope);
            tolerate_missing(
                &mut report,
                "registered model",
                &model,
                &scope,
                client.delete_registered_model(&model).await,
            );
        }

        for (experiment_id, scope) in std::mem::take(&mut self.experiments_to_clean) {
            report.attempted += 1;
            let client = self.env.admin_client_for(&scope);
            tolerate_missing(
                &mut report,
                "experiment",
                &experiment_id,
                &scope,
                client.delete_experiment(&experiment_id).await,
            );
        }

        for identity in std::mem::take(&mut self.identities) {
            report.attempted += 1;
            report.failures.extend(self.env.retire(&identity).await);
        }

        self.active_identity = None;
        self.client = None;

        if report.is_clean() {
            info!(attempted = report.attempted, "Cleanup complete");
        } else {
            warn!(
                attempted = report.attempted,
                failed = report.failures.len(),
                "Cleanup finished with failures"
            );
        }
        report
    }
}

fn tolerate_missing(
    report: &mut CleanupReport,
    kind: &str,
    id: &str,
    scope: &str,
    result: Result<()>,
) {
    match result {
        Ok(()) => debug!(kind = %kind, id = %id, scope = %scope, "Deleted"),
        Err(e) if classify(&e.to_string()).code == ErrorCode::ResourceNotFound => {
            debug!(kind = %kind, id = %id, scope = %scope, "Already gone")
        }
        Err(e) => {
            warn!(kind = %kind, id = %id, scope = %scope, error = %e, "Failed to delete");
            report
                .failures
                .push(format!("delete {} {} in {}: {}", kind, id, scope, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{AuthorizationBackend, MockAuthorizationBackend};
    use crate::environment::TrackingClientFactory;
    use crate::identity::{Credential, IdentityBackend, MockIdentityBackend};
    use crate::tracking::MockTrackingClient;
    use crate::verifier::VerifierConfig;
    use std::sync::Mutex;

    /// Hands out admin clients that record deletions and fail on "bad-*" ids
    struct AdminFactory {
        deleted: Arc<Mutex<Vec<String>>>,
    }

    impl TrackingClientFactory for AdminFactory {
        fn client_for(&self, _: &str, _: &Credential, workspace: &str) -> Arc<dyn TrackingClient> {
            let mut client = MockTrackingClient::new();
            let ws = workspace.to_string();
            let log = self.deleted.clone();
            client.expect_delete_experiment().returning(move |id| {
                log.lock().unwrap().push(format!("experiment {id} in {ws}"));
                if id.starts_with("bad") {
                    Err(Error::tracking("delete_experiment", 500, "boom"))
                } else {
                    Ok(())
                }
            });
            client.expect_delete_registered_model().returning(|_| {
                Err(Error::tracking(
                    "delete_registered_model",
                    404,
                    "RESOURCE_DOES_NOT_EXIST: gone",
                ))
            });
            client.expect_delete_run().returning(|_| Ok(()));
            Arc::new(client)
        }
    }

    fn context(deleted: Arc<Mutex<Vec<String>>>) -> TestContext {
        let authz: Arc<dyn AuthorizationBackend> = Arc::new(MockAuthorizationBackend::new());
        let ids: Arc<dyn IdentityBackend> = Arc::new(MockIdentityBackend::new());
        let env = HarnessEnvironment::new(
            vec!["workspace1".to_string(), "workspace2".to_string()],
            authz,
            ids,
            Arc::new(AdminFactory { deleted }),
            Credential::unvalidated("admin"),
            VerifierConfig::default(),
        );
        TestContext::new(Arc::new(env), BTreeMap::new())
    }

    #[test]
    fn starts_in_primary_workspace_without_identity() {
        let ctx = context(Arc::default());
        assert_eq!(ctx.active_scope(), "workspace1");
        assert_eq!(ctx.identity_name(), NO_IDENTITY);
        assert!(ctx.client().is_err());
    }

    #[test]
    fn resolves_scope_references() {
        let mut ctx = context(Arc::default());
        assert_eq!(ctx.resolve_scope(ScopeRef::Secondary).unwrap(), "workspace2");
        ctx.use_scope(ScopeRef::Secondary).unwrap();
        assert_eq!(ctx.active_scope(), "workspace2");
    }

    #[rstest::rstest]
    #[case::empty_id("", "workspace1")]
    #[case::blank_id("  ", "workspace1")]
    #[case::empty_scope("42", "")]
    fn cleanup_registration_rejects_blank_values(#[case] id: &str, #[case] scope: &str) {
        let mut ctx = context(Arc::default());
        assert!(ctx.add_experiment_for_cleanup(id, scope).is_err());
        assert!(ctx.add_model_for_cleanup(id, scope).is_err());
        assert!(ctx.add_run_for_cleanup(id, scope).is_err());
        assert_eq!(ctx.pending_cleanup(), 0);
    }

    #[test]
    fn failures_are_classified_with_context() {
        let mut ctx = context(Arc::default());
        let err = Error::tracking("create_experiment", 403, "PERMISSION_DENIED: no");
        let classified = ctx.record_failure("create_experiment", &err).clone();
        assert_eq!(classified.code, ErrorCode::PermissionDenied);
        assert_eq!(
            classified.details.as_deref(),
            Some("Context: User: <none>, Workspace: workspace1")
        );
        assert!(ctx.last_action().unwrap().failed);

        ctx.record_success("get_experiment");
        assert!(!ctx.last_action().unwrap().failed);
        assert!(ctx.last_error.is_some(), "success must not clear last_error");
    }

    /// Story: teardown deletes each resource in the workspace it was created
    /// in and reports, rather than raises, what it could not delete
    #[tokio::test]
    async fn story_teardown_is_workspace_aware_and_best_effort() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context(deleted.clone());
        ctx.add_experiment_for_cleanup("1", "workspace1").unwrap();
        ctx.add_experiment_for_cleanup("2", "workspace2").unwrap();
        ctx.add_experiment_for_cleanup("bad-3", "workspace1").unwrap();
        ctx.add_model_for_cleanup("model-a", "workspace2").unwrap();
        ctx.add_run_for_cleanup("run-1", "workspace1").unwrap();

        let report = ctx.teardown().await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.failures.len(), 1, "{:?}", report.failures);
        assert!(report.failures[0].contains("bad-3"));
        let log = deleted.lock().unwrap();
        assert!(log.contains(&"experiment 1 in workspace1".to_string()));
        assert!(log.contains(&"experiment 2 in workspace2".to_string()));
        assert_eq!(ctx.pending_cleanup(), 0);
    }

    #[tokio::test]
    async fn forgotten_resources_are_not_deleted_again() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context(deleted.clone());
        ctx.add_experiment_for_cleanup("1", "workspace1").unwrap();
        ctx.forget_experiment("1");
        let report = ctx.teardown().await;
        assert_eq!(report.attempted, 0);
        assert!(deleted.lock().unwrap().is_empty());
    }
}
