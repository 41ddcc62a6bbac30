//! Step execution
//!
//! A [`TestCase`] is an ordered list of [`Step`]s. Each step may establish a
//! new identity, switch workspace, run one [`Action`] and run one
//! [`Validation`]:
//!
//! ```text
//! Idle -> Running(i) -> ActionOk | ActionFailed -> Validating -> Passed | Failed
//!                                                               |
//!                                                      next step | Done
//! ```
//!
//! Action errors never escape. They are classified into the context's
//! `last_error`. If the action failed and the step's validation is not an
//! expect-denial validation, the step fails with
//! [`Error::UnexpectedActionError`] and the validation is never run.

use futures::future::BoxFuture;
use tracing::{error, info, warn};

use mlflow_rbac_common::{Error, Result};

use crate::classify::ErrorCode;
use crate::context::{IdentitySpec, ScopeRef, TestContext};

/// An async operation against the tracking service
pub type ActionFn = for<'a> fn(&'a mut TestContext) -> BoxFuture<'a, Result<()>>;

/// An async assertion over the context; `Err` carries the failure message
pub type CheckFn = for<'a> fn(&'a TestContext) -> BoxFuture<'a, std::result::Result<(), String>>;

/// A named action
#[derive(Clone, Copy)]
pub struct Action {
    /// Name used in logs and errors
    pub name: &'static str,
    /// The operation
    pub run: ActionFn,
}

/// How a validation relates to its step's action
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationKind {
    /// Asserts the action was denied; runs even when the action failed
    ExpectDenial,
    /// Asserts on a successful action's effects
    Check,
}

/// A named validation
#[derive(Clone, Copy)]
pub struct Validation {
    /// Name used in logs and errors
    pub name: &'static str,
    /// Whether this validation expects the action to fail
    pub kind: ValidationKind,
    /// The assertion
    pub check: CheckFn,
}

/// One step of a test case
#[derive(Clone, Default)]
pub struct Step {
    /// Step name for reports
    pub name: String,
    /// Identity to establish before acting
    pub identity: Option<IdentitySpec>,
    /// Workspace to switch to before acting
    pub scope: Option<ScopeRef>,
    /// Action to run
    pub action: Option<Action>,
    /// Validation to run after the action
    pub validation: Option<Validation>,
}

impl Step {
    /// Empty step
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Establish `identity` before acting
    pub fn as_identity(mut self, identity: IdentitySpec) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Switch to `scope` before acting
    pub fn in_scope(mut self, scope: ScopeRef) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Run `action`
    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Run `validation` after the action
    pub fn validate(mut self, validation: Validation) -> Self {
        self.validation = Some(validation);
        self
    }
}

/// A named list of steps
#[derive(Clone)]
pub struct TestCase {
    /// Case name
    pub name: String,
    /// Steps in order
    pub steps: Vec<Step>,
}

impl TestCase {
    /// Case with the given steps
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// What happened to a step's action
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The step had no action
    Skipped,
    /// The action returned Ok
    Succeeded,
    /// The action returned an error with this classification
    Failed(ErrorCode),
}

/// Per-step result of a passing case
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    /// Step name
    pub step: String,
    /// Identity active when the action ran
    pub identity: String,
    /// Workspace active when the action ran
    pub scope: String,
    /// Action result
    pub action: ActionOutcome,
    /// Validation that passed, if any
    pub validation: Option<String>,
}

/// Result of a passing case
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseReport {
    /// Case name
    pub case: String,
    /// One entry per step, in order
    pub steps: Vec<StepReport>,
}

/// Run `case` against `ctx`, stopping at the first failing step.
///
/// Identity setup errors propagate unchanged.
pub async fn run_case(case: &TestCase, ctx: &mut TestContext) -> Result<CaseReport> {
    let mut reports = Vec::with_capacity(case.steps.len());

    for (i, step) in case.steps.iter().enumerate() {
        info!(case = %case.name, step = i + 1, name = %step.name, "Running step");
        reports.push(run_step(step, ctx).await?);
    }

    Ok(CaseReport {
        case: case.name.clone(),
        steps: reports,
    })
}

async fn run_step(step: &Step, ctx: &mut TestContext) -> Result<StepReport> {
    if let Some(identity) = &step.identity {
        ctx.establish_identity(identity).await?;
    }
    if let Some(scope) = step.scope {
        ctx.use_scope(scope)?;
    }

    let outcome = match &step.action {
        None => ActionOutcome::Skipped,
        Some(action) => match (action.run)(ctx).await {
            Ok(()) => {
                ctx.record_success(action.name);
                info!(action = action.name, identity = %ctx.identity_name(), scope = %ctx.active_scope(), "Action succeeded");
                ActionOutcome::Succeeded
            }
            Err(e) => {
                let classified = ctx.record_failure(action.name, &e);
                let code = classified.code;
                warn!(
                    action = action.name,
                    code = %code,
                    error = %e,
                    "Action failed"
                );
                ActionOutcome::Failed(code)
            }
        },
    };

    let validation = match &step.validation {
        None => None,
        Some(validation) => {
            if let (ActionOutcome::Failed(_), ValidationKind::Check) = (&outcome, validation.kind) {
                return Err(unexpected_action_error(step, ctx));
            }
            if let Err(message) = (validation.check)(ctx).await {
                error!(step = %step.name, validation = validation.name, message = %message, "Validation failed");
                return Err(Error::ValidationFailed {
                    step: step.name.clone(),
                    validation: validation.name.to_string(),
                    message,
                });
            }
            info!(validation = validation.name, "Validation passed");
            Some(validation.name.to_string())
        }
    };

    Ok(StepReport {
        step: step.name.clone(),
        identity: ctx.identity_name().to_string(),
        scope: ctx.active_scope().to_string(),
        action: outcome,
        validation,
    })
}

fn unexpected_action_error(step: &Step, ctx: &TestContext) -> Error {
    let action = step.action.map(|a| a.name).unwrap_or_default();
    let (code, message, details) = match &ctx.last_error {
        Some(err) => (
            err.code.to_string(),
            err.message.clone(),
            err.details.clone().unwrap_or_default(),
        ),
        None => (
            ErrorCode::InternalError.to_string(),
            String::new(),
            String::new(),
        ),
    };
    error!(step = %step.name, action = %action, code = %code, "Unexpected action failure");
    Error::UnexpectedActionError {
        action: action.to_string(),
        identity: ctx.identity_name().to_string(),
        scope: ctx.active_scope().to_string(),
        code,
        message,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{AuthorizationBackend, MockAuthorizationBackend};
    use crate::environment::{HarnessEnvironment, TrackingClientFactory};
    use crate::identity::{Credential, IdentityBackend, MockIdentityBackend};
    use crate::tracking::TrackingClient;
    use crate::verifier::VerifierConfig;
    use futures::FutureExt;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct NoClients;

    impl TrackingClientFactory for NoClients {
        fn client_for(&self, _: &str, _: &Credential, _: &str) -> Arc<dyn TrackingClient> {
            Arc::new(crate::tracking::MockTrackingClient::new())
        }
    }

    fn ctx() -> TestContext {
        let authz: Arc<dyn AuthorizationBackend> = Arc::new(MockAuthorizationBackend::new());
        let ids: Arc<dyn IdentityBackend> = Arc::new(MockIdentityBackend::new());
        let env = HarnessEnvironment::new(
            vec!["workspace1".to_string()],
            authz,
            ids,
            Arc::new(NoClients),
            Credential::unvalidated("admin"),
            VerifierConfig::default(),
        );
        TestContext::new(Arc::new(env), BTreeMap::new())
    }

    fn deny(_: &mut TestContext) -> BoxFuture<'_, Result<()>> {
        async {
            Err::<(), _>(Error::tracking(
                "create_experiment",
                403,
                "PERMISSION_DENIED: not allowed",
            ))
        }
        .boxed()
    }

    fn not_found(_: &mut TestContext) -> BoxFuture<'_, Result<()>> {
        async { Err::<(), _>(Error::tracking("get_experiment", 404, "RESOURCE_DOES_NOT_EXIST: x")) }
            .boxed()
    }

    fn succeed(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
        async move {
            ctx.experiment_id = Some("7".to_string());
            Ok(())
        }
        .boxed()
    }

    fn expect_permission_denied(ctx: &TestContext) -> BoxFuture<'_, std::result::Result<(), String>> {
        async move {
            match &ctx.last_error {
                Some(e) if e.is_permission_error() => Ok(()),
                other => Err(format!("expected a permission error, got {other:?}")),
            }
        }
        .boxed()
    }

    fn must_not_run(_: &TestContext) -> BoxFuture<'_, std::result::Result<(), String>> {
        async { Err::<(), _>("validation ran after an unexpected action failure".to_string()) }
            .boxed()
    }

    fn experiment_set(ctx: &TestContext) -> BoxFuture<'_, std::result::Result<(), String>> {
        async move {
            ctx.experiment_id
                .as_ref()
                .map(|_| ())
                .ok_or_else(|| "experiment id not set".to_string())
        }
        .boxed()
    }

    const DENY: Action = Action { name: "create_experiment", run: deny };
    const NOT_FOUND: Action = Action { name: "get_experiment", run: not_found };
    const SUCCEED: Action = Action { name: "get_experiment", run: succeed };
    const EXPECT_DENIAL: Validation = Validation {
        name: "permission_denied",
        kind: ValidationKind::ExpectDenial,
        check: expect_permission_denied,
    };

    // ==========================================================================
    // Story Tests: Short-Circuit
    // ==========================================================================

    /// Story: an action failed but the step expected success. The validation is
    /// skipped and the error names the classified failure.
    #[tokio::test]
    async fn story_unexpected_failure_short_circuits_validation() {
        let case = TestCase::new(
            "get baseline experiment",
            vec![Step::new("get").action(NOT_FOUND).validate(Validation {
                name: "experiment_retrieved",
                kind: ValidationKind::Check,
                check: must_not_run,
            })],
        );

        let mut ctx = ctx();
        let err = run_case(&case, &mut ctx).await.unwrap_err();
        match err {
            Error::UnexpectedActionError {
                action,
                scope,
                code,
                details,
                ..
            } => {
                assert_eq!(action, "get_experiment");
                assert_eq!(scope, "workspace1");
                assert_eq!(code, "RESOURCE_NOT_FOUND");
                assert!(details.contains("Workspace: workspace1"));
            }
            other => panic!("expected UnexpectedActionError, got {other:?}"),
        }
    }

    /// Story: a denied action paired with the expect-denial validation passes
    #[tokio::test]
    async fn story_expected_denial_passes() {
        let case = TestCase::new(
            "read cannot create",
            vec![Step::new("create").action(DENY).validate(EXPECT_DENIAL)],
        );
        let mut ctx = ctx();
        let report = run_case(&case, &mut ctx).await.unwrap();
        assert_eq!(
            report.steps[0].action,
            ActionOutcome::Failed(ErrorCode::PermissionDenied)
        );
        assert_eq!(report.steps[0].validation.as_deref(), Some("permission_denied"));
    }

    #[tokio::test]
    async fn expect_denial_still_rejects_the_wrong_kind_of_failure() {
        let case = TestCase::new(
            "wrong failure",
            vec![Step::new("get").action(NOT_FOUND).validate(EXPECT_DENIAL)],
        );
        let mut ctx = ctx();
        let err = run_case(&case, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { ref validation, .. } if validation == "permission_denied"));
    }

    #[tokio::test]
    async fn failed_action_without_validation_continues() {
        let case = TestCase::new(
            "setup may fail",
            vec![
                Step::new("get").action(NOT_FOUND),
                Step::new("delete").action(DENY).validate(EXPECT_DENIAL),
            ],
        );
        let mut ctx = ctx();
        let report = run_case(&case, &mut ctx).await.unwrap();
        assert_eq!(report.steps.len(), 2);
        assert_eq!(
            report.steps[0].action,
            ActionOutcome::Failed(ErrorCode::ResourceNotFound)
        );
    }

    #[tokio::test]
    async fn successful_action_runs_check_validation() {
        let case = TestCase::new(
            "get",
            vec![Step::new("get").action(SUCCEED).validate(Validation {
                name: "experiment_retrieved",
                kind: ValidationKind::Check,
                check: experiment_set,
            })],
        );
        let mut ctx = ctx();
        let report = run_case(&case, &mut ctx).await.unwrap();
        assert_eq!(report.steps[0].action, ActionOutcome::Succeeded);
        assert_eq!(ctx.experiment_id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn validation_failure_carries_step_and_message() {
        let case = TestCase::new(
            "no handle",
            vec![Step::new("check only").validate(Validation {
                name: "experiment_retrieved",
                kind: ValidationKind::Check,
                check: experiment_set,
            })],
        );
        let mut ctx = ctx();
        match run_case(&case, &mut ctx).await.unwrap_err() {
            Error::ValidationFailed {
                step,
                validation,
                message,
            } => {
                assert_eq!(step, "check only");
                assert_eq!(validation, "experiment_retrieved");
                assert_eq!(message, "experiment id not set");
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_scope_fails_the_step() {
        let case = TestCase::new(
            "needs two workspaces",
            vec![Step::new("switch").in_scope(ScopeRef::Secondary)],
        );
        let mut ctx = ctx();
        let err = run_case(&case, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
