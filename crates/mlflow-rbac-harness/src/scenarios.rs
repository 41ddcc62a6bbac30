//! Permission matrices for experiments, runs, artifacts and registered models
//!
//! Every case provisions one identity in the primary workspace, optionally
//! moves to another workspace, and checks that each action is allowed or
//! denied exactly as the grant says.

use crate::actions::*;
use crate::context::{IdentitySpec, ScopeRef};
use crate::executor::{Action, Step, TestCase, Validation};
use crate::permission::{Capability, KubeVerb, ResourceKind, UserRole};
use crate::validations::*;

use KubeVerb::{Create, Delete, Get, List, Update};
use ScopeRef::{Primary, Secondary};

fn step(action: Action, validation: Validation) -> Step {
    Step::new(action.name).action(action).validate(validation)
}

/// A step whose failure is tolerated: it only sets up handles
fn setup(action: Action) -> Step {
    Step::new(action.name).action(action)
}

fn scenario(name: &str, capability: Capability, scope: ScopeRef, mut steps: Vec<Step>) -> TestCase {
    if let Some(first) = steps.first_mut() {
        first.identity = Some(IdentitySpec::new(Primary, capability));
        first.scope = Some(scope);
    }
    TestCase::new(name, steps)
}

fn on_experiments(role: UserRole) -> Capability {
    Capability::for_role(role, vec![ResourceKind::Experiments])
}

fn on_models(verbs: &[KubeVerb]) -> Capability {
    Capability::new(verbs.to_vec(), vec![ResourceKind::RegisteredModels])
}

/// Experiment cases
pub fn experiment_cases() -> Vec<TestCase> {
    use UserRole::{Edit, Manage, Read};
    vec![
        scenario(
            "read can get experiment",
            on_experiments(Read),
            Primary,
            vec![step(GET_EXPERIMENT, EXPERIMENT_RETRIEVED)],
        ),
        scenario(
            "read cannot create experiment",
            on_experiments(Read),
            Primary,
            vec![step(CREATE_EXPERIMENT, ACTION_DENIED)],
        ),
        scenario(
            "read in workspace 1 cannot get experiment in workspace 2",
            on_experiments(Read),
            Secondary,
            vec![step(GET_EXPERIMENT, ACTION_DENIED)],
        ),
        scenario(
            "read cannot delete experiment",
            on_experiments(Read),
            Primary,
            vec![setup(GET_EXPERIMENT), step(DELETE_EXPERIMENT, ACTION_DENIED)],
        ),
        scenario(
            "edit can create experiment",
            on_experiments(Edit),
            Primary,
            vec![step(CREATE_EXPERIMENT, EXPERIMENT_CREATED)],
        ),
        scenario(
            "edit can delete experiment",
            on_experiments(Edit),
            Primary,
            vec![
                step(CREATE_EXPERIMENT, EXPERIMENT_CREATED),
                step(DELETE_EXPERIMENT, EXPERIMENT_DELETED),
            ],
        ),
        scenario(
            "edit in workspace 1 cannot create experiment in workspace 2",
            on_experiments(Edit),
            Secondary,
            vec![step(CREATE_EXPERIMENT, ACTION_DENIED)],
        ),
        scenario(
            "manage can create experiment",
            on_experiments(Manage),
            Primary,
            vec![step(CREATE_EXPERIMENT, EXPERIMENT_CREATED)],
        ),
        scenario(
            "manage in workspace 1 cannot create experiment in workspace 2",
            on_experiments(Manage),
            Secondary,
            vec![step(CREATE_EXPERIMENT, ACTION_DENIED)],
        ),
    ]
}

/// Run cases; runs are authorized through the experiments resource
pub fn run_cases() -> Vec<TestCase> {
    use UserRole::{Edit, Read};
    vec![
        scenario(
            "edit can create run in baseline experiment",
            on_experiments(Edit),
            Primary,
            vec![step(CREATE_RUN, RUN_CREATED)],
        ),
        scenario(
            "read cannot create run",
            on_experiments(Read),
            Primary,
            vec![step(CREATE_RUN, ACTION_DENIED)],
        ),
        scenario(
            "edit can delete run",
            on_experiments(Edit),
            Primary,
            vec![step(CREATE_RUN, RUN_CREATED), step(DELETE_RUN, RUN_DELETED)],
        ),
        scenario(
            "read cannot delete run",
            on_experiments(Read),
            Primary,
            vec![step(DELETE_RUN, ACTION_DENIED)],
        ),
    ]
}

fn log_and_download_artifact() -> Vec<Step> {
    vec![
        step(CREATE_RUN, RUN_CREATED),
        setup(PREPARE_ARTIFACT),
        setup(LOG_ARTIFACT),
        step(LIST_ARTIFACTS, ARTIFACT_LOGGED),
        step(DOWNLOAD_ARTIFACT, ARTIFACT_DOWNLOADED),
        step(END_RUN, RUN_FINISHED),
    ]
}

fn log_and_load_model() -> Vec<Step> {
    vec![
        step(CREATE_RUN, RUN_CREATED),
        setup(TRAIN_MODEL),
        step(LOG_MODEL, MODEL_LOGGED),
        step(LOAD_MODEL, MODEL_LOADED),
        step(END_RUN, RUN_FINISHED),
    ]
}

/// A run cannot be started, and uploading to the workspace's existing run is
/// refused as well
fn artifact_upload_denied() -> Vec<Step> {
    vec![
        step(CREATE_RUN, ACTION_DENIED),
        setup(PREPARE_ARTIFACT),
        step(LOG_ARTIFACT, ACTION_DENIED),
    ]
}

/// Artifact and logged-model cases; authorized through the experiments
/// resource like runs
pub fn artifact_cases() -> Vec<TestCase> {
    use UserRole::{Edit, Manage, Read};
    vec![
        scenario(
            "edit can log and download artifacts",
            on_experiments(Edit),
            Primary,
            log_and_download_artifact(),
        ),
        scenario(
            "edit can log and load models",
            on_experiments(Edit),
            Primary,
            log_and_load_model(),
        ),
        scenario(
            "edit can verify artifact storage",
            on_experiments(Edit),
            Primary,
            vec![
                step(CREATE_RUN, RUN_CREATED),
                setup(PREPARE_ARTIFACT),
                setup(LOG_ARTIFACT),
                step(GET_RUN_INFO, STORAGE_VERIFIED),
                step(END_RUN, RUN_FINISHED),
            ],
        ),
        scenario(
            "read cannot log artifacts",
            on_experiments(Read),
            Primary,
            artifact_upload_denied(),
        ),
        scenario(
            "read cannot log models",
            on_experiments(Read),
            Primary,
            vec![
                step(CREATE_RUN, ACTION_DENIED),
                setup(TRAIN_MODEL),
                step(LOG_MODEL, ACTION_DENIED),
            ],
        ),
        scenario(
            "read in workspace 1 cannot start run in workspace 2",
            on_experiments(Read),
            Secondary,
            vec![step(CREATE_RUN, ACTION_DENIED)],
        ),
        scenario(
            "edit in workspace 1 cannot log artifacts in workspace 2",
            on_experiments(Edit),
            Secondary,
            artifact_upload_denied(),
        ),
        scenario(
            "manage can log and download artifacts",
            on_experiments(Manage),
            Primary,
            log_and_download_artifact(),
        ),
        scenario(
            "manage can log and load models",
            on_experiments(Manage),
            Primary,
            log_and_load_model(),
        ),
        scenario(
            "manage in workspace 1 cannot log artifacts in workspace 2",
            on_experiments(Manage),
            Secondary,
            artifact_upload_denied(),
        ),
    ]
}

/// Registered model cases
pub fn model_cases() -> Vec<TestCase> {
    vec![
        scenario(
            "get can get registered model",
            on_models(&[Get]),
            Primary,
            vec![step(GET_REGISTERED_MODEL, MODEL_RETRIEVED)],
        ),
        scenario(
            "get cannot create registered model",
            on_models(&[Get]),
            Primary,
            vec![step(CREATE_REGISTERED_MODEL, ACTION_DENIED)],
        ),
        scenario(
            "get in workspace 1 cannot get registered model in workspace 2",
            on_models(&[Get]),
            Secondary,
            vec![step(GET_REGISTERED_MODEL, ACTION_DENIED)],
        ),
        scenario(
            "create can create registered model",
            on_models(&[Create]),
            Primary,
            vec![step(CREATE_REGISTERED_MODEL, MODEL_CREATED)],
        ),
        scenario(
            "get, create and delete can delete registered model",
            on_models(&[Get, Create, Delete]),
            Primary,
            vec![
                step(CREATE_REGISTERED_MODEL, MODEL_CREATED),
                step(DELETE_REGISTERED_MODEL, MODEL_DELETED),
            ],
        ),
        scenario(
            "create in workspace 1 cannot create registered model in workspace 2",
            on_models(&[Create]),
            Secondary,
            vec![step(CREATE_REGISTERED_MODEL, ACTION_DENIED)],
        ),
        scenario(
            "get cannot delete registered model",
            on_models(&[Get]),
            Primary,
            vec![
                setup(GET_REGISTERED_MODEL),
                step(DELETE_REGISTERED_MODEL, ACTION_DENIED),
            ],
        ),
        scenario(
            "create cannot delete registered model without delete",
            on_models(&[Create]),
            Primary,
            vec![
                step(CREATE_REGISTERED_MODEL, MODEL_CREATED),
                step(DELETE_REGISTERED_MODEL, ACTION_DENIED),
            ],
        ),
        scenario(
            "delete cannot create registered model without create",
            on_models(&[Delete]),
            Primary,
            vec![step(CREATE_REGISTERED_MODEL, ACTION_DENIED)],
        ),
        scenario(
            "delete cannot get registered model without get",
            on_models(&[Delete]),
            Primary,
            vec![step(GET_REGISTERED_MODEL, ACTION_DENIED)],
        ),
        scenario(
            "update cannot create registered model without create",
            on_models(&[Update]),
            Primary,
            vec![step(CREATE_REGISTERED_MODEL, ACTION_DENIED)],
        ),
        scenario(
            "list cannot delete registered model without delete",
            on_models(&[List]),
            Primary,
            vec![
                setup(GET_REGISTERED_MODEL),
                step(DELETE_REGISTERED_MODEL, ACTION_DENIED),
            ],
        ),
    ]
}

/// Every case, experiments first
pub fn all_cases() -> Vec<TestCase> {
    let mut cases = experiment_cases();
    cases.extend(run_cases());
    cases.extend(artifact_cases());
    cases.extend(model_cases());
    cases
}

/// Cases whose name contains `filter` (case-insensitive); all when `None`
pub fn filter_cases(cases: Vec<TestCase>, filter: Option<&str>) -> Vec<TestCase> {
    match filter.map(str::to_lowercase) {
        None => cases,
        Some(needle) => cases
            .into_iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect(),
    }
}
