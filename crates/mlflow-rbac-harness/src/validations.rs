//! Validations over the context after an action

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::classify::ErrorCode;
use crate::context::TestContext;
use crate::executor::{Validation, ValidationKind};
use crate::tracking::{RunInfo, MODEL_URI_SCHEME, PROXIED_ARTIFACT_SCHEME};

type Outcome<T = ()> = std::result::Result<T, String>;

/// The action was refused for lack of permission.
///
/// The only expect-denial validation: it runs even though its step's action
/// failed, and passes only if that action failed with a permission error.
pub const ACTION_DENIED: Validation = Validation {
    name: "action_denied",
    kind: ValidationKind::ExpectDenial,
    check: action_denied,
};

/// The baseline experiment was retrieved
pub const EXPERIMENT_RETRIEVED: Validation = Validation {
    name: "experiment_retrieved",
    kind: ValidationKind::Check,
    check: experiment_handle_set,
};

/// A new experiment was created
pub const EXPERIMENT_CREATED: Validation = Validation {
    name: "experiment_created",
    kind: ValidationKind::Check,
    check: experiment_handle_set,
};

/// The experiment is now in the `deleted` lifecycle stage
pub const EXPERIMENT_DELETED: Validation = Validation {
    name: "experiment_deleted",
    kind: ValidationKind::Check,
    check: experiment_deleted,
};

/// A run was created
pub const RUN_CREATED: Validation = Validation {
    name: "run_created",
    kind: ValidationKind::Check,
    check: run_handle_set,
};

/// The run is now in the `deleted` lifecycle stage
pub const RUN_DELETED: Validation = Validation {
    name: "run_deleted",
    kind: ValidationKind::Check,
    check: run_deleted,
};

/// The run reports status `FINISHED`
pub const RUN_FINISHED: Validation = Validation {
    name: "run_finished",
    kind: ValidationKind::Check,
    check: run_finished,
};

/// The prepared artifact appears in the run's listing
pub const ARTIFACT_LOGGED: Validation = Validation {
    name: "artifact_logged",
    kind: ValidationKind::Check,
    check: artifact_logged,
};

/// The downloaded bytes equal what was uploaded
pub const ARTIFACT_DOWNLOADED: Validation = Validation {
    name: "artifact_downloaded",
    kind: ValidationKind::Check,
    check: artifact_downloaded,
};

/// The run's artifacts are served through the tracking service
pub const STORAGE_VERIFIED: Validation = Validation {
    name: "storage_verified",
    kind: ValidationKind::Check,
    check: storage_verified,
};

/// A `models:/` URI was returned for the logged model
pub const MODEL_LOGGED: Validation = Validation {
    name: "model_logged",
    kind: ValidationKind::Check,
    check: model_logged,
};

/// The loaded model still predicts the line it was trained on
pub const MODEL_LOADED: Validation = Validation {
    name: "model_loaded",
    kind: ValidationKind::Check,
    check: model_loaded,
};

/// The baseline registered model was retrieved
pub const MODEL_RETRIEVED: Validation = Validation {
    name: "model_retrieved",
    kind: ValidationKind::Check,
    check: model_handle_set,
};

/// A new registered model was created
pub const MODEL_CREATED: Validation = Validation {
    name: "model_created",
    kind: ValidationKind::Check,
    check: model_handle_set,
};

/// The registered model no longer exists
pub const MODEL_DELETED: Validation = Validation {
    name: "model_deleted",
    kind: ValidationKind::Check,
    check: model_deleted,
};

fn action_denied(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        let action = ctx
            .last_action()
            .ok_or_else(|| "no action ran before the denial check".to_string())?;
        if !action.failed {
            return Err(format!(
                "action '{}' should have been denied for {} in {}, but succeeded",
                action.name,
                ctx.identity_name(),
                ctx.active_scope()
            ));
        }
        match &ctx.last_error {
            Some(err) if err.is_permission_error() => Ok(()),
            Some(err) => Err(format!(
                "action '{}' failed for the wrong reason: {}",
                action.name, err
            )),
            None => Err(format!("action '{}' failed without a recorded error", action.name)),
        }
    }
    .boxed()
}

fn experiment_handle_set(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        match &ctx.experiment_id {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(format!("experiment id not set for {}", ctx.identity_name())),
        }
    }
    .boxed()
}

fn run_handle_set(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        match &ctx.run_id {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(format!("run id not set for {}", ctx.identity_name())),
        }
    }
    .boxed()
}

fn model_handle_set(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        match &ctx.model_name {
            Some(name) if !name.is_empty() => Ok(()),
            _ => Err(format!("model name not set for {}", ctx.identity_name())),
        }
    }
    .boxed()
}

fn experiment_deleted(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        let id = ctx
            .experiment_id
            .clone()
            .ok_or_else(|| "experiment id not set after deletion".to_string())?;
        let client = ctx.client().map_err(|e| e.to_string())?;
        let experiment = client
            .get_experiment(&id)
            .await
            .map_err(|e| format!("could not fetch experiment {} after deletion: {}", id, e))?;
        match experiment.lifecycle_stage.as_deref() {
            Some("deleted") => Ok(()),
            other => Err(format!(
                "experiment {} lifecycle stage is {:?} instead of \"deleted\"",
                id, other
            )),
        }
    }
    .boxed()
}

fn model_deleted(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        let name = ctx
            .model_name
            .clone()
            .ok_or_else(|| "model name not set after deletion".to_string())?;
        let client = ctx.client().map_err(|e| e.to_string())?;
        match client.get_registered_model(&name).await {
            Ok(_) => Err(format!("model {} still exists after deletion", name)),
            Err(e) => {
                let classified = crate::classify::classify(&e.to_string());
                if classified.code == ErrorCode::ResourceNotFound {
                    Ok(())
                } else {
                    Err(format!(
                        "unexpected error while confirming deletion of {}: {}",
                        name, classified
                    ))
                }
            }
        }
    }
    .boxed()
}

const PREDICTION_INPUT: f64 = 4.0;
const EXPECTED_PREDICTION: f64 = 9.0;
const PREDICTION_TOLERANCE: f64 = 0.1;

async fn fetch_run(ctx: &TestContext) -> Outcome<RunInfo> {
    let run_id = ctx
        .run_id
        .clone()
        .ok_or_else(|| format!("run id not set for {}", ctx.identity_name()))?;
    let client = ctx.client().map_err(|e| e.to_string())?;
    client
        .get_run(&run_id)
        .await
        .map_err(|e| format!("could not fetch run {}: {}", run_id, e))
}

fn run_deleted(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        let run = fetch_run(ctx).await?;
        match run.lifecycle_stage.as_deref() {
            Some("deleted") => Ok(()),
            other => Err(format!(
                "run {} lifecycle stage is {:?} instead of \"deleted\"",
                run.run_id, other
            )),
        }
    }
    .boxed()
}

fn run_finished(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        let run = fetch_run(ctx).await?;
        match run.status.as_deref() {
            Some("FINISHED") => Ok(()),
            other => Err(format!(
                "run {} status is {:?} instead of \"FINISHED\"",
                run.run_id, other
            )),
        }
    }
    .boxed()
}

fn artifact_logged(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        let artifact = ctx
            .artifact
            .as_ref()
            .ok_or_else(|| "no artifact was prepared".to_string())?;
        let listed = ctx
            .artifact_list
            .as_ref()
            .ok_or_else(|| "artifacts were never listed".to_string())?;
        if listed.iter().any(|path| path == &artifact.name) {
            Ok(())
        } else {
            Err(format!(
                "artifact {} missing from listing {:?}",
                artifact.name, listed
            ))
        }
    }
    .boxed()
}

fn artifact_downloaded(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        let artifact = ctx
            .artifact
            .as_ref()
            .ok_or_else(|| "no artifact was prepared".to_string())?;
        match &ctx.downloaded {
            Some(bytes) if bytes == &artifact.content => Ok(()),
            Some(bytes) => Err(format!(
                "downloaded {} bytes of {} differ from the {} uploaded",
                bytes.len(),
                artifact.name,
                artifact.content.len()
            )),
            None => Err(format!("artifact {} was never downloaded", artifact.name)),
        }
    }
    .boxed()
}

fn storage_verified(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        match &ctx.artifact_location {
            Some(uri) if uri.starts_with(PROXIED_ARTIFACT_SCHEME) => Ok(()),
            Some(uri) => Err(format!(
                "artifact root {} is not served through the tracking service",
                uri
            )),
            None => Err("artifact location not recorded".to_string()),
        }
    }
    .boxed()
}

fn model_logged(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        match &ctx.logged_model_uri {
            Some(uri) if uri.starts_with(MODEL_URI_SCHEME) => Ok(()),
            Some(uri) => Err(format!("model URI {} does not start with {}", uri, MODEL_URI_SCHEME)),
            None => Err("no model URI recorded".to_string()),
        }
    }
    .boxed()
}

fn model_loaded(ctx: &TestContext) -> BoxFuture<'_, Outcome> {
    async move {
        let model = ctx
            .trained_model
            .ok_or_else(|| "no model loaded".to_string())?;
        let predicted = model.predict(PREDICTION_INPUT);
        if (predicted - EXPECTED_PREDICTION).abs() <= PREDICTION_TOLERANCE {
            Ok(())
        } else {
            Err(format!(
                "loaded model predicts {} for {} instead of {}",
                predicted, PREDICTION_INPUT, EXPECTED_PREDICTION
            ))
        }
    }
    .boxed()
}
