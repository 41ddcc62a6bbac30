//! Actions scenarios run as the active identity in the active workspace
//!
//! Each action updates the context's resource handles and registers anything
//! it creates for teardown. "Get" actions target the workspace's baseline
//! resources; delete actions target the current handle, falling back to the
//! baseline when no earlier step produced one. Artifact and model logging
//! likewise fall back to the baseline run, so a denied `create_run` still
//! leaves a run to attempt the upload against.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;

use mlflow_rbac_common::kube_utils::random_suffix;
use mlflow_rbac_common::{Error, Result};

use crate::artifacts::{ArtifactFile, LinearModel};
use crate::context::TestContext;
use crate::executor::Action;

/// Fetch the workspace's baseline experiment
pub const GET_EXPERIMENT: Action = Action {
    name: "get_experiment",
    run: get_experiment,
};

/// Create a new experiment
pub const CREATE_EXPERIMENT: Action = Action {
    name: "create_experiment",
    run: create_experiment,
};

/// Delete the current (or baseline) experiment
pub const DELETE_EXPERIMENT: Action = Action {
    name: "delete_experiment",
    run: delete_experiment,
};

/// Start a run in the current (or baseline) experiment
pub const CREATE_RUN: Action = Action {
    name: "create_run",
    run: create_run,
};

/// Delete the current (or baseline) run
pub const DELETE_RUN: Action = Action {
    name: "delete_run",
    run: delete_run,
};

/// Mark the current run finished
pub const END_RUN: Action = Action {
    name: "end_run",
    run: end_run,
};

/// Fetch the current run and record its artifact root
pub const GET_RUN_INFO: Action = Action {
    name: "get_run_info",
    run: get_run_info,
};

/// Prepare a local text artifact; touches no server
pub const PREPARE_ARTIFACT: Action = Action {
    name: "prepare_artifact",
    run: prepare_artifact,
};

/// Upload the prepared artifact to the current (or baseline) run
pub const LOG_ARTIFACT: Action = Action {
    name: "log_artifact",
    run: log_artifact,
};

/// List the artifacts of the current run
pub const LIST_ARTIFACTS: Action = Action {
    name: "list_artifacts",
    run: list_artifacts,
};

/// Download the prepared artifact back from the current run
pub const DOWNLOAD_ARTIFACT: Action = Action {
    name: "download_artifact",
    run: download_artifact,
};

/// Fit the reference linear model locally; touches no server
pub const TRAIN_MODEL: Action = Action {
    name: "train_model",
    run: train_model,
};

/// Log the trained model from the current (or baseline) run
pub const LOG_MODEL: Action = Action {
    name: "log_model",
    run: log_model,
};

/// Load the logged model back
pub const LOAD_MODEL: Action = Action {
    name: "load_model",
    run: load_model,
};

/// Fetch the workspace's baseline registered model
pub const GET_REGISTERED_MODEL: Action = Action {
    name: "get_registered_model",
    run: get_registered_model,
};

/// Register a new model
pub const CREATE_REGISTERED_MODEL: Action = Action {
    name: "create_registered_model",
    run: create_registered_model,
};

/// Delete the current (or baseline) registered model
pub const DELETE_REGISTERED_MODEL: Action = Action {
    name: "delete_registered_model",
    run: delete_registered_model,
};

fn baseline_experiment(ctx: &TestContext) -> Result<String> {
    ctx.baseline()
        .map(|b| b.experiment_id.clone())
        .ok_or_else(|| {
            Error::validation(format!(
                "no baseline experiment seeded in workspace {}",
                ctx.active_scope()
            ))
        })
}

fn baseline_run(ctx: &TestContext) -> Result<String> {
    ctx.baseline()
        .map(|b| b.run_id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::validation(format!(
                "no baseline run seeded in workspace {}",
                ctx.active_scope()
            ))
        })
}

fn current_or_baseline_run(ctx: &TestContext) -> Result<String> {
    match &ctx.run_id {
        Some(id) => Ok(id.clone()),
        None => baseline_run(ctx),
    }
}

fn current_run(ctx: &TestContext) -> Result<String> {
    ctx.run_id
        .clone()
        .ok_or_else(|| Error::validation("no run in this case; create one first"))
}

fn baseline_model(ctx: &TestContext) -> Result<String> {
    ctx.baseline().map(|b| b.model_name.clone()).ok_or_else(|| {
        Error::validation(format!(
            "no baseline model seeded in workspace {}",
            ctx.active_scope()
        ))
    })
}

fn get_experiment(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let id = baseline_experiment(ctx)?;
        let experiment = ctx.client()?.get_experiment(&id).await?;
        info!(experiment_id = %experiment.experiment_id, name = %experiment.name, "Retrieved experiment");
        ctx.experiment_id = Some(experiment.experiment_id);
        Ok(())
    }
    .boxed()
}

fn create_experiment(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = format!("test-experiment-{}", random_suffix(8));
        let id = ctx.client()?.create_experiment(&name).await?;
        let scope = ctx.active_scope().to_string();
        ctx.add_experiment_for_cleanup(&id, &scope)?;
        info!(experiment_id = %id, name = %name, scope = %scope, "Created experiment");
        ctx.experiment_id = Some(id);
        Ok(())
    }
    .boxed()
}

fn delete_experiment(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let id = match &ctx.experiment_id {
            Some(id) => id.clone(),
            None => baseline_experiment(ctx)?,
        };
        ctx.client()?.delete_experiment(&id).await?;
        ctx.forget_experiment(&id);
        info!(experiment_id = %id, "Deleted experiment");
        ctx.experiment_id = Some(id);
        Ok(())
    }
    .boxed()
}

fn create_run(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let experiment_id = match &ctx.experiment_id {
            Some(id) => id.clone(),
            None => baseline_experiment(ctx)?,
        };
        let run_id = ctx.client()?.create_run(&experiment_id).await?;
        let scope = ctx.active_scope().to_string();
        ctx.add_run_for_cleanup(&run_id, &scope)?;
        info!(run_id = %run_id, experiment_id = %experiment_id, "Created run");
        ctx.run_id = Some(run_id);
        Ok(())
    }
    .boxed()
}

fn delete_run(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let run_id = current_or_baseline_run(ctx)?;
        ctx.client()?.delete_run(&run_id).await?;
        ctx.forget_run(&run_id);
        info!(run_id = %run_id, "Deleted run");
        ctx.run_id = Some(run_id);
        Ok(())
    }
    .boxed()
}

fn end_run(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let run_id = current_run(ctx)?;
        ctx.client()?.end_run(&run_id).await?;
        info!(run_id = %run_id, "Ended run");
        Ok(())
    }
    .boxed()
}

fn get_run_info(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let run_id = current_or_baseline_run(ctx)?;
        let run = ctx.client()?.get_run(&run_id).await?;
        info!(run_id = %run_id, artifact_uri = ?run.artifact_uri, "Retrieved run");
        ctx.artifact_location = run.artifact_uri;
        Ok(())
    }
    .boxed()
}

fn prepare_artifact(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let artifact = ArtifactFile::sample();
        info!(artifact = %artifact.name, bytes = artifact.content.len(), "Prepared artifact");
        ctx.artifact = Some(artifact);
        Ok(())
    }
    .boxed()
}

fn log_artifact(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let run_id = current_or_baseline_run(ctx)?;
        let artifact = ctx.artifact.get_or_insert_with(ArtifactFile::sample).clone();
        ctx.client()?.log_artifact(&run_id, &artifact).await?;
        info!(run_id = %run_id, artifact = %artifact.name, "Logged artifact");
        Ok(())
    }
    .boxed()
}

fn list_artifacts(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let run_id = current_or_baseline_run(ctx)?;
        let paths = ctx.client()?.list_artifacts(&run_id).await?;
        info!(run_id = %run_id, count = paths.len(), "Listed artifacts");
        ctx.artifact_list = Some(paths);
        Ok(())
    }
    .boxed()
}

fn download_artifact(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let run_id = current_or_baseline_run(ctx)?;
        let name = ctx
            .artifact
            .as_ref()
            .map(|a| a.name.clone())
            .ok_or_else(|| Error::validation("no artifact prepared to download"))?;
        let bytes = ctx.client()?.download_artifact(&run_id, &name).await?;
        info!(run_id = %run_id, artifact = %name, bytes = bytes.len(), "Downloaded artifact");
        ctx.downloaded = Some(bytes);
        Ok(())
    }
    .boxed()
}

fn train_model(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let model = LinearModel::reference()?;
        info!(slope = model.slope, intercept = model.intercept, "Trained model");
        ctx.trained_model = Some(model);
        Ok(())
    }
    .boxed()
}

fn log_model(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let run_id = current_or_baseline_run(ctx)?;
        let model = ctx
            .trained_model
            .ok_or_else(|| Error::validation("no model trained to log"))?;
        let uri = ctx.client()?.log_model(&run_id, &model).await?;
        info!(run_id = %run_id, model_uri = %uri, "Logged model");
        ctx.logged_model_uri = Some(uri);
        Ok(())
    }
    .boxed()
}

fn load_model(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let uri = ctx
            .logged_model_uri
            .clone()
            .ok_or_else(|| Error::validation("no model logged to load"))?;
        ctx.trained_model = None;
        let model = ctx.client()?.load_model(&uri).await?;
        info!(model_uri = %uri, slope = model.slope, intercept = model.intercept, "Loaded model");
        ctx.trained_model = Some(model);
        Ok(())
    }
    .boxed()
}

fn get_registered_model(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = baseline_model(ctx)?;
        let model = ctx.client()?.get_registered_model(&name).await?;
        info!(model = %model.name, "Retrieved registered model");
        ctx.model_name = Some(model.name);
        Ok(())
    }
    .boxed()
}

fn create_registered_model(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let requested = format!("test-model-{}", random_suffix(8));
        let name = ctx.client()?.create_registered_model(&requested).await?;
        let scope = ctx.active_scope().to_string();
        ctx.add_model_for_cleanup(&name, &scope)?;
        info!(model = %name, scope = %scope, "Registered model");
        ctx.model_name = Some(name);
        Ok(())
    }
    .boxed()
}

fn delete_registered_model(ctx: &mut TestContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = match &ctx.model_name {
            Some(name) => name.clone(),
            None => baseline_model(ctx)?,
        };
        ctx.client()?.delete_registered_model(&name).await?;
        ctx.forget_model(&name);
        info!(model = %name, "Deleted registered model");
        ctx.model_name = Some(name);
        Ok(())
    }
    .boxed()
}
