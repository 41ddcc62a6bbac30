//! MLflow tracking service client
//!
//! Every client is bound to one credential and one workspace at construction.
//! Nothing is read from process-wide state, so two clients for different
//! identities can coexist without interfering.
//!
//! Non-2xx responses become [`Error::Tracking`] whose message carries the
//! server's `error_code` and `message`. The classifier relies on that text.
//!
//! Artifacts move through the server's artifact proxy
//! (`/api/2.0/mlflow-artifacts/artifacts/...`) with the same credential and
//! workspace header as every other call. Runs whose artifact root is not a
//! `mlflow-artifacts:` URI are rejected rather than written to storage
//! directly.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use mlflow_rbac_common::{Error, Result};

use crate::artifacts::{ArtifactFile, LinearModel, MODEL_ARTIFACT_PATH, MODEL_FILE};
use crate::identity::Credential;

/// Header carrying the workspace a request is scoped to
pub const WORKSPACE_HEADER: &str = "X-MLflow-Workspace";

/// Scheme of artifact roots served through the tracking service
pub const PROXIED_ARTIFACT_SCHEME: &str = "mlflow-artifacts:";

/// Prefix of URIs naming a logged model
pub const MODEL_URI_SCHEME: &str = "models:/";

const API_PREFIX: &str = "api/2.0/mlflow";
const ARTIFACTS_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts";
const RUN_FINISHED: &str = "FINISHED";
const LOGGED_MODEL_READY: &str = "LOGGED_MODEL_READY";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An experiment as returned by `experiments/get`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    /// Server-assigned id
    pub experiment_id: String,
    /// Unique name
    pub name: String,
    /// `active` or `deleted`
    #[serde(default)]
    pub lifecycle_stage: Option<String>,
}

/// A registered model as returned by `registered-models/get`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    /// Unique name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// A run's metadata as returned by `runs/get`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Server-assigned id
    pub run_id: String,
    /// Experiment the run belongs to
    #[serde(default)]
    pub experiment_id: String,
    /// `RUNNING`, `FINISHED`, ...
    #[serde(default)]
    pub status: Option<String>,
    /// `active` or `deleted`
    #[serde(default)]
    pub lifecycle_stage: Option<String>,
    /// Root under which the run's artifacts are stored
    #[serde(default)]
    pub artifact_uri: Option<String>,
}

/// Operations the scenarios perform against the tracking service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TrackingClient: Send + Sync {
    /// Identity the client authenticates as
    fn identity(&self) -> &str;

    /// Workspace the client is scoped to
    fn workspace(&self) -> &str;

    /// Create an experiment, returning its id
    async fn create_experiment(&self, name: &str) -> Result<String>;

    /// Fetch an experiment by id
    async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment>;

    /// Delete an experiment by id
    async fn delete_experiment(&self, experiment_id: &str) -> Result<()>;

    /// Start a run in an experiment, returning the run id
    async fn create_run(&self, experiment_id: &str) -> Result<String>;

    /// Fetch a run's metadata by id
    async fn get_run(&self, run_id: &str) -> Result<RunInfo>;

    /// Mark a run `FINISHED`
    async fn end_run(&self, run_id: &str) -> Result<()>;

    /// Delete a run by id
    async fn delete_run(&self, run_id: &str) -> Result<()>;

    /// Upload `file` to the root of the run's artifacts
    async fn log_artifact(&self, run_id: &str, file: &ArtifactFile) -> Result<()>;

    /// Paths of the artifacts at the root of the run
    async fn list_artifacts(&self, run_id: &str) -> Result<Vec<String>>;

    /// Bytes of the artifact at `path` below the run root
    async fn download_artifact(&self, run_id: &str, path: &str) -> Result<Vec<u8>>;

    /// Log `model` from `run_id`, returning its `models:/` URI
    async fn log_model(&self, run_id: &str, model: &LinearModel) -> Result<String>;

    /// Load the model behind a `models:/` URI
    async fn load_model(&self, model_uri: &str) -> Result<LinearModel>;

    /// Register a model, returning its name
    async fn create_registered_model(&self, name: &str) -> Result<String>;

    /// Fetch a registered model by name
    async fn get_registered_model(&self, name: &str) -> Result<RegisteredModel>;

    /// Delete a registered model by name
    async fn delete_registered_model(&self, name: &str) -> Result<()>;
}

/// Connection settings shared by every client of one tracking service
#[derive(Clone, Debug)]
pub struct TrackingConfig {
    /// Base URI, e.g. `https://mlflow.example.com`
    pub base_url: String,
    /// Skip TLS verification
    pub insecure_tls: bool,
    /// Extra PEM bundle to trust
    pub ca_bundle: Option<PathBuf>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl TrackingConfig {
    /// Settings with default TLS behaviour and timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            insecure_tls: false,
            ca_bundle: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A configured HTTP connection pool to one tracking service.
///
/// Cheap to clone; hands out per-identity [`MlflowRestClient`]s.
#[derive(Clone)]
pub struct TrackingEndpoint {
    http: reqwest::Client,
    base_url: String,
}

impl TrackingEndpoint {
    /// Build the HTTP client from connection settings
    pub fn new(config: &TrackingConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::validation_for_field(
                "tracking_uri",
                "tracking URI cannot be empty",
            ));
        }

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_tls);

        if let Some(path) = &config.ca_bundle {
            let pem = std::fs::read(path).map_err(|e| {
                Error::internal_with_context(
                    "tracking_client",
                    format!("failed to read CA bundle {}: {}", path.display(), e),
                )
            })?;
            for cert in reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                Error::internal_with_context("tracking_client", format!("invalid CA bundle: {}", e))
            })? {
                builder = builder.add_root_certificate(cert);
            }
        }

        let http = builder.build().map_err(|e| {
            Error::internal_with_context(
                "tracking_client",
                format!("failed to create HTTP client: {}", e),
            )
        })?;

        Ok(Self { http, base_url })
    }

    /// Client authenticating as `identity` with `credential`, scoped to `workspace`
    pub fn bind(
        &self,
        identity: impl Into<String>,
        credential: Credential,
        workspace: impl Into<String>,
    ) -> MlflowRestClient {
        MlflowRestClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            identity: identity.into(),
            credential,
            workspace: workspace.into(),
        }
    }
}

/// [`TrackingClient`] over the MLflow REST API
pub struct MlflowRestClient {
    http: reqwest::Client,
    base_url: String,
    identity: String,
    credential: Credential,
    workspace: String,
}

/// Error body returned by the tracking service
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// MLflow error code implied by a status when the body carries none
fn status_error_code(status: StatusCode) -> Option<&'static str> {
    match status {
        StatusCode::UNAUTHORIZED => Some("UNAUTHENTICATED"),
        StatusCode::FORBIDDEN => Some("PERMISSION_DENIED"),
        StatusCode::NOT_FOUND => Some("RESOURCE_DOES_NOT_EXIST"),
        _ => None,
    }
}

/// Render a non-2xx response body as "<error_code>: <message>".
///
/// Bodies that are not MLflow error JSON, such as a proxy's HTML 401 page,
/// fall back to the status reason and raw text, prefixed with the error code
/// the status implies.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let canonical = status.canonical_reason().unwrap_or("Unknown");
    let reason = match status_error_code(status) {
        Some(code) => format!("{}: {}", code, canonical),
        None => canonical.to_string(),
    };
    match (parsed.error_code, parsed.message) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code,
        (None, Some(message)) => format!("{}: {}", reason, message),
        (None, None) if body.trim().is_empty() => reason,
        (None, None) => format!("{}: {}", reason, body.trim()),
    }
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}/{}/{}", base_url, API_PREFIX, path)
}

/// Path of an artifact root below the artifact proxy.
///
/// Accepts `mlflow-artifacts:/path` and `mlflow-artifacts://host/path`.
fn proxied_root(artifact_uri: &str) -> Result<String> {
    let rest = artifact_uri
        .strip_prefix(PROXIED_ARTIFACT_SCHEME)
        .ok_or_else(|| {
            Error::validation(format!(
                "artifact root {} is not served through the tracking service",
                artifact_uri
            ))
        })?;
    let path = match rest.strip_prefix("//") {
        Some(with_host) => with_host.split_once('/').map(|(_, p)| p).unwrap_or(""),
        None => rest,
    };
    Ok(path.trim_matches('/').to_string())
}

fn artifact_url(base_url: &str, root: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if root.is_empty() {
        format!("{}/{}/{}", base_url, ARTIFACTS_PREFIX, path)
    } else {
        format!("{}/{}/{}/{}", base_url, ARTIFACTS_PREFIX, root, path)
    }
}

fn model_id(model_uri: &str) -> Result<&str> {
    match model_uri.strip_prefix(MODEL_URI_SCHEME) {
        Some(id) if !id.is_empty() && !id.contains('/') => Ok(id),
        _ => Err(Error::validation(format!(
            "{} is not a logged model URI",
            model_uri
        ))),
    }
}

fn decode<T: DeserializeOwned>(operation: &str, status: StatusCode, bytes: &[u8]) -> Result<T> {
    let text = String::from_utf8_lossy(bytes);
    let body: &str = if text.trim().is_empty() { "{}" } else { &text };
    serde_json::from_str(body).map_err(|e| {
        Error::tracking(
            operation,
            status.as_u16(),
            format!("invalid response body: {}", e),
        )
    })
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunResponse {
    run: Run,
}

#[derive(Deserialize)]
struct FileInfo {
    path: String,
}

#[derive(Deserialize)]
struct ListArtifactsResponse {
    #[serde(default)]
    files: Vec<FileInfo>,
}

#[derive(Deserialize)]
struct LoggedModelInfo {
    model_id: String,
    artifact_uri: String,
}

#[derive(Deserialize)]
struct LoggedModel {
    info: LoggedModelInfo,
}

#[derive(Deserialize)]
struct LoggedModelResponse {
    model: LoggedModel,
}

#[derive(Deserialize)]
struct RegisteredModelResponse {
    registered_model: RegisteredModel,
}

#[derive(Deserialize)]
struct Empty {}

impl MlflowRestClient {
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(self.credential.expose())
            .header(WORKSPACE_HEADER, &self.workspace)
    }

    /// Send `request`, turning non-2xx responses into [`Error::Tracking`]
    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<(StatusCode, Vec<u8>)> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::tracking(operation, 0, format!("request failed: {}", e)))?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            Error::tracking(
                operation,
                status.as_u16(),
                format!("failed to read response: {}", e),
            )
        })?;

        if !status.is_success() {
            return Err(Error::tracking(
                operation,
                status.as_u16(),
                error_message(status, &String::from_utf8_lossy(&bytes)),
            ));
        }
        Ok((status, bytes.to_vec()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = endpoint_url(&self.base_url, path);
        debug!(
            operation = %operation,
            identity = %self.identity,
            workspace = %self.workspace,
            url = %url,
            "Tracking request"
        );

        let mut request = self.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let (status, bytes) = self.send(operation, request).await?;
        decode(operation, status, &bytes)
    }

    async fn upload(&self, operation: &str, root: &str, path: &str, content: Vec<u8>) -> Result<()> {
        let url = artifact_url(&self.base_url, &proxied_root(root)?, path);
        debug!(operation = %operation, identity = %self.identity, workspace = %self.workspace, url = %url, bytes = content.len(), "Artifact upload");
        let request = self
            .request(Method::PUT, &url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content);
        self.send(operation, request).await?;
        Ok(())
    }

    async fn download(&self, operation: &str, root: &str, path: &str) -> Result<Vec<u8>> {
        let url = artifact_url(&self.base_url, &proxied_root(root)?, path);
        debug!(operation = %operation, identity = %self.identity, workspace = %self.workspace, url = %url, "Artifact download");
        let (_, bytes) = self.send(operation, self.request(Method::GET, &url)).await?;
        Ok(bytes)
    }

    async fn artifact_root(&self, operation: &str, run_id: &str) -> Result<String> {
        self.get_run(run_id).await?.artifact_uri.ok_or_else(|| {
            Error::tracking(operation, 200, format!("run {} has no artifact root", run_id))
        })
    }

    async fn get_logged_model(&self, model_id: &str) -> Result<LoggedModelInfo> {
        let resp: LoggedModelResponse = self
            .call(
                "get_logged_model",
                Method::GET,
                &format!("logged-models/{}", model_id),
                &[],
                None,
            )
            .await?;
        Ok(resp.model.info)
    }
}

#[async_trait]
impl TrackingClient for MlflowRestClient {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn workspace(&self) -> &str {
        &self.workspace
    }

    async fn create_experiment(&self, name: &str) -> Result<String> {
        let resp: CreateExperimentResponse = self
            .call(
                "create_experiment",
                Method::POST,
                "experiments/create",
                &[],
                Some(json!({ "name": name })),
            )
            .await?;
        Ok(resp.experiment_id)
    }

    async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        let resp: GetExperimentResponse = self
            .call(
                "get_experiment",
                Method::GET,
                "experiments/get",
                &[("experiment_id", experiment_id)],
                None,
            )
            .await?;
        Ok(resp.experiment)
    }

    async fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        let _: Empty = self
            .call(
                "delete_experiment",
                Method::POST,
                "experiments/delete",
                &[],
                Some(json!({ "experiment_id": experiment_id })),
            )
            .await?;
        Ok(())
    }

    async fn create_run(&self, experiment_id: &str) -> Result<String> {
        let resp: RunResponse = self
            .call(
                "create_run",
                Method::POST,
                "runs/create",
                &[],
                Some(json!({ "experiment_id": experiment_id })),
            )
            .await?;
        Ok(resp.run.info.run_id)
    }

    async fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        let resp: RunResponse = self
            .call(
                "get_run",
                Method::GET,
                "runs/get",
                &[("run_id", run_id)],
                None,
            )
            .await?;
        Ok(resp.run.info)
    }

    async fn end_run(&self, run_id: &str) -> Result<()> {
        let _: Empty = self
            .call(
                "end_run",
                Method::POST,
                "runs/update",
                &[],
                Some(json!({ "run_id": run_id, "status": RUN_FINISHED })),
            )
            .await?;
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        let _: Empty = self
            .call(
                "delete_run",
                Method::POST,
                "runs/delete",
                &[],
                Some(json!({ "run_id": run_id })),
            )
            .await?;
        Ok(())
    }

    async fn log_artifact(&self, run_id: &str, file: &ArtifactFile) -> Result<()> {
        let root = self.artifact_root("log_artifact", run_id).await?;
        self.upload("log_artifact", &root, &file.name, file.content.clone())
            .await
    }

    async fn list_artifacts(&self, run_id: &str) -> Result<Vec<String>> {
        let resp: ListArtifactsResponse = self
            .call(
                "list_artifacts",
                Method::GET,
                "artifacts/list",
                &[("run_id", run_id)],
                None,
            )
            .await?;
        Ok(resp.files.into_iter().map(|f| f.path).collect())
    }

    async fn download_artifact(&self, run_id: &str, path: &str) -> Result<Vec<u8>> {
        let root = self.artifact_root("download_artifact", run_id).await?;
        self.download("download_artifact", &root, path).await
    }

    async fn log_model(&self, run_id: &str, model: &LinearModel) -> Result<String> {
        let run = self.get_run(run_id).await?;
        let created: LoggedModelResponse = self
            .call(
                "log_model",
                Method::POST,
                "logged-models",
                &[],
                Some(json!({
                    "experiment_id": run.experiment_id,
                    "name": MODEL_ARTIFACT_PATH,
                    "source_run_id": run_id,
                })),
            )
            .await?;
        let info = created.model.info;

        self.upload("log_model", &info.artifact_uri, MODEL_FILE, model.to_bytes()?)
            .await?;

        let _: LoggedModelResponse = self
            .call(
                "log_model",
                Method::PATCH,
                &format!("logged-models/{}", info.model_id),
                &[],
                Some(json!({ "model_id": info.model_id, "status": LOGGED_MODEL_READY })),
            )
            .await?;
        Ok(format!("{}{}", MODEL_URI_SCHEME, info.model_id))
    }

    async fn load_model(&self, model_uri: &str) -> Result<LinearModel> {
        let info = self.get_logged_model(model_id(model_uri)?).await?;
        let bytes = self
            .download("load_model", &info.artifact_uri, MODEL_FILE)
            .await?;
        LinearModel::from_bytes(&bytes)
    }

    async fn create_registered_model(&self, name: &str) -> Result<String> {
        let resp: RegisteredModelResponse = self
            .call(
                "create_registered_model",
                Method::POST,
                "registered-models/create",
                &[],
                Some(json!({ "name": name })),
            )
            .await?;
        Ok(resp.registered_model.name)
    }

    async fn get_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        let resp: RegisteredModelResponse = self
            .call(
                "get_registered_model",
                Method::GET,
                "registered-models/get",
                &[("name", name)],
                None,
            )
            .await?;
        Ok(resp.registered_model)
    }

    async fn delete_registered_model(&self, name: &str) -> Result<()> {
        let _: Empty = self
            .call(
                "delete_registered_model",
                Method::DELETE,
                "registered-models/delete",
                &[],
                Some(json!({ "name": name })),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, ErrorCode};

    #[test]
    fn mlflow_error_body_is_rendered_with_code() {
        let body = r#"{"error_code":"PERMISSION_DENIED","message":"Permission denied for experiments"}"#;
        assert_eq!(
            error_message(StatusCode::FORBIDDEN, body),
            "PERMISSION_DENIED: Permission denied for experiments"
        );
    }

    #[test]
    fn non_json_body_falls_back_to_status_reason() {
        assert_eq!(
            error_message(StatusCode::FORBIDDEN, "<html>nope</html>"),
            "PERMISSION_DENIED: Forbidden: <html>nope</html>"
        );
        assert_eq!(
            error_message(StatusCode::UNAUTHORIZED, ""),
            "UNAUTHENTICATED: Unauthorized"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "Bad Gateway: upstream down"
        );
    }

    /// Story: an auth proxy in front of the server answers with plain text or
    /// HTML; the status alone still decides how the failure is classified
    #[rstest::rstest]
    #[case::unauthorized_html(StatusCode::UNAUTHORIZED, "<html>401 Authorization Required</html>", ErrorCode::Unauthenticated)]
    #[case::unauthorized_empty(StatusCode::UNAUTHORIZED, "", ErrorCode::Unauthenticated)]
    #[case::forbidden_text(StatusCode::FORBIDDEN, "RBAC: access denied", ErrorCode::PermissionDenied)]
    #[case::forbidden_empty(StatusCode::FORBIDDEN, "  ", ErrorCode::PermissionDenied)]
    #[case::not_found_html(StatusCode::NOT_FOUND, "<h1>Not Here</h1>", ErrorCode::ResourceNotFound)]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, "oops", ErrorCode::InternalError)]
    fn story_non_json_errors_classify_by_status(
        #[case] status: StatusCode,
        #[case] body: &str,
        #[case] expected: ErrorCode,
    ) {
        let err = Error::tracking("create_experiment", status.as_u16(), error_message(status, body));
        assert_eq!(classify(&err.to_string()).code, expected);
    }

    /// Story: a 404 from the server becomes an error the classifier files as
    /// RESOURCE_NOT_FOUND, not as a permission problem
    #[test]
    fn story_tracking_errors_classify_by_server_code() {
        let body = r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"Experiment '42' does not exist."}"#;
        let err = Error::tracking(
            "get_experiment",
            404,
            error_message(StatusCode::NOT_FOUND, body),
        );
        assert_eq!(classify(&err.to_string()).code, ErrorCode::ResourceNotFound);

        let body = r#"{"error_code":"PERMISSION_DENIED","message":"not allowed"}"#;
        let err = Error::tracking(
            "create_experiment",
            403,
            error_message(StatusCode::FORBIDDEN, body),
        );
        assert_eq!(classify(&err.to_string()).code, ErrorCode::PermissionDenied);
    }

    #[test]
    fn endpoint_urls_are_rooted_at_api_prefix() {
        assert_eq!(
            endpoint_url("https://mlflow.example.com", "experiments/create"),
            "https://mlflow.example.com/api/2.0/mlflow/experiments/create"
        );
    }

    #[test]
    fn endpoint_rejects_empty_uri() {
        assert!(TrackingEndpoint::new(&TrackingConfig::new("/")).is_err());
    }

    #[test]
    fn clients_are_bound_to_identity_and_workspace() {
        let endpoint = TrackingEndpoint::new(&TrackingConfig::new("http://localhost:5000/")).unwrap();
        let a = endpoint.bind("alice", Credential::unvalidated("t1"), "workspace1");
        let b = endpoint.bind("bob", Credential::unvalidated("t2"), "workspace2");
        assert_eq!((a.identity(), a.workspace()), ("alice", "workspace1"));
        assert_eq!((b.identity(), b.workspace()), ("bob", "workspace2"));
        assert_eq!(a.base_url, "http://localhost:5000");
    }

    #[rstest::rstest]
    #[case::single_slash("mlflow-artifacts:/1/abc/artifacts", "1/abc/artifacts")]
    #[case::with_host("mlflow-artifacts://mlflow.example.com/1/abc/artifacts/", "1/abc/artifacts")]
    #[case::host_only("mlflow-artifacts://mlflow.example.com", "")]
    fn proxied_roots_map_below_the_artifact_proxy(#[case] uri: &str, #[case] root: &str) {
        assert_eq!(proxied_root(uri).unwrap(), root);
    }

    #[test]
    fn direct_storage_roots_are_rejected() {
        assert!(proxied_root("s3://bucket/1/abc/artifacts").is_err());
        assert!(proxied_root("/mlruns/1/abc/artifacts").is_err());
    }

    #[test]
    fn artifact_urls_are_rooted_at_the_proxy() {
        assert_eq!(
            artifact_url("https://mlflow.example.com", "1/abc/artifacts", "notes.txt"),
            "https://mlflow.example.com/api/2.0/mlflow-artifacts/artifacts/1/abc/artifacts/notes.txt"
        );
        assert_eq!(
            artifact_url("https://mlflow.example.com", "", "/notes.txt"),
            "https://mlflow.example.com/api/2.0/mlflow-artifacts/artifacts/notes.txt"
        );
    }

    #[test]
    fn model_uris_name_one_logged_model() {
        assert_eq!(model_id("models:/m-1234").unwrap(), "m-1234");
        assert!(model_id("runs:/abc/model").is_err());
        assert!(model_id("models:/").is_err());
        assert!(model_id("models:/name/3").is_err());
    }

    #[test]
    fn run_and_listing_responses_parse() {
        let body = r#"{"run":{"info":{"run_id":"r1","experiment_id":"7","status":"RUNNING","lifecycle_stage":"active","artifact_uri":"mlflow-artifacts:/7/r1/artifacts"},"data":{}}}"#;
        let resp: RunResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.run.info.experiment_id, "7");
        assert_eq!(resp.run.info.status.as_deref(), Some("RUNNING"));

        let listed: ListArtifactsResponse =
            decode("list_artifacts", StatusCode::OK, br#"{"root_uri":"x","files":[{"path":"a.txt","is_dir":false,"file_size":3}]}"#).unwrap();
        assert_eq!(listed.files.len(), 1);
        let empty: ListArtifactsResponse = decode("list_artifacts", StatusCode::OK, b"").unwrap();
        assert!(empty.files.is_empty());
    }

    #[test]
    fn experiment_response_parses() {
        let body = r#"{"experiment":{"experiment_id":"7","name":"exp","lifecycle_stage":"active","tags":[]}}"#;
        let resp: GetExperimentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.experiment.experiment_id, "7");
    }
}
