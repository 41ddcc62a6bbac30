//! Shared Kubernetes utilities using kube-rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_HARNESS};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP status the API server returns when an object already exists
pub const STATUS_CONFLICT: u16 = 409;
/// HTTP status the API server returns when an object is missing
pub const STATUS_NOT_FOUND: u16 = 404;

/// Create a kube client from an optional kubeconfig path with default timeouts.
///
/// Without a path, the in-cluster config or the default kubeconfig is inferred.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    let mut config = config;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Create a kube client, retrying transient failures up to 10 times.
pub async fn create_client_with_retry(kubeconfig: Option<PathBuf>) -> Result<Client, Error> {
    retry_with_backoff(
        &RetryConfig::with_max_attempts(10),
        "create_kube_client",
        || {
            let path = kubeconfig.clone();
            async move { create_client(path.as_deref()).await }
        },
    )
    .await
}

/// Ensure a namespace exists (idempotent).
///
/// Uses server-side apply so it never fails on "already exists".
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "labels": { LABEL_MANAGED_BY: LABEL_MANAGED_BY_HARNESS }
        }
    });
    api.patch(
        name,
        &PatchParams::apply(crate::FIELD_MANAGER),
        &Patch::Apply(&ns),
    )
    .await?;
    debug!(namespace = %name, "Namespace ensured");
    Ok(())
}

/// Whether a kube error is an API response with the given HTTP status
pub fn is_api_status(err: &kube::Error, status: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == status)
}

/// Whether a kube error means the object already exists
pub fn is_conflict(err: &kube::Error) -> bool {
    is_api_status(err, STATUS_CONFLICT)
}

/// Whether a kube error means the object does not exist
pub fn is_not_found(err: &kube::Error) -> bool {
    is_api_status(err, STATUS_NOT_FOUND)
}

/// Username the API server assigns to a service account
pub fn service_account_username(namespace: &str, name: &str) -> String {
    format!("system:serviceaccount:{}:{}", namespace, name)
}

/// Lowercase alphanumeric suffix for collision-free object names
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_conflict_detection() {
        assert!(is_conflict(&api_error(409)));
        assert!(!is_conflict(&api_error(404)));
        assert!(!is_conflict(&api_error(500)));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(409)));
    }

    #[test]
    fn test_service_account_username() {
        assert_eq!(
            service_account_username("workspace1", "test-user-ab12"),
            "system:serviceaccount:workspace1:test-user-ab12"
        );
    }

    #[test]
    fn test_random_suffix_is_dns_safe() {
        let suffix = random_suffix(6);
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_random_suffixes_differ() {
        // 36^8 possibilities; a collision here means the generator is broken
        assert_ne!(random_suffix(8), random_suffix(8));
    }
}
