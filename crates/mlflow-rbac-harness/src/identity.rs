//! Test identities: ServiceAccounts with TokenRequest-issued bearer tokens

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use mlflow_rbac_common::kube_utils::{is_conflict, is_not_found, random_suffix};
use mlflow_rbac_common::retry::{retry_with_backoff, RetryConfig};
use mlflow_rbac_common::{Error, Result, LABEL_MANAGED_BY, LABEL_MANAGED_BY_HARNESS};

use crate::authz::CreateOutcome;

/// Lifetime requested for issued tokens
pub const TOKEN_EXPIRATION_SECS: i64 = 3600;

/// Shortest token accepted as a real credential
pub const MIN_TOKEN_LEN: usize = 50;

const SUFFIX_LEN: usize = 8;

/// A bearer token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Accept an issued token only if it looks like a service account JWT:
    /// at least [`MIN_TOKEN_LEN`] characters and three non-empty segments.
    pub fn issued(token: impl Into<String>) -> std::result::Result<Self, String> {
        let token = token.into();
        if token.len() < MIN_TOKEN_LEN {
            return Err(format!(
                "token too short ({} characters, need at least {})",
                token.len(),
                MIN_TOKEN_LEN
            ));
        }
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(format!(
                "token is not a JWT ({} segments, expected 3)",
                segments.len()
            ));
        }
        Ok(Self(token))
    }

    /// Wrap an operator-supplied token without shape checks
    pub fn unvalidated(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the Authorization header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

/// A provisioned identity with its credential
#[derive(Clone, Debug)]
pub struct Identity {
    /// ServiceAccount name
    pub name: String,
    /// Namespace it lives in
    pub scope: String,
    /// Bearer credential
    pub credential: Credential,
}

/// `<prefix>-<random suffix>`, unique per test case
pub fn generate_identity_name(prefix: &str) -> String {
    format!("{}-{}", prefix, random_suffix(SUFFIX_LEN))
}

/// Creates and deletes identities
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Create the identity and issue a validated credential for it
    async fn create_identity(&self, name: &str, scope: &str) -> Result<Identity>;

    /// Delete the identity; a missing identity is not an error
    async fn delete_identity(&self, name: &str, scope: &str) -> Result<()>;
}

/// Raw ServiceAccount operations against the API server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceAccountApi: Send + Sync {
    /// Create a labelled ServiceAccount; 409 is [`CreateOutcome::AlreadyExists`]
    async fn create_service_account(&self, name: &str, scope: &str) -> Result<CreateOutcome>;

    /// Issue a bearer token for the account through the TokenRequest API
    async fn request_token(&self, name: &str, scope: &str) -> Result<String>;

    /// Delete the account; 404 is success
    async fn delete_service_account(&self, name: &str, scope: &str) -> Result<()>;
}

/// [`ServiceAccountApi`] over kube-rs
pub struct KubeServiceAccountApi {
    client: Client,
}

impl KubeServiceAccountApi {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceAccountApi for KubeServiceAccountApi {
    async fn create_service_account(&self, name: &str, scope: &str) -> Result<CreateOutcome> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), scope);
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(scope.to_string()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    LABEL_MANAGED_BY_HARNESS.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        match api.create(&PostParams::default(), &sa).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) if is_conflict(&e) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn request_token(&self, name: &str, scope: &str) -> Result<String> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), scope);
        let request = TokenRequest {
            metadata: Default::default(),
            spec: TokenRequestSpec {
                audiences: vec![],
                expiration_seconds: Some(TOKEN_EXPIRATION_SECS),
                bound_object_ref: None,
            },
            status: None,
        };

        let response = api
            .create_token_request(name, &PostParams::default(), &request)
            .await?;
        let token = response
            .status
            .ok_or_else(|| Error::identity(name, scope, "token response missing status"))?
            .token;

        if token.is_empty() {
            return Err(Error::identity(name, scope, "server returned empty token"));
        }
        Ok(token)
    }

    async fn delete_service_account(&self, name: &str, scope: &str) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), scope);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// [`IdentityBackend`] backed by ServiceAccounts and the TokenRequest API.
///
/// An account whose credential cannot be issued is deleted again before the
/// error is returned, so a failed create leaves nothing behind.
pub struct KubeIdentityBackend {
    api: Arc<dyn ServiceAccountApi>,
}

impl KubeIdentityBackend {
    /// Backend over a kube client
    pub fn new(client: Client) -> Self {
        Self::with_api(Arc::new(KubeServiceAccountApi::new(client)))
    }

    /// Backend over any [`ServiceAccountApi`]
    pub fn with_api(api: Arc<dyn ServiceAccountApi>) -> Self {
        Self { api }
    }

    async fn issue_credential(&self, name: &str, scope: &str) -> Result<Credential> {
        let token = retry_with_backoff(&RetryConfig::token_request(), "create_token_request", || {
            self.api.request_token(name, scope)
        })
        .await
        .map_err(|e| Error::identity(name, scope, format!("token request failed: {}", e)))?;

        Credential::issued(token).map_err(|msg| Error::identity(name, scope, msg))
    }
}

#[async_trait]
impl IdentityBackend for KubeIdentityBackend {
    async fn create_identity(&self, name: &str, scope: &str) -> Result<Identity> {
        match self.api.create_service_account(name, scope).await {
            Ok(CreateOutcome::Created) => {
                debug!(identity = %name, scope = %scope, "ServiceAccount created")
            }
            Ok(CreateOutcome::AlreadyExists) => {
                debug!(identity = %name, scope = %scope, "ServiceAccount already exists")
            }
            Err(e) => {
                return Err(Error::identity(
                    name,
                    scope,
                    format!("failed to create service account: {}", e),
                ))
            }
        }

        let credential = match self.issue_credential(name, scope).await {
            Ok(credential) => credential,
            Err(e) => {
                if let Err(cleanup) = self.api.delete_service_account(name, scope).await {
                    warn!(identity = %name, scope = %scope, error = %cleanup, "Failed to delete ServiceAccount after credential failure");
                }
                return Err(e);
            }
        };

        info!(identity = %name, scope = %scope, "Identity provisioned");
        Ok(Identity {
            name: name.to_string(),
            scope: scope.to_string(),
            credential,
        })
    }

    async fn delete_identity(&self, name: &str, scope: &str) -> Result<()> {
        self.api.delete_service_account(name, scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jwt() -> String {
        format!(
            "eyJhbGciOiJSUzI1NiJ9.{}.{}",
            "eyJzdWIiOiJzeXN0ZW06c2VydmljZWFjY291bnQifQ",
            "c2lnbmF0dXJl"
        )
    }

    #[test]
    fn accepts_service_account_jwt() {
        let cred = Credential::issued(fake_jwt()).unwrap();
        assert_eq!(cred.expose(), fake_jwt());
    }

    #[test]
    fn rejects_short_tokens() {
        let err = Credential::issued("a.b.c").unwrap_err();
        assert!(err.contains("too short"));
    }

    #[test]
    fn rejects_tokens_without_three_segments() {
        let two = "x".repeat(60) + "." + &"y".repeat(10);
        assert!(Credential::issued(two).unwrap_err().contains("2 segments"));

        let empty_segment = "x".repeat(60) + ".." + &"y".repeat(10);
        assert!(Credential::issued(empty_segment).is_err());
    }

    #[test]
    fn debug_never_prints_the_token() {
        let cred = Credential::issued(fake_jwt()).unwrap();
        let shown = format!("{:?}", cred);
        assert!(!shown.contains("eyJ"));
        assert!(shown.contains("bytes"));
    }

    #[test]
    fn generated_names_are_prefixed_and_unique() {
        let a = generate_identity_name("test-user");
        let b = generate_identity_name("test-user");
        assert!(a.starts_with("test-user-"));
        assert_eq!(a.len(), "test-user-".len() + SUFFIX_LEN);
        assert_ne!(a, b);
    }

    fn backend(api: MockServiceAccountApi) -> KubeIdentityBackend {
        KubeIdentityBackend::with_api(Arc::new(api))
    }

    /// Story: the issued token is not a JWT, so the account just created is
    /// deleted again and nothing is left behind
    #[tokio::test]
    async fn story_rejected_credential_deletes_the_account() {
        let mut api = MockServiceAccountApi::new();
        api.expect_create_service_account()
            .times(1)
            .returning(|_, _| Ok(CreateOutcome::Created));
        api.expect_request_token()
            .times(1)
            .returning(|_, _| Ok("short.tok.en".to_string()));
        api.expect_delete_service_account()
            .withf(|name, scope| name == "test-user-ab12" && scope == "workspace1")
            .times(1)
            .returning(|_, _| Ok(()));

        let err = backend(api)
            .create_identity("test-user-ab12", "workspace1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Identity { .. }), "{err}");
    }

    /// Story: TokenRequest keeps failing; after the retry budget the account
    /// is deleted and the original failure is reported
    #[tokio::test(start_paused = true)]
    async fn story_token_request_failure_deletes_the_account() {
        let mut api = MockServiceAccountApi::new();
        api.expect_create_service_account()
            .returning(|_, _| Ok(CreateOutcome::AlreadyExists));
        api.expect_request_token()
            .times(5)
            .returning(|_, _| Err(Error::internal("apiserver unavailable")));
        api.expect_delete_service_account()
            .times(1)
            .returning(|_, _| Err(Error::internal("still unavailable")));

        let err = backend(api)
            .create_identity("test-user-ab12", "workspace1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("token request failed"), "{err}");
    }

    #[tokio::test]
    async fn issued_jwt_yields_identity_without_cleanup() {
        let mut api = MockServiceAccountApi::new();
        api.expect_create_service_account()
            .returning(|_, _| Ok(CreateOutcome::Created));
        api.expect_request_token().returning(|_, _| Ok(fake_jwt()));
        api.expect_delete_service_account().never();

        let identity = backend(api)
            .create_identity("test-user-ab12", "workspace1")
            .await
            .unwrap();
        assert_eq!(identity.scope, "workspace1");
        assert_eq!(identity.credential.expose(), fake_jwt());
    }

    #[tokio::test]
    async fn failed_account_creation_skips_token_request() {
        let mut api = MockServiceAccountApi::new();
        api.expect_create_service_account()
            .returning(|_, _| Err(Error::internal("forbidden")));
        api.expect_request_token().never();
        api.expect_delete_service_account().never();

        assert!(backend(api)
            .create_identity("test-user-ab12", "workspace1")
            .await
            .is_err());
    }
}
