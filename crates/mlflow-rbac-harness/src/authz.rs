//! Authorization backend: Roles, RoleBindings and access reviews
//!
//! The trait is the seam between the provisioner/verifier and the API server,
//! so both can be driven by mocks in tests and by kube-rs in a real run.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use mlflow_rbac_common::kube_utils::{is_conflict, is_not_found, service_account_username};
use mlflow_rbac_common::{Error, Result, LABEL_MANAGED_BY, LABEL_MANAGED_BY_HARNESS, RBAC_API_GROUP};

use crate::permission::{KubeVerb, ResourceKind};

/// Result of a create call that tolerates pre-existing objects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// The object was already there (HTTP 409)
    AlreadyExists,
}

/// Authorization decision for one query
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The authorizer allows the request
    Allowed,
    /// The authorizer denies the request (or has no opinion)
    Denied {
        /// Reason given by the authorizer, if any
        reason: Option<String>,
    },
}

impl Decision {
    /// Whether this is an allow
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// One "can identity do verb on resource in scope under group" question
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionQuery {
    /// Service account name
    pub identity: String,
    /// Namespace of both the service account and the resource
    pub scope: String,
    /// Resource kind
    pub resource: ResourceKind,
    /// Verb
    pub verb: KubeVerb,
    /// API group qualifier; empty string is the core group
    pub group: String,
}

impl DecisionQuery {
    /// The user string the API server assigns to the service account
    pub fn user(&self) -> String {
        service_account_username(&self.scope, &self.identity)
    }
}

/// Operations against the cluster's authorization subsystem
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuthorizationBackend: Send + Sync {
    /// Create a namespaced Role with the given rules
    async fn create_role(
        &self,
        scope: &str,
        role: &str,
        rules: &[PolicyRule],
    ) -> Result<CreateOutcome>;

    /// Bind `role` to the service account `identity` in `scope`
    async fn create_binding(
        &self,
        scope: &str,
        binding: &str,
        role: &str,
        identity: &str,
    ) -> Result<CreateOutcome>;

    /// Delete a Role; a missing Role is not an error
    async fn delete_role(&self, scope: &str, role: &str) -> Result<()>;

    /// Delete a RoleBinding; a missing binding is not an error
    async fn delete_binding(&self, scope: &str, binding: &str) -> Result<()>;

    /// Ask the authorizer for a decision
    async fn query_decision(&self, query: &DecisionQuery) -> Result<Decision>;
}

/// [`AuthorizationBackend`] backed by the Kubernetes API
pub struct KubeAuthorizationBackend {
    client: Client,
}

impl KubeAuthorizationBackend {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn managed_meta(name: &str, scope: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(scope.to_string()),
        labels: Some(BTreeMap::from([(
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_HARNESS.to_string(),
        )])),
        ..Default::default()
    }
}

fn create_outcome<T>(kind: &str, name: &str, result: kube::Result<T>) -> Result<CreateOutcome> {
    match result {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(e) if is_conflict(&e) => {
            debug!(kind = %kind, name = %name, "Already exists");
            Ok(CreateOutcome::AlreadyExists)
        }
        Err(e) => Err(e.into()),
    }
}

fn delete_outcome<T>(result: kube::Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl AuthorizationBackend for KubeAuthorizationBackend {
    async fn create_role(
        &self,
        scope: &str,
        role: &str,
        rules: &[PolicyRule],
    ) -> Result<CreateOutcome> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), scope);
        let object = Role {
            metadata: managed_meta(role, scope),
            rules: Some(rules.to_vec()),
        };
        create_outcome("Role", role, api.create(&PostParams::default(), &object).await)
    }

    async fn create_binding(
        &self,
        scope: &str,
        binding: &str,
        role: &str,
        identity: &str,
    ) -> Result<CreateOutcome> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), scope);
        let object = RoleBinding {
            metadata: managed_meta(binding, scope),
            role_ref: RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: "Role".to_string(),
                name: role.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: identity.to_string(),
                namespace: Some(scope.to_string()),
                ..Default::default()
            }]),
        };
        create_outcome(
            "RoleBinding",
            binding,
            api.create(&PostParams::default(), &object).await,
        )
    }

    async fn delete_role(&self, scope: &str, role: &str) -> Result<()> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), scope);
        delete_outcome(api.delete(role, &DeleteParams::default()).await)
    }

    async fn delete_binding(&self, scope: &str, binding: &str) -> Result<()> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), scope);
        delete_outcome(api.delete(binding, &DeleteParams::default()).await)
    }

    async fn query_decision(&self, query: &DecisionQuery) -> Result<Decision> {
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let review = SubjectAccessReview {
            metadata: ObjectMeta::default(),
            spec: SubjectAccessReviewSpec {
                user: Some(query.user()),
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(query.scope.clone()),
                    verb: Some(query.verb.as_str().to_string()),
                    group: Some(query.group.clone()),
                    resource: Some(query.resource.as_str().to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            status: None,
        };

        let response = api.create(&PostParams::default(), &review).await?;
        let status = response.status.ok_or_else(|| {
            Error::internal_with_context("query_decision", "access review returned no status")
        })?;

        if status.allowed {
            Ok(Decision::Allowed)
        } else {
            Ok(Decision::Denied {
                reason: status.reason.filter(|r| !r.is_empty()),
            })
        }
    }
}
