//! Kubernetes RBAC verification harness for an MLflow tracking service
//!
//! Provisions ServiceAccount identities with scoped Roles, proves each grant
//! is enforced before relying on it, then drives the tracking API as those
//! identities and checks every allow and deny against intent.
//!
//! - [`permission`]: verbs, resource kinds and the rules they map to
//! - [`provisioner`] and [`verifier`]: write grants and wait until they bite
//! - [`classify`]: turn failure text into structured error codes
//! - [`tracking`] and [`artifacts`]: the REST client and what it uploads
//! - [`executor`], [`context`], [`actions`], [`validations`]: the step engine
//! - [`scenarios`] and [`harness`]: the permission matrices and suite runner

#![deny(missing_docs)]

pub mod actions;
pub mod artifacts;
pub mod authz;
pub mod classify;
pub mod config;
pub mod context;
pub mod environment;
pub mod executor;
pub mod harness;
pub mod identity;
pub mod permission;
pub mod provisioner;
pub mod scenarios;
pub mod tracking;
pub mod validations;
pub mod verifier;

pub use classify::{classify, ClassifiedError, ErrorCode};
pub use config::HarnessConfig;
pub use context::{IdentitySpec, ScopeRef, TestContext};
pub use environment::HarnessEnvironment;
pub use executor::{run_case, CaseReport, Step, TestCase};
pub use permission::{rules_for, Capability, KubeVerb, ResourceKind, UserRole};
pub use verifier::{VerificationOutcome, VerificationPolicy, VerifierConfig};
