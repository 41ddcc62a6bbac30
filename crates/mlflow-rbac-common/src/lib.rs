//! Common types for the MLflow RBAC harness: errors, retry, kube utilities and logging

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group served by the MLflow Kubernetes integration
pub const MLFLOW_API_GROUP: &str = "mlflow.kubeflow.org";

/// API group of Role and RoleBinding objects
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "mlflow-rbac-harness";

/// Label key stamped on every object the harness creates
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for [`LABEL_MANAGED_BY`]
pub const LABEL_MANAGED_BY_HARNESS: &str = "mlflow-rbac-harness";
