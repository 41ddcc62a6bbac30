//! Error types for the MLflow RBAC harness
//!
//! Errors are structured with fields to aid debugging when a permission
//! scenario fails. Each variant carries the identity, scope or action that
//! was involved so the failure message can be read without the logs.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid input (empty names, malformed configuration)
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending field, if known
        field: Option<String>,
    },

    /// Creating a Role or RoleBinding failed with something other than a conflict
    #[error("provisioning error for {identity} in {scope}: {message}")]
    Provisioning {
        /// Identity the grant was for
        identity: String,
        /// Scope (namespace) of the grant
        scope: String,
        /// Description of what failed
        message: String,
    },

    /// Identity creation or credential issuance failed
    #[error("identity error for {identity} in {scope}: {message}")]
    Identity {
        /// Service account name
        identity: String,
        /// Scope (namespace) of the identity
        scope: String,
        /// Description of what failed
        message: String,
    },

    /// No qualifier produced an allow decision before the retry budget ran out
    #[error(
        "authorization for {identity} to {verb} {resource} in {scope} could not be verified; \
         tried API groups {qualifiers:?}"
    )]
    VerificationExhausted {
        /// Identity that was checked
        identity: String,
        /// Scope the check ran in
        scope: String,
        /// Resource that was checked
        resource: String,
        /// Verb that was checked
        verb: String,
        /// Every qualifier that was tried, in order
        qualifiers: Vec<String>,
    },

    /// The tracking service rejected a request
    #[error("tracking service error [{status}] during {operation}: {message}")]
    Tracking {
        /// Operation that was attempted (e.g., "create_experiment")
        operation: String,
        /// HTTP status code, 0 when the request never reached the server
        status: u16,
        /// Server error code and message
        message: String,
    },

    /// An action failed and the step's validation did not expect a denial
    #[error(
        "action '{action}' failed unexpectedly for identity {identity} in scope {scope}: \
         [{code}] {message} ({details})"
    )]
    UnexpectedActionError {
        /// Action that failed
        action: String,
        /// Active identity when it failed
        identity: String,
        /// Active scope when it failed
        scope: String,
        /// Classified error code
        code: String,
        /// Raw error message
        message: String,
        /// Classified error details
        details: String,
    },

    /// A validation rejected the state produced by its action
    #[error("validation '{validation}' failed in step '{step}': {message}")]
    ValidationFailed {
        /// Step the validation belongs to
        step: String,
        /// Validation name
        validation: String,
        /// Assertion message
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "teardown")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a provisioning error for an identity's grant
    pub fn provisioning(
        identity: impl Into<String>,
        scope: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provisioning {
            identity: identity.into(),
            scope: scope.into(),
            message: msg.into(),
        }
    }

    /// Create an identity error
    pub fn identity(
        identity: impl Into<String>,
        scope: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Identity {
            identity: identity.into(),
            scope: scope.into(),
            message: msg.into(),
        }
    }

    /// Create a tracking service error
    pub fn tracking(operation: impl Into<String>, status: u16, msg: impl Into<String>) -> Self {
        Self::Tracking {
            operation: operation.into(),
            status,
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this is a failed assertion rather than an operational failure
    pub fn is_test_failure(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. } | Self::UnexpectedActionError { .. }
        )
    }
}
