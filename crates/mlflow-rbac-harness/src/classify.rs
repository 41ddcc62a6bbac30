//! Failure classification
//!
//! Tracking-service failures arrive as free text (HTTP status, MLflow error
//! code, server message). Scenarios need to assert on the *kind* of failure,
//! so every action error is mapped to an [`ErrorCode`] by ordered,
//! case-insensitive substring matching. The first matching pattern wins and
//! anything unrecognised is `INTERNAL_ERROR`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Structured failure kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller lacks the permission for the action
    PermissionDenied,
    /// No valid credential was presented
    Unauthenticated,
    /// Request was refused outright
    Forbidden,
    /// Credential was presented but rejected
    AuthenticationFailed,
    /// Target resource does not exist
    ResourceNotFound,
    /// Target resource already exists
    ResourceAlreadyExists,
    /// Caller has no access to the workspace
    WorkspaceAccessDenied,
    /// A quota or limit was hit
    QuotaExceeded,
    /// Malformed request
    InvalidRequest,
    /// Anything else
    InternalError,
}

impl ErrorCode {
    /// Wire representation, e.g. `PERMISSION_DENIED`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::ResourceAlreadyExists => "RESOURCE_ALREADY_EXISTS",
            ErrorCode::WorkspaceAccessDenied => "WORKSPACE_ACCESS_DENIED",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the code means the caller was not allowed to act
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            ErrorCode::PermissionDenied
                | ErrorCode::Unauthenticated
                | ErrorCode::Forbidden
                | ErrorCode::AuthenticationFailed
                | ErrorCode::WorkspaceAccessDenied
        )
    }

    /// Whether the code is about the credential rather than the grant
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            ErrorCode::Unauthenticated | ErrorCode::AuthenticationFailed | ErrorCode::Forbidden
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure with its kind, raw message and optional context
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Failure kind
    pub code: ErrorCode,
    /// Raw message the kind was derived from
    pub message: String,
    /// "Context: User: <identity>, Workspace: <scope>" when known
    pub details: Option<String>,
}

impl ClassifiedError {
    /// See [`ErrorCode::is_permission`]
    pub fn is_permission_error(&self) -> bool {
        self.code.is_permission()
    }

    /// See [`ErrorCode::is_authentication`]
    pub fn is_authentication_error(&self) -> bool {
        self.code.is_authentication()
    }

    /// MLflow-style envelope: `{"error": {"code", "message", "details"}}`
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({ "error": self })
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// One row of the classification table: matches when every needle of any
/// group is present.
struct Pattern {
    code: ErrorCode,
    any_of: &'static [&'static [&'static str]],
}

// Order matters: "permission denied" must win over the workspace rule,
// "not found" over "invalid", and so on.
const PATTERNS: &[Pattern] = &[
    Pattern {
        code: ErrorCode::PermissionDenied,
        any_of: &[&["permission", "denied"]],
    },
    Pattern {
        code: ErrorCode::Unauthenticated,
        any_of: &[&["unauthenticated"]],
    },
    Pattern {
        code: ErrorCode::Forbidden,
        any_of: &[&["forbidden"]],
    },
    Pattern {
        code: ErrorCode::AuthenticationFailed,
        any_of: &[&["authentication", "failed"]],
    },
    Pattern {
        code: ErrorCode::ResourceNotFound,
        any_of: &[&["not found"], &["does not exist"], &["resource_does_not_exist"]],
    },
    Pattern {
        code: ErrorCode::ResourceAlreadyExists,
        any_of: &[&["already exists"], &["duplicate"], &["resource_already_exists"]],
    },
    Pattern {
        code: ErrorCode::WorkspaceAccessDenied,
        any_of: &[&["workspace", "access"], &["workspace", "denied"]],
    },
    Pattern {
        code: ErrorCode::QuotaExceeded,
        any_of: &[&["quota"], &["limit"]],
    },
    Pattern {
        code: ErrorCode::InvalidRequest,
        any_of: &[&["invalid"], &["bad request"]],
    },
];

fn code_for(message: &str) -> ErrorCode {
    let haystack = message.to_lowercase();
    PATTERNS
        .iter()
        .find(|p| {
            p.any_of
                .iter()
                .any(|group| group.iter().all(|needle| haystack.contains(needle)))
        })
        .map(|p| p.code)
        .unwrap_or(ErrorCode::InternalError)
}

/// Classify a raw failure message. Pure and total.
pub fn classify(message: &str) -> ClassifiedError {
    ClassifiedError {
        code: code_for(message),
        message: message.to_string(),
        details: None,
    }
}

/// Classify and attach the identity and scope that were active
pub fn classify_in_context(message: &str, identity: &str, scope: &str) -> ClassifiedError {
    ClassifiedError {
        details: Some(context_details(identity, scope)),
        ..classify(message)
    }
}

/// The details string attached to classified errors
pub fn context_details(identity: &str, scope: &str) -> String {
    format!("Context: User: {}, Workspace: {}", identity, scope)
}

/// Whether a raw message classifies as a permission failure
pub fn is_permission_error(message: &str) -> bool {
    code_for(message).is_permission()
}

/// Whether a raw message classifies as an authentication failure
pub fn is_authentication_error(message: &str) -> bool {
    code_for(message).is_authentication()
}
