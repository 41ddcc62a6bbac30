//! Harness configuration assembled by the CLI

use std::path::PathBuf;

use mlflow_rbac_common::{Error, Result};

use crate::tracking::TrackingConfig;
use crate::verifier::VerifierConfig;

/// Workspaces used when none are configured
pub const DEFAULT_WORKSPACES: &str = "workspace1,workspace2";

/// Prefix of generated identity names
pub const DEFAULT_IDENTITY_PREFIX: &str = "test-user";

/// Everything a harness run needs to reach the cluster and the tracking service
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Tracking service connection settings
    pub tracking: TrackingConfig,
    /// Workspaces (namespaces) scenarios run in; the first is primary
    pub workspaces: Vec<String>,
    /// Bearer token of the administrative identity that seeds and cleans up
    pub admin_token: Option<String>,
    /// Kubeconfig path; inferred when unset
    pub kubeconfig: Option<PathBuf>,
    /// Authorization verification settings
    pub verifier: VerifierConfig,
    /// Prefix of generated identity names
    pub identity_prefix: String,
}

impl HarnessConfig {
    /// Config with defaults for everything but the tracking URI
    pub fn new(tracking_uri: impl Into<String>) -> Self {
        Self {
            tracking: TrackingConfig::new(tracking_uri),
            workspaces: parse_workspaces(DEFAULT_WORKSPACES),
            admin_token: None,
            kubeconfig: None,
            verifier: VerifierConfig::default(),
            identity_prefix: DEFAULT_IDENTITY_PREFIX.to_string(),
        }
    }

    /// Check the config is usable for a full run
    pub fn validate(&self) -> Result<()> {
        if self.tracking.base_url.trim().is_empty() {
            return Err(Error::validation_for_field(
                "tracking_uri",
                "tracking URI is required",
            ));
        }
        if self.workspaces.is_empty() {
            return Err(Error::validation_for_field(
                "workspaces",
                "at least one workspace is required",
            ));
        }
        if self.admin_token.as_deref().map_or(true, str::is_empty) {
            return Err(Error::validation_for_field(
                "admin_token",
                "an administrative token is required to seed and clean up resources",
            ));
        }
        if self.verifier.qualifiers.is_empty() {
            return Err(Error::validation_for_field(
                "qualifiers",
                "at least one API group qualifier is required",
            ));
        }
        Ok(())
    }
}

/// Split a comma-separated workspace list, dropping blanks and duplicates
pub fn parse_workspaces(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for ws in raw.split(',').map(str::trim).filter(|w| !w.is_empty()) {
        if !out.iter().any(|w| w == ws) {
            out.push(ws.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> HarnessConfig {
        HarnessConfig {
            admin_token: Some("admin-token".to_string()),
            ..HarnessConfig::new("https://mlflow.example.com")
        }
    }

    #[test]
    fn defaults_to_two_workspaces() {
        assert_eq!(valid().workspaces, vec!["workspace1", "workspace2"]);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn workspace_list_is_trimmed_and_deduplicated() {
        assert_eq!(
            parse_workspaces(" team-a, team-b ,,team-a"),
            vec!["team-a", "team-b"]
        );
        assert!(parse_workspaces(" , ").is_empty());
    }

    #[test]
    fn missing_admin_token_is_rejected() {
        let cfg = HarnessConfig {
            admin_token: None,
            ..valid()
        };
        match cfg.validate().unwrap_err() {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("admin_token")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn empty_workspace_list_is_rejected() {
        let cfg = HarnessConfig {
            workspaces: vec![],
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }
}
