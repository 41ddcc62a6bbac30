//! Permission model: verbs, MLflow resource kinds, and the RBAC rules they map to
//!
//! A [`Capability`] is what a scenario asks for ("get and list on
//! experiments"). [`rules_for`] turns it into the smallest set of
//! `PolicyRule`s that grants exactly that: one rule for the main resources and,
//! when needed, one rule for gateway `*/use` sub-resources. [`bootstrap_rules`]
//! is the fixed pair every identity gets regardless of capability.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::rbac::v1::PolicyRule;
use mlflow_rbac_common::{Error, MLFLOW_API_GROUP, RBAC_API_GROUP};
use serde::{Deserialize, Serialize};

// =============================================================================
// Verbs
// =============================================================================

/// Kubernetes RBAC verb
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KubeVerb {
    /// Read a single object
    Get,
    /// List objects
    List,
    /// Create objects (also "use" on sub-resources)
    Create,
    /// Modify objects
    Update,
    /// Delete objects
    Delete,
}

impl KubeVerb {
    /// Every verb in canonical order
    pub const ALL: [KubeVerb; 5] = [
        KubeVerb::Get,
        KubeVerb::List,
        KubeVerb::Create,
        KubeVerb::Update,
        KubeVerb::Delete,
    ];

    /// The verb as it appears in a PolicyRule
    pub fn as_str(&self) -> &'static str {
        match self {
            KubeVerb::Get => "get",
            KubeVerb::List => "list",
            KubeVerb::Create => "create",
            KubeVerb::Update => "update",
            KubeVerb::Delete => "delete",
        }
    }
}

impl fmt::Display for KubeVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KubeVerb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KubeVerb::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| Error::validation_for_field("verb", format!("unknown verb '{}'", s)))
    }
}

// =============================================================================
// Resource kinds
// =============================================================================

/// MLflow resource kind served under the `mlflow.kubeflow.org` API group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Experiments (and the runs inside them)
    Experiments,
    /// Model registry entries
    RegisteredModels,
    /// Jobs
    Jobs,
    /// Datasets
    Datasets,
    /// Gateway secrets
    GatewaySecrets,
    /// Gateway endpoints
    GatewayEndpoints,
    /// Gateway model definitions
    GatewayModelDefinitions,
}

impl ResourceKind {
    /// Every kind in canonical order
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Experiments,
        ResourceKind::RegisteredModels,
        ResourceKind::Jobs,
        ResourceKind::Datasets,
        ResourceKind::GatewaySecrets,
        ResourceKind::GatewayEndpoints,
        ResourceKind::GatewayModelDefinitions,
    ];

    /// Resource name used in RBAC rules and access reviews
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Experiments => "experiments",
            ResourceKind::RegisteredModels => "registeredmodels",
            ResourceKind::Jobs => "jobs",
            ResourceKind::Datasets => "datasets",
            ResourceKind::GatewaySecrets => "gatewaysecrets",
            ResourceKind::GatewayEndpoints => "gatewayendpoints",
            ResourceKind::GatewayModelDefinitions => "gatewaymodeldefinitions",
        }
    }

    /// Sub-resources that need their own `create`-only rule
    pub fn subresources(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::GatewaySecrets => &["gatewaysecrets/use"],
            ResourceKind::GatewayEndpoints => &["gatewayendpoints/use"],
            ResourceKind::GatewayModelDefinitions => &["gatewaymodeldefinitions/use"],
            _ => &[],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| {
                Error::validation_for_field("resource", format!("unknown resource kind '{}'", s))
            })
    }
}

// =============================================================================
// Role presets
// =============================================================================

/// Named verb bundles used by the scenario tables
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserRole {
    /// get, list
    Read,
    /// full CRUD
    Edit,
    /// create only; "use" on gateway resources
    Use,
    /// full CRUD
    Manage,
}

impl UserRole {
    /// Verbs granted on main resources
    pub fn verbs(&self) -> Vec<KubeVerb> {
        match self {
            UserRole::Read => vec![KubeVerb::Get, KubeVerb::List],
            UserRole::Use => vec![KubeVerb::Create],
            UserRole::Edit | UserRole::Manage => KubeVerb::ALL.to_vec(),
        }
    }
}

// =============================================================================
// Capability
// =============================================================================

/// Verbs × resource kinds × optional explicit sub-resources for one identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capability {
    /// Verbs on the main resources
    pub verbs: Vec<KubeVerb>,
    /// Resource kinds the verbs apply to
    pub resources: Vec<ResourceKind>,
    /// Explicit sub-resources. `None` enables auto-detection, `Some(vec![])` disables it.
    pub subresources: Option<Vec<String>>,
}

impl Capability {
    /// Capability with auto-detected sub-resources
    pub fn new(verbs: impl Into<Vec<KubeVerb>>, resources: impl Into<Vec<ResourceKind>>) -> Self {
        Self {
            verbs: verbs.into(),
            resources: resources.into(),
            subresources: None,
        }
    }

    /// Capability from a role preset
    pub fn for_role(role: UserRole, resources: impl Into<Vec<ResourceKind>>) -> Self {
        Self::new(role.verbs(), resources)
    }

    /// Replace auto-detection with an explicit sub-resource list
    pub fn with_subresources(mut self, subresources: Vec<String>) -> Self {
        self.subresources = Some(subresources);
        self
    }

    /// Rules granting this capability (without the bootstrap pair)
    pub fn rules(&self) -> Vec<PolicyRule> {
        rules_for(&self.verbs, &self.resources, self.subresources.as_deref())
    }

    /// Whether the capability grants `verb`
    pub fn grants(&self, verb: KubeVerb) -> bool {
        self.verbs.contains(&verb)
    }

    /// Verb to prove enforcement with: delete if granted, otherwise the first
    /// granted verb in canonical order.
    pub fn verification_verb(&self) -> Option<KubeVerb> {
        if self.grants(KubeVerb::Delete) {
            return Some(KubeVerb::Delete);
        }
        KubeVerb::ALL.into_iter().find(|v| self.grants(*v))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verbs: Vec<_> = self.verbs.iter().map(KubeVerb::as_str).collect();
        let resources: Vec<_> = self.resources.iter().map(ResourceKind::as_str).collect();
        write!(f, "[{}] on [{}]", verbs.join(","), resources.join(","))?;
        if let Some(subs) = &self.subresources {
            write!(f, " subresources [{}]", subs.join(","))?;
        }
        Ok(())
    }
}

// =============================================================================
// Rule construction
// =============================================================================

fn rule(api_group: &str, resources: Vec<String>, verbs: Vec<String>) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources),
        verbs,
        ..Default::default()
    }
}

fn dedup<T: PartialEq + Copy>(items: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(*item);
        }
    }
    out
}

/// Build the MLflow rules for a capability.
///
/// Emits the main-resource rule when both `verbs` and `resources` are
/// non-empty; the API server rejects a rule with no verbs. Emits a
/// `create`-only sub-resource rule when explicit names are given, or, when
/// `subresources` is `None`, when `verbs` includes create and a requested kind
/// declares sub-resources.
pub fn rules_for(
    verbs: &[KubeVerb],
    resources: &[ResourceKind],
    subresources: Option<&[String]>,
) -> Vec<PolicyRule> {
    let verbs = dedup(verbs);
    let resources = dedup(resources);
    let mut rules = Vec::with_capacity(2);

    if !verbs.is_empty() && !resources.is_empty() {
        rules.push(rule(
            MLFLOW_API_GROUP,
            resources.iter().map(|r| r.as_str().to_string()).collect(),
            verbs.iter().map(|v| v.as_str().to_string()).collect(),
        ));
    }

    let subs: Vec<String> = match subresources {
        Some(explicit) => {
            let mut names: Vec<String> = Vec::with_capacity(explicit.len());
            for name in explicit {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            names
        }
        None if verbs.contains(&KubeVerb::Create) => resources
            .iter()
            .flat_map(|r| r.subresources().iter().map(|s| s.to_string()))
            .collect(),
        None => Vec::new(),
    };

    if !subs.is_empty() {
        rules.push(rule(
            MLFLOW_API_GROUP,
            subs,
            vec![KubeVerb::Create.as_str().to_string()],
        ));
    }

    rules
}

/// Rules every identity receives: read on the core objects it needs to
/// authenticate, and read on the RBAC objects that govern it.
pub fn bootstrap_rules() -> Vec<PolicyRule> {
    let read = || vec!["get".to_string(), "list".to_string()];
    vec![
        rule(
            "",
            vec![
                "namespaces".to_string(),
                "serviceaccounts".to_string(),
                "secrets".to_string(),
            ],
            read(),
        ),
        rule(
            RBAC_API_GROUP,
            vec!["roles".to_string(), "rolebindings".to_string()],
            read(),
        ),
    ]
}
