//! Rules command - show the Role a capability would be granted with
//!
//! Prints the capability rules followed by the bootstrap rules, exactly as the
//! provisioner writes them, so a grant can be reviewed or applied by hand.

use clap::{Args, ValueEnum};

use mlflow_rbac_harness::permission::{bootstrap_rules, Capability, KubeVerb, ResourceKind, UserRole};

/// Role preset, as an alternative to listing verbs
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RolePreset {
    Read,
    Edit,
    Use,
    Manage,
}

impl From<RolePreset> for UserRole {
    fn from(p: RolePreset) -> Self {
        match p {
            RolePreset::Read => UserRole::Read,
            RolePreset::Edit => UserRole::Edit,
            RolePreset::Use => UserRole::Use,
            RolePreset::Manage => UserRole::Manage,
        }
    }
}

/// Rules command arguments
#[derive(Args, Debug)]
pub struct RulesArgs {
    /// Comma-separated verbs (get,list,create,update,delete)
    #[arg(long, value_delimiter = ',', required_unless_present = "role", conflicts_with = "role")]
    pub verbs: Vec<KubeVerb>,

    /// Role preset instead of explicit verbs
    #[arg(long, value_enum)]
    pub role: Option<RolePreset>,

    /// Comma-separated resource kinds
    #[arg(long, value_delimiter = ',', required = true)]
    pub resources: Vec<ResourceKind>,

    /// Explicit sub-resources; disables auto-detection
    #[arg(long, value_delimiter = ',', conflicts_with = "no_subresources")]
    pub subresources: Option<Vec<String>>,

    /// Grant no sub-resources at all
    #[arg(long)]
    pub no_subresources: bool,

    /// Omit the bootstrap rules
    #[arg(long)]
    pub without_bootstrap: bool,
}

fn capability(args: &RulesArgs) -> Capability {
    let cap = match args.role {
        Some(role) => Capability::for_role(role.into(), args.resources.clone()),
        None => Capability::new(args.verbs.clone(), args.resources.clone()),
    };
    match (&args.subresources, args.no_subresources) {
        (Some(explicit), _) => cap.with_subresources(explicit.clone()),
        (None, true) => cap.with_subresources(Vec::new()),
        (None, false) => cap,
    }
}

/// Print the rules as pretty JSON
pub fn run(args: RulesArgs) -> anyhow::Result<()> {
    let cap = capability(&args);
    let mut rules = cap.rules();
    if !args.without_bootstrap {
        rules.extend(bootstrap_rules());
    }
    println!("{}", serde_json::to_string_pretty(&rules)?);
    Ok(())
}
