//! Built-in provisioning blueprints.
//!
//! A blueprint fixes what one provisioning endpoint builds: which phases run,
//! which ports are opened, which sizes are accepted, and which setup script
//! is staged on the machine.

use crate::config::{BlueprintOverride, SkyforgeConfig};
use crate::staging::{APP_VM_TEMPLATE, PLAIN_VM_TEMPLATE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const BUILTIN_NAMES: &[&str] = &["app-vm", "plain-vm", "search-stack"];

/// States of one orchestrator run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Auth,
    Network,
    Compute,
    Dns,
    Search,
    ScriptDeploy,
    WaitRemote,
    Notify,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Auth => "AUTH",
            Phase::Network => "NETWORK",
            Phase::Compute => "COMPUTE",
            Phase::Dns => "DNS",
            Phase::Search => "SEARCH",
            Phase::ScriptDeploy => "SCRIPT_DEPLOY",
            Phase::WaitRemote => "WAIT_REMOTE",
            Phase::Notify => "NOTIFY",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlueprintKind {
    AppVm,
    PlainVm,
    SearchStack,
}

/// Vector index presets for the search stack.
pub const INDEX_SIZES: &[&str] = &["small", "medium", "large"];

/// Models the search stack can front, with the cognitive account SKU each needs.
pub const SUPPORTED_MODELS: &[(&str, &str)] = &[
    ("gpt-4", "S0"),
    ("gpt-4-32k", "S0"),
    ("gpt-35-turbo", "S0"),
    ("text-embedding-ada-002", "S0"),
    ("dall-e-3", "S0"),
    ("llama-2-7b", "Standard"),
    ("llama-2-70b", "Standard"),
];

pub const VM_SIZES: &[&str] = &[
    "Standard_B2s",
    "Standard_B4ms",
    "Standard_D2s_v3",
    "Standard_D4s_v3",
    "Standard_D8s_v3",
    "Standard_D16s_v3",
    "Standard_DS1_v2",
    "Standard_DS2_v2",
    "Standard_DS3_v2",
    "Standard_DS4_v2",
    "Standard_F2s_v2",
    "Standard_F4s_v2",
    "Standard_F8s_v2",
    "Standard_F16s_v2",
    "Standard_E2s_v3",
    "Standard_E4s_v3",
    "Standard_E8s_v3",
    "Standard_E16s_v3",
];

pub const DEFAULT_VM_PORTS: &[u16] = &[22, 80, 443, 8000, 3000];

pub const UBUNTU_IMAGE: &str = "canonical:ubuntu-24_04-lts:server:latest";

#[derive(Debug, Clone, Serialize)]
pub struct Blueprint {
    pub name: String,
    pub kind: BlueprintKind,
    pub description: String,
    /// JSON key naming the target, e.g. `vm_name`.
    pub target_key: String,
    /// Request field holding the size/tier, e.g. `vm_size`.
    pub size_field: String,
    pub plan: Vec<Phase>,
    pub ports: Vec<u16>,
    pub allowed_sizes: Vec<String>,
    pub default_size: Option<String>,
    pub manages_domain: bool,
    pub image: String,
    #[serde(skip)]
    pub script_template: Option<&'static str>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Blueprint {
    pub fn app_vm() -> Self {
        Self {
            name: "app-vm".into(),
            kind: BlueprintKind::AppVm,
            description: "Ubuntu VM serving an application on <vm_name>.<domain> with TLS".into(),
            target_key: "vm_name".into(),
            size_field: "vm_size".into(),
            plan: vec![
                Phase::Network,
                Phase::Compute,
                Phase::Dns,
                Phase::ScriptDeploy,
                Phase::WaitRemote,
                Phase::Notify,
            ],
            ports: DEFAULT_VM_PORTS.to_vec(),
            allowed_sizes: strings(VM_SIZES),
            default_size: Some("Standard_D2s_v3".into()),
            manages_domain: true,
            image: UBUNTU_IMAGE.into(),
            script_template: Some(APP_VM_TEMPLATE),
        }
    }

    pub fn plain_vm() -> Self {
        Self {
            name: "plain-vm".into(),
            kind: BlueprintKind::PlainVm,
            description: "Ubuntu VM with Docker, reachable on its public address".into(),
            plan: vec![
                Phase::Network,
                Phase::Compute,
                Phase::ScriptDeploy,
                Phase::WaitRemote,
                Phase::Notify,
            ],
            manages_domain: false,
            script_template: Some(PLAIN_VM_TEMPLATE),
            ..Self::app_vm()
        }
    }

    pub fn search_stack() -> Self {
        Self {
            name: "search-stack".into(),
            kind: BlueprintKind::SearchStack,
            description: "Cognitive services account, storage and a vector search index".into(),
            target_key: "deployment_name".into(),
            size_field: "model_type".into(),
            plan: vec![Phase::Search, Phase::Notify],
            ports: Vec::new(),
            allowed_sizes: SUPPORTED_MODELS.iter().map(|(m, _)| m.to_string()).collect(),
            default_size: None,
            manages_domain: false,
            image: String::new(),
            script_template: None,
        }
    }

    pub fn with_override(mut self, over: &BlueprintOverride) -> Self {
        if let Some(ports) = &over.ports {
            self.ports = ports.clone();
        }
        if let Some(sizes) = &over.allowed_sizes {
            self.allowed_sizes = sizes.clone();
        }
        if let Some(size) = &over.default_size {
            self.default_size = Some(size.clone());
        }
        self
    }

    pub fn is_size_allowed(&self, size: &str) -> bool {
        self.allowed_sizes.iter().any(|s| s == size)
    }

    pub fn runs(&self, phase: Phase) -> bool {
        self.plan.contains(&phase)
    }

    /// Message for an unsupported size, listing the allowed values.
    pub fn unsupported_size_message(&self, size: &str) -> String {
        match self.kind {
            BlueprintKind::SearchStack => format!(
                "Unsupported model type '{}'. Supported models: {:?}",
                size, self.allowed_sizes
            ),
            _ => format!(
                "VmSize {} is incompatible. Please select a size from the list: {:?}",
                size, self.allowed_sizes
            ),
        }
    }
}

pub fn model_sku(model: &str) -> Option<&'static str> {
    SUPPORTED_MODELS
        .iter()
        .find(|(m, _)| *m == model)
        .map(|(_, sku)| *sku)
}

/// Blueprints by name, with `[blueprints.*]` overrides applied.
#[derive(Debug, Clone)]
pub struct BlueprintRegistry {
    blueprints: BTreeMap<String, Arc<Blueprint>>,
}

impl Default for BlueprintRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl BlueprintRegistry {
    pub fn builtin() -> Self {
        let mut blueprints = BTreeMap::new();
        for bp in [
            Blueprint::app_vm(),
            Blueprint::plain_vm(),
            Blueprint::search_stack(),
        ] {
            blueprints.insert(bp.name.clone(), Arc::new(bp));
        }
        Self { blueprints }
    }

    pub fn from_config(config: &SkyforgeConfig) -> Self {
        let mut registry = Self::builtin();
        for (name, over) in &config.blueprints {
            if let Some(bp) = registry.blueprints.get_mut(name) {
                *bp = Arc::new(bp.as_ref().clone().with_override(over));
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<Blueprint>> {
        self.blueprints.get(name).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<Blueprint>> {
        self.blueprints.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.blueprints.keys().map(String::as_str).collect()
    }
}
