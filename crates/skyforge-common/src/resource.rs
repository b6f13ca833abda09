use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The cloud primitives an orchestrator run can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnet,
    PublicIp,
    SecurityGroup,
    Nic,
    ComputeInstance,
    StorageAccount,
    DnsZone,
    DnsRecord,
    SearchService,
    CognitiveAccount,
    SearchIndex,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::PublicIp => "public_ip",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::Nic => "nic",
            ResourceKind::ComputeInstance => "compute_instance",
            ResourceKind::StorageAccount => "storage_account",
            ResourceKind::DnsZone => "dns_zone",
            ResourceKind::DnsRecord => "dns_record",
            ResourceKind::SearchService => "search_service",
            ResourceKind::CognitiveAccount => "cognitive_account",
            ResourceKind::SearchIndex => "search_index",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a cloud resource, sufficient to delete it later.
///
/// `identifier` is the provider-assigned id; `name` and `resource_group` are
/// the caller-chosen coordinates the resource was ensured under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub identifier: String,
    pub name: String,
    pub resource_group: String,
    pub created_at: DateTime<Utc>,
}

impl ResourceHandle {
    pub fn new(
        kind: ResourceKind,
        identifier: impl Into<String>,
        name: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            name: name.into(),
            resource_group: resource_group.into(),
            created_at: Utc::now(),
        }
    }

    /// True when both handles point at the same resource, ignoring timestamps.
    pub fn same_resource(&self, other: &ResourceHandle) -> bool {
        self.kind == other.kind && self.identifier == other.identifier
    }
}
