//! In-memory cloud backend.
//!
//! Implements the whole [`CloudProvider`] contract against a map of records so
//! the service can run end to end without a vendor SDK. Tests use it as a
//! double: every call is logged and faults can be injected per operation.

use super::{
    CloudProvider, Ensured, ExtensionSpec, ProvisioningState, ResourceConfig, ResourceSpec,
    SecurityRule,
};
use crate::credentials::CloudCredentials;
use crate::errors::CloudError;
use async_trait::async_trait;
use skyforge_common::{ResourceHandle, ResourceKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

const SIMULATED_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000003";

/// Name servers every simulated DNS zone reports.
pub const ZONE_NAME_SERVERS: [&str; 4] = [
    "ns1-01.azure-dns.com.",
    "ns2-01.azure-dns.net.",
    "ns3-01.azure-dns.org.",
    "ns4-01.azure-dns.info.",
];

/// One logged provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    VerifyAccess,
    Ensure { kind: ResourceKind, name: String },
    Delete { kind: ResourceKind, name: String },
    ProvisioningState { name: String },
    PublicAddress { name: String },
    ZoneNameServers { zone: String },
    SecurityRules { group: String },
    AddSecurityRules { group: String, count: usize },
    AttachExtension { instance: String, command: String },
}

impl CloudCall {
    /// Calls that change provider state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            CloudCall::Ensure { .. }
                | CloudCall::Delete { .. }
                | CloudCall::AddSecurityRules { .. }
                | CloudCall::AttachExtension { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTarget {
    VerifyAccess,
    Ensure(ResourceKind),
    Delete(ResourceKind),
    AddSecurityRules,
    AttachExtension,
}

/// An injected failure. Fires on every matching call unless limited with
/// [`Fault::times`].
#[derive(Debug, Clone)]
pub struct Fault {
    target: FaultTarget,
    error: CloudError,
    remaining: Option<u32>,
}

impl Fault {
    pub fn new(target: FaultTarget, error: CloudError) -> Self {
        Self {
            target,
            error,
            remaining: None,
        }
    }

    pub fn ensure(kind: ResourceKind, error: CloudError) -> Self {
        Self::new(FaultTarget::Ensure(kind), error)
    }

    pub fn delete(kind: ResourceKind, error: CloudError) -> Self {
        Self::new(FaultTarget::Delete(kind), error)
    }

    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }
}

#[derive(Debug, Clone)]
struct Record {
    handle: ResourceHandle,
    config: ResourceConfig,
    address: Option<String>,
    rules: Vec<SecurityRule>,
    extensions: Vec<ExtensionSpec>,
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<String, Record>,
    calls: Vec<CloudCall>,
    faults: Vec<Fault>,
    provisioning_polls: u32,
    polls_by_resource: HashMap<String, u32>,
    state_polls: u32,
    address_delay: u32,
    withhold_addresses: bool,
    next_address: u32,
}

impl State {
    fn take_fault(&mut self, target: FaultTarget) -> Option<CloudError> {
        let idx = self.faults.iter().position(|f| f.target == target)?;
        let error = self.faults[idx].error.clone();
        match self.faults[idx].remaining {
            Some(n) if n <= 1 => {
                self.faults.remove(idx);
            }
            Some(n) => self.faults[idx].remaining = Some(n - 1),
            None => {}
        }
        Some(error)
    }

    fn require(&self, identifier: &str, what: &str) -> Result<&Record, CloudError> {
        self.records
            .get(identifier)
            .ok_or_else(|| CloudError::Rejected(format!("{} '{}' does not exist", what, identifier)))
    }

    fn record(&self, handle: &ResourceHandle) -> Result<&Record, CloudError> {
        self.records.get(&handle.identifier).ok_or_else(|| not_found(handle))
    }

    fn record_mut(&mut self, handle: &ResourceHandle) -> Result<&mut Record, CloudError> {
        self.records
            .get_mut(&handle.identifier)
            .ok_or_else(|| not_found(handle))
    }
}

fn not_found(handle: &ResourceHandle) -> CloudError {
    CloudError::NotFound {
        kind: handle.kind.to_string(),
        name: handle.name.clone(),
    }
}

/// Simulated control plane. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct MemoryCloud {
    subscription_id: String,
    state: Mutex<State>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self {
            subscription_id: SIMULATED_SUBSCRIPTION.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn identifier(&self, spec: &ResourceSpec) -> String {
        let base = format!(
            "/subscriptions/{}/resourceGroups/{}/providers",
            self.subscription_id, spec.resource_group
        );
        match &spec.config {
            ResourceConfig::Network { .. } => {
                format!("{}/Microsoft.Network/virtualNetworks/{}", base, spec.name)
            }
            ResourceConfig::Subnet { network, .. } => format!(
                "{}/Microsoft.Network/virtualNetworks/{}/subnets/{}",
                base, network, spec.name
            ),
            ResourceConfig::PublicIp => {
                format!("{}/Microsoft.Network/publicIPAddresses/{}", base, spec.name)
            }
            ResourceConfig::SecurityGroup => format!(
                "{}/Microsoft.Network/networkSecurityGroups/{}",
                base, spec.name
            ),
            ResourceConfig::Nic { .. } => {
                format!("{}/Microsoft.Network/networkInterfaces/{}", base, spec.name)
            }
            ResourceConfig::ComputeInstance(_) => {
                format!("{}/Microsoft.Compute/virtualMachines/{}", base, spec.name)
            }
            ResourceConfig::StorageAccount { .. } => {
                format!("{}/Microsoft.Storage/storageAccounts/{}", base, spec.name)
            }
            ResourceConfig::DnsZone => format!("{}/Microsoft.Network/dnsZones/{}", base, spec.name),
            ResourceConfig::DnsRecord { zone, .. } => format!(
                "{}/Microsoft.Network/dnsZones/{}/A/{}",
                base, zone, spec.name
            ),
            ResourceConfig::CognitiveAccount { .. } => format!(
                "{}/Microsoft.CognitiveServices/accounts/{}",
                base, spec.name
            ),
            ResourceConfig::SearchService { .. } => {
                format!("{}/Microsoft.Search/searchServices/{}", base, spec.name)
            }
            ResourceConfig::SearchIndex { service, .. } => format!(
                "{}/Microsoft.Search/searchServices/{}/indexes/{}",
                base, service, spec.name
            ),
        }
    }

    /// Identifier of the resource a spec refers to by name, for dependency checks.
    fn sibling(&self, spec: &ResourceSpec, name: &str, config: ResourceConfig) -> String {
        self.identifier(&ResourceSpec::new(
            name,
            spec.resource_group.clone(),
            spec.location.clone(),
            config,
        ))
    }

    fn check_create(&self, state: &State, spec: &ResourceSpec) -> Result<(), CloudError> {
        match &spec.config {
            ResourceConfig::Subnet { network, .. } => {
                let id = self.sibling(
                    spec,
                    network,
                    ResourceConfig::Network {
                        address_prefix: String::new(),
                    },
                );
                state.require(&id, "virtual network").map(|_| ())
            }
            ResourceConfig::Nic {
                subnet_id,
                public_ip_id,
                security_group_id,
            } => {
                state.require(subnet_id, "subnet")?;
                state.require(public_ip_id, "public IP")?;
                state.require(security_group_id, "network security group")?;
                Ok(())
            }
            ResourceConfig::ComputeInstance(vm) => {
                if vm.size.trim().is_empty() {
                    return Err(CloudError::Rejected("VM size is required".into()));
                }
                state.require(&vm.nic_id, "network interface").map(|_| ())
            }
            ResourceConfig::StorageAccount { .. } => {
                let valid = (3..=24).contains(&spec.name.len())
                    && spec
                        .name
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
                if valid {
                    Ok(())
                } else {
                    Err(CloudError::Rejected(format!(
                        "Storage account name '{}' must be 3-24 lowercase letters or digits",
                        spec.name
                    )))
                }
            }
            ResourceConfig::DnsRecord { zone, .. } => {
                let id = self.sibling(spec, zone, ResourceConfig::DnsZone);
                state.require(&id, "DNS zone").map(|_| ())
            }
            ResourceConfig::SearchIndex { service, .. } => {
                let id = self.sibling(
                    spec,
                    service,
                    ResourceConfig::SearchService { sku: String::new() },
                );
                state.require(&id, "search service").map(|_| ())
            }
            _ => Ok(()),
        }
    }

    /// Give the public IP behind `nic_id` an address, as the provider does when
    /// a VM is attached.
    fn assign_address(state: &mut State, nic_id: &str) {
        if state.withhold_addresses {
            return;
        }
        let ip_id = match state.records.get(nic_id).map(|r| &r.config) {
            Some(ResourceConfig::Nic { public_ip_id, .. }) => public_ip_id.clone(),
            _ => return,
        };
        state.next_address += 1;
        let n = state.next_address;
        let address = format!("20.{}.{}.{}", 50 + (n >> 16) % 200, (n >> 8) & 0xff, n & 0xff);
        if let Some(ip) = state.records.get_mut(&ip_id)
            && ip.address.is_none()
        {
            ip.address = Some(address);
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// A new compute instance reports `Creating` for this many polls.
    pub fn set_provisioning_polls(&self, polls: u32) {
        self.state().provisioning_polls = polls;
    }

    /// Public addresses read as unassigned for this many reads.
    pub fn set_address_delay(&self, reads: u32) {
        self.state().address_delay = reads;
    }

    /// Never assign public addresses.
    pub fn withhold_addresses(&self) {
        self.state().withhold_addresses = true;
    }

    /// Insert a pre-existing resource without logging a call.
    pub fn seed(&self, spec: &ResourceSpec) -> ResourceHandle {
        let handle = ResourceHandle::new(
            spec.kind(),
            self.identifier(spec),
            spec.name.clone(),
            spec.resource_group.clone(),
        );
        self.state().records.insert(
            handle.identifier.clone(),
            Record {
                handle: handle.clone(),
                config: spec.config.clone(),
                address: None,
                rules: Vec::new(),
                extensions: Vec::new(),
            },
        );
        handle
    }

    pub fn seed_rules(&self, group: &ResourceHandle, rules: Vec<SecurityRule>) {
        if let Some(record) = self.state().records.get_mut(&group.identifier) {
            record.rules.extend(rules);
        }
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.state().calls.clone()
    }

    pub fn mutations(&self) -> Vec<CloudCall> {
        self.calls().into_iter().filter(CloudCall::is_mutation).collect()
    }

    pub fn ensure_calls(&self, kind: ResourceKind) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, CloudCall::Ensure { kind: k, .. } if *k == kind))
            .count()
    }

    /// `(kind, name)` of every delete call, in call order.
    pub fn deletes(&self) -> Vec<(ResourceKind, String)> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                CloudCall::Delete { kind, name } => Some((*kind, name.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn exists(&self, handle: &ResourceHandle) -> bool {
        self.state().records.contains_key(&handle.identifier)
    }

    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<ResourceHandle> {
        self.state()
            .records
            .values()
            .find(|r| r.handle.kind == kind && r.handle.name == name)
            .map(|r| r.handle.clone())
    }

    pub fn resource_count(&self) -> usize {
        self.state().records.len()
    }

    pub fn rules(&self, group: &ResourceHandle) -> Vec<SecurityRule> {
        self.state()
            .records
            .get(&group.identifier)
            .map(|r| r.rules.clone())
            .unwrap_or_default()
    }

    pub fn extensions(&self, instance: &ResourceHandle) -> Vec<ExtensionSpec> {
        self.state()
            .records
            .get(&instance.identifier)
            .map(|r| r.extensions.clone())
            .unwrap_or_default()
    }

    pub fn state_polls(&self) -> u32 {
        self.state().state_polls
    }
}

#[async_trait]
impl CloudProvider for MemoryCloud {
    async fn verify_access(&self, credentials: &CloudCredentials) -> Result<(), CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::VerifyAccess);
        if let Some(e) = state.take_fault(FaultTarget::VerifyAccess) {
            return Err(e);
        }
        if credentials.client_secret.is_empty() || credentials.subscription_id.is_empty() {
            return Err(CloudError::Unauthorized("incomplete service principal".into()));
        }
        Ok(())
    }

    async fn ensure(&self, spec: &ResourceSpec) -> Result<Ensured, CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::Ensure {
            kind: spec.kind(),
            name: spec.name.clone(),
        });
        if let Some(e) = state.take_fault(FaultTarget::Ensure(spec.kind())) {
            return Err(e);
        }

        let identifier = self.identifier(spec);
        if let Some(existing) = state.records.get(&identifier) {
            return Ok(Ensured::Found(existing.handle.clone()));
        }

        self.check_create(&state, spec)?;
        let handle = ResourceHandle::new(
            spec.kind(),
            identifier.clone(),
            spec.name.clone(),
            spec.resource_group.clone(),
        );
        state.records.insert(
            identifier,
            Record {
                handle: handle.clone(),
                config: spec.config.clone(),
                address: None,
                rules: Vec::new(),
                extensions: Vec::new(),
            },
        );
        if let ResourceConfig::ComputeInstance(vm) = &spec.config {
            Self::assign_address(&mut state, &vm.nic_id);
        }
        Ok(Ensured::Created(handle))
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::Delete {
            kind: handle.kind,
            name: handle.name.clone(),
        });
        if let Some(e) = state.take_fault(FaultTarget::Delete(handle.kind)) {
            return Err(e);
        }
        if state.records.remove(&handle.identifier).is_none() {
            return Err(not_found(handle));
        }
        // Children (subnets, record sets, indexes) go with their parent.
        let prefix = format!("{}/", handle.identifier);
        state.records.retain(|id, _| !id.starts_with(&prefix));
        Ok(())
    }

    async fn provisioning_state(
        &self,
        handle: &ResourceHandle,
    ) -> Result<ProvisioningState, CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::ProvisioningState {
            name: handle.name.clone(),
        });
        state.state_polls += 1;
        state.record(handle)?;
        let limit = state.provisioning_polls;
        let polls = state
            .polls_by_resource
            .entry(handle.identifier.clone())
            .or_insert(0);
        *polls += 1;
        if *polls <= limit {
            Ok(ProvisioningState::Creating)
        } else {
            Ok(ProvisioningState::Succeeded)
        }
    }

    async fn public_address(
        &self,
        public_ip: &ResourceHandle,
    ) -> Result<Option<String>, CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::PublicAddress {
            name: public_ip.name.clone(),
        });
        let address = state.record(public_ip)?.address.clone();
        if state.address_delay > 0 {
            state.address_delay -= 1;
            return Ok(None);
        }
        Ok(address)
    }

    async fn zone_name_servers(&self, zone: &ResourceHandle) -> Result<Vec<String>, CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::ZoneNameServers {
            zone: zone.name.clone(),
        });
        state.record(zone)?;
        Ok(ZONE_NAME_SERVERS.iter().map(|s| s.to_string()).collect())
    }

    async fn security_rules(&self, group: &ResourceHandle) -> Result<Vec<SecurityRule>, CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::SecurityRules {
            group: group.name.clone(),
        });
        Ok(state.record(group)?.rules.clone())
    }

    async fn add_security_rules(
        &self,
        group: &ResourceHandle,
        rules: &[SecurityRule],
    ) -> Result<(), CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::AddSecurityRules {
            group: group.name.clone(),
            count: rules.len(),
        });
        if let Some(e) = state.take_fault(FaultTarget::AddSecurityRules) {
            return Err(e);
        }
        let record = state.record_mut(group)?;
        for rule in rules {
            if record
                .rules
                .iter()
                .any(|r| r.direction == rule.direction && r.priority == rule.priority)
            {
                return Err(CloudError::Rejected(format!(
                    "Priority {} is already used by another rule",
                    rule.priority
                )));
            }
            record.rules.push(rule.clone());
        }
        Ok(())
    }

    async fn attach_extension(
        &self,
        instance: &ResourceHandle,
        extension: &ExtensionSpec,
    ) -> Result<(), CloudError> {
        let mut state = self.state();
        state.calls.push(CloudCall::AttachExtension {
            instance: instance.name.clone(),
            command: extension.command.clone(),
        });
        if let Some(e) = state.take_fault(FaultTarget::AttachExtension) {
            return Err(e);
        }
        state.record_mut(instance)?.extensions.push(extension.clone());
        Ok(())
    }
}
