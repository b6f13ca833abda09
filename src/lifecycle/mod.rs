//! Resource lifecycle: idempotent ensure, best-effort delete.
//!
//! [`CloudProvider`] is the control-plane seam. [`ResourceLifecycle`] wraps a
//! provider with the retry policy, the compute readiness wait and the
//! security-rule planner, and is what the orchestrator talks to.

pub mod memory;
pub mod nsg;
pub mod retry;

pub use memory::{CloudCall, MemoryCloud};
pub use nsg::SecurityRule;
pub use retry::RetryPolicy;

use crate::config::Timings;
use crate::credentials::CloudCredentials;
use crate::errors::CloudError;
use async_trait::async_trait;
use serde::Serialize;
use skyforge_common::{ResourceHandle, ResourceKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters for a new compute instance.
#[derive(Clone, PartialEq, Eq)]
pub struct ComputeConfig {
    pub size: String,
    pub nic_id: String,
    pub admin_username: String,
    pub admin_password: String,
    pub os_disk_gb: u32,
    pub image: String,
}

impl std::fmt::Debug for ComputeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeConfig")
            .field("size", &self.size)
            .field("nic_id", &self.nic_id)
            .field("admin_username", &self.admin_username)
            .field("os_disk_gb", &self.os_disk_gb)
            .field("image", &self.image)
            .finish_non_exhaustive()
    }
}

/// Kind-specific creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceConfig {
    Network { address_prefix: String },
    Subnet { network: String, address_prefix: String },
    PublicIp,
    SecurityGroup,
    Nic {
        subnet_id: String,
        public_ip_id: String,
        security_group_id: String,
    },
    ComputeInstance(ComputeConfig),
    StorageAccount { sku: String },
    DnsZone,
    /// An A record `name` inside `zone`.
    DnsRecord { zone: String, ipv4: String, ttl: u32 },
    CognitiveAccount { sku: String },
    SearchService { sku: String },
    SearchIndex { service: String, fields: Vec<String> },
}

impl ResourceConfig {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceConfig::Network { .. } => ResourceKind::Network,
            ResourceConfig::Subnet { .. } => ResourceKind::Subnet,
            ResourceConfig::PublicIp => ResourceKind::PublicIp,
            ResourceConfig::SecurityGroup => ResourceKind::SecurityGroup,
            ResourceConfig::Nic { .. } => ResourceKind::Nic,
            ResourceConfig::ComputeInstance(_) => ResourceKind::ComputeInstance,
            ResourceConfig::StorageAccount { .. } => ResourceKind::StorageAccount,
            ResourceConfig::DnsZone => ResourceKind::DnsZone,
            ResourceConfig::DnsRecord { .. } => ResourceKind::DnsRecord,
            ResourceConfig::CognitiveAccount { .. } => ResourceKind::CognitiveAccount,
            ResourceConfig::SearchService { .. } => ResourceKind::SearchService,
            ResourceConfig::SearchIndex { .. } => ResourceKind::SearchIndex,
        }
    }
}

/// What to ensure and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub config: ResourceConfig,
}

impl ResourceSpec {
    pub fn new(
        name: impl Into<String>,
        resource_group: impl Into<String>,
        location: impl Into<String>,
        config: ResourceConfig,
    ) -> Self {
        Self {
            name: name.into(),
            resource_group: resource_group.into(),
            location: location.into(),
            config,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.config.kind()
    }
}

/// Result of an ensure call: the resource was already there, or this call made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured {
    Found(ResourceHandle),
    Created(ResourceHandle),
}

impl Ensured {
    pub fn handle(&self) -> &ResourceHandle {
        match self {
            Ensured::Found(h) | Ensured::Created(h) => h,
        }
    }

    pub fn into_handle(self) -> ResourceHandle {
        match self {
            Ensured::Found(h) | Ensured::Created(h) => h,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Creating,
    Succeeded,
    Failed(String),
}

/// A "download these files and run this command" extension for a compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionSpec {
    pub name: String,
    pub publisher: String,
    pub file_uris: Vec<String>,
    pub command: String,
}

impl ExtensionSpec {
    /// Custom-script extension that fetches `url` and runs it with bash.
    pub fn run_script(url: &str, object_name: &str) -> Self {
        Self {
            name: "customScriptExtension".into(),
            publisher: "Microsoft.Azure.Extensions".into(),
            file_uris: vec![url.to_string()],
            command: format!("bash {}", object_name),
        }
    }
}

/// Cloud control plane.
///
/// `ensure` must be idempotent on `(kind, resource_group, name)`. `delete` of
/// something that does not exist returns `CloudError::NotFound`.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn verify_access(&self, credentials: &CloudCredentials) -> Result<(), CloudError>;

    async fn ensure(&self, spec: &ResourceSpec) -> Result<Ensured, CloudError>;

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), CloudError>;

    async fn provisioning_state(
        &self,
        handle: &ResourceHandle,
    ) -> Result<ProvisioningState, CloudError>;

    /// Address currently assigned to a public IP resource, if any.
    async fn public_address(&self, public_ip: &ResourceHandle)
    -> Result<Option<String>, CloudError>;

    async fn zone_name_servers(&self, zone: &ResourceHandle) -> Result<Vec<String>, CloudError>;

    async fn security_rules(&self, group: &ResourceHandle) -> Result<Vec<SecurityRule>, CloudError>;

    async fn add_security_rules(
        &self,
        group: &ResourceHandle,
        rules: &[SecurityRule],
    ) -> Result<(), CloudError>;

    async fn attach_extension(
        &self,
        instance: &ResourceHandle,
        extension: &ExtensionSpec,
    ) -> Result<(), CloudError>;
}

/// What a best-effort delete did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
    Failed(String),
}

impl DeleteOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DeleteOutcome::Failed(_))
    }
}

/// Provider calls with retry, readiness waiting and NSG planning layered on.
#[derive(Clone)]
pub struct ResourceLifecycle {
    provider: Arc<dyn CloudProvider>,
    retry: RetryPolicy,
    ready_timeout: Duration,
    ready_poll: Duration,
}

impl ResourceLifecycle {
    pub fn new(provider: Arc<dyn CloudProvider>, timings: &Timings) -> Self {
        Self {
            provider,
            retry: RetryPolicy::new(timings.resource_attempts, timings.resource_backoff),
            ready_timeout: timings.compute_ready_timeout,
            ready_poll: timings.resource_backoff.max(Duration::from_millis(10)),
        }
    }

    pub fn provider(&self) -> &Arc<dyn CloudProvider> {
        &self.provider
    }

    pub async fn verify_access(&self, credentials: &CloudCredentials) -> Result<(), CloudError> {
        self.retry
            .run("verify access", || self.provider.verify_access(credentials))
            .await
    }

    /// Create-or-get. A compute instance is only returned once it reports
    /// provisioned.
    pub async fn ensure(&self, spec: &ResourceSpec) -> Result<Ensured, CloudError> {
        let ensured = self.create_or_get(spec).await?;
        self.wait_ready(&ensured).await?;
        Ok(ensured)
    }

    /// Create-or-get without the readiness wait. The resource exists once
    /// this returns `Ok`, so callers can record it before [`Self::wait_ready`].
    pub async fn create_or_get(&self, spec: &ResourceSpec) -> Result<Ensured, CloudError> {
        let operation = format!("ensure {} {}", spec.kind(), spec.name);
        let ensured = self
            .retry
            .run(&operation, || self.provider.ensure(spec))
            .await?;

        match &ensured {
            Ensured::Found(h) => debug!(kind = %h.kind, name = %h.name, "Resource already exists"),
            Ensured::Created(h) => info!(kind = %h.kind, name = %h.name, "Resource created"),
        }
        Ok(ensured)
    }

    /// Wait until a compute instance reports provisioned. Other kinds are
    /// ready as soon as they exist.
    pub async fn wait_ready(&self, ensured: &Ensured) -> Result<(), CloudError> {
        let handle = ensured.handle();
        if handle.kind != ResourceKind::ComputeInstance {
            return Ok(());
        }
        self.wait_provisioned(handle).await
    }

    async fn wait_provisioned(&self, handle: &ResourceHandle) -> Result<(), CloudError> {
        tokio::time::timeout(self.ready_timeout, self.poll_until_provisioned(handle))
            .await
            .unwrap_or_else(|_| {
                Err(CloudError::Transient(format!(
                    "{} '{}' not provisioned after {}s",
                    handle.kind,
                    handle.name,
                    self.ready_timeout.as_secs()
                )))
            })
    }

    async fn poll_until_provisioned(&self, handle: &ResourceHandle) -> Result<(), CloudError> {
        loop {
            let state = self
                .retry
                .run("poll provisioning state", || {
                    self.provider.provisioning_state(handle)
                })
                .await?;
            match state {
                ProvisioningState::Succeeded => return Ok(()),
                ProvisioningState::Failed(reason) => {
                    return Err(CloudError::Rejected(format!(
                        "{} '{}' failed to provision: {}",
                        handle.kind, handle.name, reason
                    )));
                }
                ProvisioningState::Creating => tokio::time::sleep(self.ready_poll).await,
            }
        }
    }

    /// Delete `handle`. Never fails: a missing resource counts as gone and any
    /// other error is logged and reported in the outcome.
    pub async fn delete(&self, handle: &ResourceHandle) -> DeleteOutcome {
        let operation = format!("delete {} {}", handle.kind, handle.name);
        match self
            .retry
            .run(&operation, || self.provider.delete(handle))
            .await
        {
            Ok(()) => {
                info!(kind = %handle.kind, name = %handle.name, "Deleted resource");
                DeleteOutcome::Deleted
            }
            Err(e) if e.is_not_found() => {
                debug!(kind = %handle.kind, name = %handle.name, "Resource already gone");
                DeleteOutcome::AlreadyGone
            }
            Err(e) => {
                warn!(kind = %handle.kind, name = %handle.name, error = %e, "Failed to delete resource");
                DeleteOutcome::Failed(e.to_string())
            }
        }
    }

    /// Make sure every port in `ports` has an allow rule, assigning priorities
    /// without collisions. Returns the rules that were added.
    pub async fn open_ports(
        &self,
        group: &ResourceHandle,
        ports: &[u16],
    ) -> Result<Vec<SecurityRule>, CloudError> {
        let existing = self
            .retry
            .run("list security rules", || self.provider.security_rules(group))
            .await?;
        let planned = nsg::plan_port_rules(&existing, ports)
            .map_err(|e| CloudError::Rejected(e.to_string()))?;
        if planned.is_empty() {
            return Ok(planned);
        }
        self.retry
            .run("add security rules", || {
                self.provider.add_security_rules(group, &planned)
            })
            .await?;
        Ok(planned)
    }

    pub async fn public_address(
        &self,
        public_ip: &ResourceHandle,
    ) -> Result<Option<String>, CloudError> {
        self.retry
            .run("read public address", || self.provider.public_address(public_ip))
            .await
    }

    pub async fn zone_name_servers(&self, zone: &ResourceHandle) -> Result<Vec<String>, CloudError> {
        self.retry
            .run("read zone name servers", || self.provider.zone_name_servers(zone))
            .await
    }

    pub async fn attach_extension(
        &self,
        instance: &ResourceHandle,
        extension: &ExtensionSpec,
    ) -> Result<(), CloudError> {
        self.retry
            .run("attach extension", || {
                self.provider.attach_extension(instance, extension)
            })
            .await
    }
}
