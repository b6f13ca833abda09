//! Service configuration read from `skyforge.toml`.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 7071
//!
//! [timing]
//! webhook_attempts = 3
//! vm_settle_secs = 30
//! delegation_attempts = 5
//!
//! [staging]
//! container = "vm-startup-scripts"
//! url_ttl_hours = 2
//!
//! [notify]
//! mode = "smtp"
//!
//! [dns]
//! resolver = "doh"
//!
//! [blueprints.app-vm]
//! ports = [22, 80, 443]
//! default_size = "Standard_B2s"
//! ```
//!
//! Every section is optional; a missing file yields the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "skyforge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7071
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Retry counts, delays and timeouts used by a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    #[serde(default = "default_three")]
    pub webhook_attempts: u32,
    #[serde(default = "default_two")]
    pub webhook_backoff_secs: u64,
    #[serde(default = "default_three")]
    pub resource_attempts: u32,
    #[serde(default = "default_two")]
    pub resource_backoff_secs: u64,
    #[serde(default = "default_thirty")]
    pub vm_settle_secs: u64,
    #[serde(default = "default_five")]
    pub address_poll_attempts: u32,
    #[serde(default = "default_dns_zone_settle_secs")]
    pub dns_zone_settle_secs: u64,
    #[serde(default = "default_five")]
    pub delegation_attempts: u32,
    #[serde(default = "default_delegation_delay_secs")]
    pub delegation_delay_secs: u64,
    #[serde(default = "default_extension_timeout_secs")]
    pub extension_timeout_secs: u64,
    #[serde(default = "default_thirty")]
    pub remote_settle_secs: u64,
    #[serde(default = "default_extension_timeout_secs")]
    pub compute_ready_timeout_secs: u64,
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

fn default_two() -> u64 {
    2
}

fn default_three() -> u32 {
    3
}

fn default_five() -> u32 {
    5
}

fn default_thirty() -> u64 {
    30
}

fn default_dns_zone_settle_secs() -> u64 {
    5
}

fn default_delegation_delay_secs() -> u64 {
    10
}

fn default_extension_timeout_secs() -> u64 {
    600
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            webhook_timeout_secs: default_webhook_timeout_secs(),
            webhook_attempts: default_three(),
            webhook_backoff_secs: default_two(),
            resource_attempts: default_three(),
            resource_backoff_secs: default_two(),
            vm_settle_secs: default_thirty(),
            address_poll_attempts: default_five(),
            dns_zone_settle_secs: default_dns_zone_settle_secs(),
            delegation_attempts: default_five(),
            delegation_delay_secs: default_delegation_delay_secs(),
            extension_timeout_secs: default_extension_timeout_secs(),
            remote_settle_secs: default_thirty(),
            compute_ready_timeout_secs: default_extension_timeout_secs(),
        }
    }
}

impl TimingSection {
    pub fn to_timings(&self) -> Timings {
        Timings {
            webhook_timeout: Duration::from_secs(self.webhook_timeout_secs),
            webhook_attempts: self.webhook_attempts.max(1),
            webhook_backoff: Duration::from_secs(self.webhook_backoff_secs),
            resource_attempts: self.resource_attempts.max(1),
            resource_backoff: Duration::from_secs(self.resource_backoff_secs),
            vm_settle: Duration::from_secs(self.vm_settle_secs),
            address_poll_attempts: self.address_poll_attempts.max(1),
            dns_zone_settle: Duration::from_secs(self.dns_zone_settle_secs),
            delegation_attempts: self.delegation_attempts.max(1),
            delegation_delay: Duration::from_secs(self.delegation_delay_secs),
            extension_timeout: Duration::from_secs(self.extension_timeout_secs),
            remote_settle: Duration::from_secs(self.remote_settle_secs),
            compute_ready_timeout: Duration::from_secs(self.compute_ready_timeout_secs),
        }
    }
}

/// Resolved timings handed to the runtime components.
///
/// Attempt counts are clamped to at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub webhook_timeout: Duration,
    pub webhook_attempts: u32,
    pub webhook_backoff: Duration,
    pub resource_attempts: u32,
    pub resource_backoff: Duration,
    pub vm_settle: Duration,
    pub address_poll_attempts: u32,
    pub dns_zone_settle: Duration,
    pub delegation_attempts: u32,
    pub delegation_delay: Duration,
    pub extension_timeout: Duration,
    pub remote_settle: Duration,
    pub compute_ready_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        TimingSection::default().to_timings()
    }
}

impl Timings {
    /// Same attempt counts as the defaults but without any waiting.
    /// Used by the simulated backend and by tests.
    pub fn immediate() -> Self {
        Self {
            webhook_timeout: Duration::from_secs(5),
            webhook_backoff: Duration::ZERO,
            resource_backoff: Duration::ZERO,
            vm_settle: Duration::ZERO,
            dns_zone_settle: Duration::ZERO,
            delegation_delay: Duration::ZERO,
            extension_timeout: Duration::from_secs(5),
            remote_settle: Duration::ZERO,
            compute_ready_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingSection {
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_url_ttl_hours")]
    pub url_ttl_hours: u64,
}

fn default_container() -> String {
    "vm-startup-scripts".to_string()
}

fn default_url_ttl_hours() -> u64 {
    2
}

impl Default for StagingSection {
    fn default() -> Self {
        Self {
            container: default_container(),
            url_ttl_hours: default_url_ttl_hours(),
        }
    }
}

impl StagingSection {
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_hours * 3600)
    }
}

/// Names of the environment variables carrying cloud credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsSection {
    #[serde(default = "default_client_id_env")]
    pub client_id_env: String,
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "default_tenant_id_env")]
    pub tenant_id_env: String,
    #[serde(default = "default_subscription_id_env")]
    pub subscription_id_env: String,
}

fn default_client_id_env() -> String {
    "AZURE_APP_CLIENT_ID".to_string()
}

fn default_client_secret_env() -> String {
    "AZURE_APP_CLIENT_SECRET".to_string()
}

fn default_tenant_id_env() -> String {
    "AZURE_APP_TENANT_ID".to_string()
}

fn default_subscription_id_env() -> String {
    "AZURE_SUBSCRIPTION_ID".to_string()
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            client_id_env: default_client_id_env(),
            client_secret_env: default_client_secret_env(),
            tenant_id_env: default_tenant_id_env(),
            subscription_id_env: default_subscription_id_env(),
        }
    }
}

/// Where completion notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    /// Write the notification to the log only
    #[default]
    Log,
    /// Send through the SMTP relay described by the `SMTP_*` variables
    Smtp,
}

impl std::fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyMode::Log => write!(f, "log"),
            NotifyMode::Smtp => write!(f, "smtp"),
        }
    }
}

impl std::str::FromStr for NotifyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" => Ok(NotifyMode::Log),
            "smtp" => Ok(NotifyMode::Smtp),
            _ => anyhow::bail!("Invalid notify mode '{}'. Valid values: log, smtp", s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifySection {
    #[serde(default)]
    pub mode: NotifyMode,
}

/// How public name servers are looked up for the delegation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverMode {
    /// Answer with the simulated backend's zone name servers
    #[default]
    Simulated,
    /// Query a DNS-over-HTTPS JSON endpoint
    Doh,
}

impl std::fmt::Display for ResolverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolverMode::Simulated => write!(f, "simulated"),
            ResolverMode::Doh => write!(f, "doh"),
        }
    }
}

impl std::str::FromStr for ResolverMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulated" => Ok(ResolverMode::Simulated),
            "doh" => Ok(ResolverMode::Doh),
            _ => anyhow::bail!("Invalid resolver '{}'. Valid values: simulated, doh", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsSection {
    #[serde(default)]
    pub resolver: ResolverMode,
    #[serde(default = "default_doh_endpoint")]
    pub doh_endpoint: String,
}

fn default_doh_endpoint() -> String {
    crate::dns::DEFAULT_DOH_ENDPOINT.to_string()
}

impl Default for DnsSection {
    fn default() -> Self {
        Self {
            resolver: ResolverMode::default(),
            doh_endpoint: default_doh_endpoint(),
        }
    }
}

/// Per-blueprint overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlueprintOverride {
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
    #[serde(default)]
    pub allowed_sizes: Option<Vec<String>>,
    #[serde(default)]
    pub default_size: Option<String>,
}

/// Root of `skyforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkyforgeConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub staging: StagingSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub dns: DnsSection,
    #[serde(default)]
    pub blueprints: BTreeMap<String, BlueprintOverride>,
}

impl SkyforgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse skyforge.toml")
    }

    /// Load from `path`, or the defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize skyforge.toml")
    }

    pub fn timings(&self) -> Timings {
        self.timing.to_timings()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let t = &self.timing;

        for (name, value) in [
            ("webhook_attempts", t.webhook_attempts),
            ("resource_attempts", t.resource_attempts),
            ("address_poll_attempts", t.address_poll_attempts),
            ("delegation_attempts", t.delegation_attempts),
        ] {
            if value == 0 {
                warnings.push(format!("timing.{} is 0; one attempt will be made", name));
            }
        }
        if t.webhook_timeout_secs == 0 {
            warnings.push("timing.webhook_timeout_secs is 0; every webhook call will time out".into());
        }
        if t.extension_timeout_secs == 0 {
            warnings.push(
                "timing.extension_timeout_secs is 0; extension attachment will always time out"
                    .into(),
            );
        }
        if self.staging.url_ttl_hours == 0 {
            warnings.push("staging.url_ttl_hours is 0; staged script URLs expire immediately".into());
        }
        if self.staging.container.trim().is_empty() {
            warnings.push("staging.container is empty".into());
        }
        if self.dns.resolver == ResolverMode::Doh && !self.dns.doh_endpoint.starts_with("https://") {
            warnings.push(format!(
                "dns.doh_endpoint '{}' is not an https URL",
                self.dns.doh_endpoint
            ));
        }

        let known = crate::orchestrator::blueprint::BUILTIN_NAMES;
        for (name, over) in &self.blueprints {
            if !known.contains(&name.as_str()) {
                warnings.push(format!(
                    "blueprints.{} does not match a built-in blueprint ({})",
                    name,
                    known.join(", ")
                ));
                continue;
            }
            if let (Some(default), Some(allowed)) = (&over.default_size, &over.allowed_sizes)
                && !allowed.contains(default)
            {
                warnings.push(format!(
                    "blueprints.{}.default_size '{}' is not in allowed_sizes",
                    name, default
                ));
            }
            if let Some(ports) = &over.ports
                && ports.contains(&0)
            {
                warnings.push(format!("blueprints.{}.ports contains port 0", name));
            }
        }

        warnings
    }
}
