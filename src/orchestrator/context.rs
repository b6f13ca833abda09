//! Per-run state.
//!
//! A [`ProvisioningContext`] is owned by exactly one orchestrator run. It keeps
//! the immutable request, the handles the run created (in creation order), the
//! current phase and step, and every status event it let through. Observers
//! get read-only [`RunSnapshot`]s through a `watch` channel.

use super::blueprint::{Blueprint, Phase};
use crate::staging::StagedScript;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skyforge_common::{EventStatus, ResourceHandle, RunStatus, StatusEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Optional settings of the VM blueprints.
#[derive(Clone, PartialEq, Eq)]
pub struct VmOptions {
    pub admin_username: String,
    pub admin_password: String,
    pub os_disk_gb: u32,
    pub app_image: String,
    pub app_port: u16,
}

impl std::fmt::Debug for VmOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmOptions")
            .field("admin_username", &self.admin_username)
            .field("os_disk_gb", &self.os_disk_gb)
            .field("app_image", &self.app_image)
            .field("app_port", &self.app_port)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSize {
    Small,
    Medium,
    Large,
}

impl IndexSize {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "small" => Some(IndexSize::Small),
            "medium" => Some(IndexSize::Medium),
            "large" => Some(IndexSize::Large),
            _ => None,
        }
    }

    /// HNSW `(m, efConstruction, efSearch)`.
    pub fn hnsw(&self) -> (u32, u32, u32) {
        match self {
            IndexSize::Small => (4, 400, 500),
            IndexSize::Medium => (8, 800, 1000),
            IndexSize::Large => (16, 1600, 2000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub index_size: IndexSize,
    pub storage_account: String,
    pub search_service: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOptions {
    Vm(VmOptions),
    Search(SearchOptions),
}

/// A validated provisioning request. Immutable once accepted.
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub blueprint: Arc<Blueprint>,
    pub target_name: String,
    pub resource_group: String,
    pub location: String,
    /// Value of the blueprint's size field (`vm_size`, `model_type`).
    pub size: String,
    pub domain: Option<String>,
    pub recipients: Vec<String>,
    /// Empty when the caller supplied no webhook.
    pub webhook_url: String,
    pub options: TargetOptions,
}

impl ProvisioningRequest {
    pub fn target_key(&self) -> &str {
        &self.blueprint.target_key
    }

    /// `<target>.<domain>` for domain flows.
    pub fn fqdn(&self) -> Option<String> {
        self.domain
            .as_ref()
            .map(|d| format!("{}.{}", self.target_name, d))
    }

    pub fn vm_options(&self) -> Option<&VmOptions> {
        match &self.options {
            TargetOptions::Vm(v) => Some(v),
            TargetOptions::Search(_) => None,
        }
    }

    pub fn search_options(&self) -> Option<&SearchOptions> {
        match &self.options {
            TargetOptions::Search(s) => Some(s),
            TargetOptions::Vm(_) => None,
        }
    }

    /// A progress event addressed from this request.
    pub fn event(&self, status: EventStatus, step: &str) -> StatusEvent {
        StatusEvent::new(
            self.target_key(),
            &self.target_name,
            status,
            &self.resource_group,
            &self.location,
            step,
        )
    }
}

/// Values produced by one step and read by a later one.
#[derive(Debug, Clone, Default)]
pub struct RunOutputs {
    pub public_ip: Option<ResourceHandle>,
    pub security_group: Option<ResourceHandle>,
    pub nic: Option<ResourceHandle>,
    pub instance: Option<ResourceHandle>,
    pub zone: Option<ResourceHandle>,
    pub staging_account: Option<ResourceHandle>,
    pub address: Option<String>,
    pub staged: Option<StagedScript>,
}

/// Read-only view of a run, published on every change.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub blueprint: String,
    pub target_key: String,
    pub target_name: String,
    pub resource_group: String,
    pub location: String,
    pub status: RunStatus,
    pub phase: Phase,
    pub step: String,
    pub created: Vec<ResourceHandle>,
    pub adopted: Vec<ResourceHandle>,
    pub access_urls: Vec<String>,
    pub error: Option<String>,
    pub events: Vec<StatusEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub struct ProvisioningContext {
    run_id: String,
    request: Arc<ProvisioningRequest>,
    status: RunStatus,
    phase: Phase,
    phases: Vec<Phase>,
    step: String,
    created: Vec<ResourceHandle>,
    adopted: Vec<ResourceHandle>,
    events: Vec<StatusEvent>,
    access_urls: Vec<String>,
    error: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    publisher: Option<watch::Sender<RunSnapshot>>,
    pub outputs: RunOutputs,
}

impl ProvisioningContext {
    pub fn new(run_id: impl Into<String>, request: ProvisioningRequest) -> Self {
        Self {
            run_id: run_id.into(),
            request: Arc::new(request),
            status: RunStatus::Pending,
            phase: Phase::Init,
            phases: vec![Phase::Init],
            step: "init".to_string(),
            created: Vec::new(),
            adopted: Vec::new(),
            events: Vec::new(),
            access_urls: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            publisher: None,
            outputs: RunOutputs::default(),
        }
    }

    /// Publish snapshots to a fresh `watch` channel and return its receiver.
    pub fn subscribe(&mut self) -> watch::Receiver<RunSnapshot> {
        let (tx, rx) = watch::channel(self.snapshot());
        self.publisher = Some(tx);
        rx
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn request(&self) -> &Arc<ProvisioningRequest> {
        &self.request
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase entered so far, in order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// Handles this run created, oldest first.
    pub fn created_handles(&self) -> &[ResourceHandle] {
        &self.created
    }

    /// Pre-existing resources this run used but does not own.
    pub fn adopted_handles(&self) -> &[ResourceHandle] {
        &self.adopted
    }

    pub fn events(&self) -> &[StatusEvent] {
        &self.events
    }

    pub fn access_urls(&self) -> &[String] {
        &self.access_urls
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            blueprint: self.request.blueprint.name.clone(),
            target_key: self.request.blueprint.target_key.clone(),
            target_name: self.request.target_name.clone(),
            resource_group: self.request.resource_group.clone(),
            location: self.request.location.clone(),
            status: self.status,
            phase: self.phase,
            step: self.step.clone(),
            created: self.created.clone(),
            adopted: self.adopted.clone(),
            access_urls: self.access_urls.clone(),
            error: self.error.clone(),
            events: self.events.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    fn publish(&self) {
        if let Some(tx) = &self.publisher {
            tx.send_replace(self.snapshot());
        }
    }

    /// `pending -> provisioning`. Later calls are ignored.
    pub fn begin(&mut self) {
        if let Ok(next) = self.status.transition(RunStatus::Provisioning) {
            self.status = next;
            self.publish();
        }
    }

    /// Move to `phase`. Phases only advance, and nothing follows FAILED or DONE.
    pub fn enter(&mut self, phase: Phase) -> bool {
        let terminal = matches!(self.phase, Phase::Done | Phase::Failed);
        let advances = phase == Phase::Failed || phase > self.phase;
        if terminal || !advances {
            warn!(run_id = %self.run_id, from = %self.phase, to = %phase, "Ignoring phase change");
            return false;
        }
        debug!(run_id = %self.run_id, phase = %phase, "Entering phase");
        self.phase = phase;
        self.phases.push(phase);
        self.publish();
        true
    }

    pub fn set_step(&mut self, step: &str) {
        self.step = step.to_string();
        self.publish();
    }

    /// Record a resource after its ensure call returned. Created handles are
    /// the ones compensation will delete.
    pub fn record(&mut self, handle: ResourceHandle, created: bool) {
        if created {
            self.created.push(handle);
        } else {
            self.adopted.push(handle);
        }
        self.publish();
    }

    pub fn add_access_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !self.access_urls.contains(&url) {
            self.access_urls.push(url);
            self.publish();
        }
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.publish();
    }

    /// Decide whether `event` may be sent, and log it if so.
    ///
    /// Once the run is terminal no `provisioning` event goes out, and at most
    /// one terminal (`completed` / `failed`) event is ever admitted.
    pub fn admit(&mut self, event: &StatusEvent) -> bool {
        let terminal_sent = self.events.iter().any(|e| e.status.is_terminal());
        let rejected = match event.status {
            EventStatus::Provisioning => self.status.is_terminal() || terminal_sent,
            EventStatus::Completed | EventStatus::Failed => terminal_sent,
            EventStatus::Warning | EventStatus::Success => terminal_sent,
        };
        if rejected {
            warn!(
                run_id = %self.run_id,
                step = %event.step(),
                status = %event.status,
                "Dropping event after terminal status"
            );
            return false;
        }
        self.step = event.step().to_string();
        self.events.push(event.clone());
        self.publish();
        true
    }

    /// `provisioning -> completed | failed`.
    pub fn finish(&mut self, status: RunStatus) {
        match self.status.transition(status) {
            Ok(next) => {
                self.status = next;
                self.finished_at = Some(Utc::now());
                self.publish();
            }
            Err(e) => warn!(run_id = %self.run_id, error = %e, "Ignoring status change"),
        }
    }

    /// Extra fields for the final event.
    pub fn summary(&self) -> BTreeMap<&'static str, serde_json::Value> {
        let mut fields = BTreeMap::new();
        fields.insert("run_id", serde_json::Value::from(self.run_id.clone()));
        fields.insert(
            "access_urls",
            serde_json::Value::from(self.access_urls.clone()),
        );
        if let Some(url) = self.access_urls.first() {
            fields.insert("url", serde_json::Value::from(url.clone()));
        }
        if let Some(address) = &self.outputs.address {
            fields.insert("public_ip", serde_json::Value::from(address.clone()));
        }
        fields
    }
}
