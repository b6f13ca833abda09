//! The provisioning state machine.
//!
//! [`Provisioner::run`] drives one [`ProvisioningContext`] through AUTH and the
//! blueprint's plan, reporting every step to the webhook. Errors from any step
//! land in one place, [`Provisioner::fail`], which runs compensating cleanup
//! and sends the single `failed` event. `run` itself never returns an error.

use super::blueprint::{Phase, model_sku};
use super::cleanup::CompensatingCleanup;
use super::context::{IndexSize, ProvisioningContext, ProvisioningRequest};
use crate::config::{SkyforgeConfig, StagingSection, Timings};
use crate::credentials::CredentialProvider;
use crate::dns::{DelegationVerifier, NameServerResolver};
use crate::errors::{CloudError, ProvisionError};
use crate::lifecycle::{
    CloudProvider, ComputeConfig, DeleteOutcome, Ensured, ExtensionSpec, ResourceConfig,
    ResourceLifecycle, ResourceSpec,
};
use crate::notify::{AdminLogin, CompletionNotice, Notifier};
use crate::staging::{ObjectStore, RemoteReporting, ScriptStager};
use crate::status::{ReportOutcome, StatusReporter};
use chrono::Utc;
use skyforge_common::{EventStatus, ResourceHandle, RunStatus, StatusEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const VNET_PREFIX: &str = "10.0.0.0/16";
const SUBNET_PREFIX: &str = "10.0.0.0/24";
const RECORD_TTL: u32 = 3600;
const STAGING_SKU: &str = "Standard_LRS";

/// External systems a run talks to.
pub struct Collaborators {
    pub cloud: Arc<dyn CloudProvider>,
    pub store: Arc<dyn ObjectStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub resolver: Arc<dyn NameServerResolver>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct Provisioner {
    lifecycle: ResourceLifecycle,
    cleanup: CompensatingCleanup,
    stager: ScriptStager,
    reporter: StatusReporter,
    credentials: Arc<dyn CredentialProvider>,
    delegation: DelegationVerifier,
    notifier: Arc<dyn Notifier>,
    timings: Timings,
}

impl Provisioner {
    pub fn new(parts: Collaborators, timings: Timings, staging: &StagingSection) -> Self {
        let lifecycle = ResourceLifecycle::new(parts.cloud, &timings);
        Self {
            cleanup: CompensatingCleanup::new(lifecycle.clone()),
            lifecycle,
            stager: ScriptStager::new(parts.store, staging),
            reporter: StatusReporter::new(&timings),
            credentials: parts.credentials,
            delegation: DelegationVerifier::new(
                parts.resolver,
                timings.delegation_attempts,
                timings.delegation_delay,
            ),
            notifier: parts.notifier,
            timings,
        }
    }

    pub fn from_config(parts: Collaborators, config: &SkyforgeConfig) -> Self {
        Self::new(parts, config.timings(), &config.staging)
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub fn compensating_cleanup(&self) -> &CompensatingCleanup {
        &self.cleanup
    }

    /// Fail fast on missing credentials before a run is accepted.
    pub async fn preflight(&self) -> Result<(), ProvisionError> {
        self.credentials.credentials().await.map(|_| ())
    }

    /// Send the `init` event for an accepted request. The entrypoint treats a
    /// failure here as fatal when a webhook was supplied.
    pub async fn announce(&self, ctx: &mut ProvisioningContext) -> ReportOutcome {
        let request = ctx.request().clone();
        let event = request
            .event(EventStatus::Provisioning, "init")
            .with_message(format!("{} provisioning started", request.blueprint.name))
            .with_extra("run_id", ctx.run_id());
        ctx.admit(&event);
        self.reporter.report(&request.webhook_url, &event).await
    }

    /// Build a context for `request` and run it.
    pub async fn provision(&self, request: ProvisioningRequest) -> ProvisioningContext {
        let ctx = ProvisioningContext::new(uuid::Uuid::new_v4().to_string(), request);
        self.run(ctx).await
    }

    /// Run to a terminal status. Never fails: any error ends in FAILED after
    /// cleanup, and the returned context carries the outcome.
    pub async fn run(&self, mut ctx: ProvisioningContext) -> ProvisioningContext {
        ctx.begin();
        let request = ctx.request().clone();
        info!(
            run_id = %ctx.run_id(),
            blueprint = %request.blueprint.name,
            target = %request.target_name,
            "Starting provisioning run"
        );
        self.progress(
            &mut ctx,
            "starting_provisioning",
            format!("Beginning {} provisioning process", request.blueprint.name),
        )
        .await;

        match self.drive(&mut ctx).await {
            Ok(()) => self.complete(&mut ctx).await,
            Err(e) => self.fail(&mut ctx, e).await,
        }
        ctx
    }

    async fn drive(&self, ctx: &mut ProvisioningContext) -> Result<(), ProvisionError> {
        self.authenticate(ctx).await?;

        let plan = ctx.request().blueprint.plan.clone();
        for phase in plan {
            ctx.enter(phase);
            match phase {
                Phase::Network => self.network(ctx).await?,
                Phase::Compute => self.compute(ctx).await?,
                Phase::Dns => self.dns(ctx).await?,
                Phase::Search => self.search(ctx).await?,
                Phase::ScriptDeploy => self.script_deploy(ctx).await?,
                Phase::WaitRemote => self.wait_remote(ctx).await,
                Phase::Notify => self.notify(ctx).await,
                Phase::Init | Phase::Auth | Phase::Done | Phase::Failed => {}
            }
        }
        Ok(())
    }

    // ── Event helpers ─────────────────────────────────────────────────

    async fn emit(&self, ctx: &mut ProvisioningContext, event: StatusEvent) -> Option<ReportOutcome> {
        if !ctx.admit(&event) {
            return None;
        }
        let outcome = self.reporter.report(&ctx.request().webhook_url, &event).await;
        if !outcome.success {
            // Only the init event is fatal; the entrypoint handles that one.
            warn!(
                run_id = %ctx.run_id(),
                step = %event.step(),
                error = outcome.error.as_deref().unwrap_or_default(),
                "Webhook did not accept status update"
            );
        }
        Some(outcome)
    }

    async fn progress(&self, ctx: &mut ProvisioningContext, step: &str, message: impl Into<String>) {
        self.progress_with(ctx, step, message, BTreeMap::new()).await;
    }

    async fn progress_with(
        &self,
        ctx: &mut ProvisioningContext,
        step: &str,
        message: impl Into<String>,
        extra: BTreeMap<&str, serde_json::Value>,
    ) {
        let message = message.into();
        info!(run_id = %ctx.run_id(), step, "{}", message);
        let mut event = ctx
            .request()
            .event(EventStatus::Provisioning, step)
            .with_message(message);
        for (key, value) in extra {
            event = event.with_extra(key, value);
        }
        self.emit(ctx, event).await;
    }

    async fn warning(&self, ctx: &mut ProvisioningContext, step: &str, message: &str, error: String) {
        warn!(run_id = %ctx.run_id(), step, error = %error, "{}", message);
        let event = ctx
            .request()
            .event(EventStatus::Warning, step)
            .with_message(message)
            .with_error(error);
        self.emit(ctx, event).await;
    }

    /// Ensure `spec` and record the handle. `failure_step` names the step
    /// reported if it fails. The handle is recorded before the readiness
    /// wait, so a VM that never comes up is still cleaned up.
    async fn ensure(
        &self,
        ctx: &mut ProvisioningContext,
        spec: ResourceSpec,
        failure_step: &str,
        what: &str,
    ) -> Result<Ensured, ProvisionError> {
        let failed = |e: CloudError| {
            ProvisionError::resource(failure_step, format!("Failed to create {}: {}", what, e))
        };
        let ensured = self.lifecycle.create_or_get(&spec).await.map_err(failed)?;
        ctx.record(ensured.handle().clone(), ensured.was_created());
        self.lifecycle.wait_ready(&ensured).await.map_err(failed)?;
        Ok(ensured)
    }

    // ── Phases ────────────────────────────────────────────────────────

    async fn authenticate(&self, ctx: &mut ProvisioningContext) -> Result<(), ProvisionError> {
        ctx.enter(Phase::Auth);
        self.progress(ctx, "authenticating", "Authenticating with the cloud provider")
            .await;
        let credentials = self.credentials.credentials().await?;
        self.lifecycle
            .verify_access(&credentials)
            .await
            .map_err(|e| {
                ProvisionError::resource(
                    "authentication_failed",
                    format!("Authentication failed: {}", e),
                )
            })?;
        debug!(run_id = %ctx.run_id(), ?credentials, "Credentials accepted");
        Ok(())
    }

    async fn network(&self, ctx: &mut ProvisioningContext) -> Result<(), ProvisionError> {
        let req = ctx.request().clone();
        let t = &req.target_name;
        self.progress(ctx, "network_setup", "Configuring network infrastructure")
            .await;

        let vnet_name = format!("{}-vnet", t);
        self.progress(ctx, "creating_vnet", format!("Creating virtual network {}", vnet_name))
            .await;
        let vnet = self
            .ensure(
                ctx,
                spec(&req, &vnet_name, ResourceConfig::Network {
                    address_prefix: VNET_PREFIX.into(),
                }),
                "vnet_creation_failed",
                "virtual network",
            )
            .await?
            .into_handle();
        self.progress(ctx, "vnet_created", format!("Virtual network {} ready", vnet_name))
            .await;

        let subnet_name = format!("{}-subnet", t);
        self.progress(ctx, "creating_subnet", format!("Creating subnet {}", subnet_name))
            .await;
        let subnet = self
            .ensure(
                ctx,
                spec(&req, &subnet_name, ResourceConfig::Subnet {
                    network: vnet.name.clone(),
                    address_prefix: SUBNET_PREFIX.into(),
                }),
                "subnet_creation_failed",
                "subnet",
            )
            .await?
            .into_handle();
        self.progress(ctx, "subnet_created", format!("Subnet {} ready", subnet_name))
            .await;

        let ip_name = format!("{}-public-ip", t);
        self.progress(ctx, "creating_public_ip", format!("Creating public IP {}", ip_name))
            .await;
        let ip = self
            .ensure(
                ctx,
                spec(&req, &ip_name, ResourceConfig::PublicIp),
                "public_ip_creation_failed",
                "public IP",
            )
            .await?
            .into_handle();
        self.progress(ctx, "public_ip_created", format!("Public IP {} ready", ip_name))
            .await;

        let nsg_name = format!("{}-nsg", t);
        self.progress(
            ctx,
            "configuring_nsg",
            format!("Configuring network security group {}", nsg_name),
        )
        .await;
        let nsg = self
            .ensure(
                ctx,
                spec(&req, &nsg_name, ResourceConfig::SecurityGroup),
                "nsg_configuration_failed",
                "network security group",
            )
            .await?;
        if nsg.was_created() {
            self.progress(ctx, "nsg_created", format!("Created new NSG {}", nsg_name))
                .await;
        } else {
            self.progress(ctx, "nsg_found", format!("Using existing NSG {}", nsg_name))
                .await;
        }
        let nsg = nsg.into_handle();

        self.progress(
            ctx,
            "adding_nsg_rules",
            format!("Adding security rules to NSG {}", nsg_name),
        )
        .await;
        let added = self
            .lifecycle
            .open_ports(&nsg, &req.blueprint.ports)
            .await
            .map_err(|e| {
                ProvisionError::resource(
                    "nsg_configuration_failed",
                    format!("Failed to add security rules: {}", e),
                )
            })?;
        let opened: Vec<u16> = added.iter().map(|r| r.port).collect();
        self.progress_with(
            ctx,
            "nsg_rules_added",
            format!("Added {} security rules to NSG {}", added.len(), nsg_name),
            BTreeMap::from([("ports", serde_json::Value::from(opened))]),
        )
        .await;

        let nic_name = format!("{}-nic", t);
        self.progress(
            ctx,
            "creating_nic",
            format!("Creating network interface for {}", t),
        )
        .await;
        let nic = self
            .ensure(
                ctx,
                spec(&req, &nic_name, ResourceConfig::Nic {
                    subnet_id: subnet.identifier.clone(),
                    public_ip_id: ip.identifier.clone(),
                    security_group_id: nsg.identifier.clone(),
                }),
                "nic_creation_failed",
                "network interface",
            )
            .await?
            .into_handle();
        self.progress(ctx, "nic_created", format!("Network interface {} ready", nic_name))
            .await;

        ctx.outputs.public_ip = Some(ip);
        ctx.outputs.security_group = Some(nsg);
        ctx.outputs.nic = Some(nic);
        Ok(())
    }

    async fn compute(&self, ctx: &mut ProvisioningContext) -> Result<(), ProvisionError> {
        let req = ctx.request().clone();
        let t = &req.target_name;
        let nic = require(&ctx.outputs.nic, "network interface")?;
        let ip = require(&ctx.outputs.public_ip, "public IP")?;
        let options = req
            .vm_options()
            .ok_or_else(|| ProvisionError::Configuration("VM settings missing from request".into()))?;

        self.progress(ctx, "creating_vm", format!("Creating virtual machine {}", t))
            .await;
        let vm = self
            .ensure(
                ctx,
                spec(
                    &req,
                    t,
                    ResourceConfig::ComputeInstance(ComputeConfig {
                        size: req.size.clone(),
                        nic_id: nic.identifier.clone(),
                        admin_username: options.admin_username.clone(),
                        admin_password: options.admin_password.clone(),
                        os_disk_gb: options.os_disk_gb,
                        image: req.blueprint.image.clone(),
                    }),
                ),
                "vm_creation_failed",
                "virtual machine",
            )
            .await?
            .into_handle();
        self.progress_with(
            ctx,
            "vm_created",
            format!("Virtual machine {} created successfully", t),
            BTreeMap::from([("vm_size", serde_json::Value::from(req.size.clone()))]),
        )
        .await;
        ctx.outputs.instance = Some(vm);

        self.progress(
            ctx,
            "vm_initializing",
            format!(
                "Waiting for VM to initialize ({} seconds)",
                self.timings.vm_settle.as_secs()
            ),
        )
        .await;
        tokio::time::sleep(self.timings.vm_settle).await;

        self.progress(ctx, "verifying_public_ip", "Verifying public IP assignment")
            .await;
        let address = self.wait_for_address(t, &ip).await?;
        ctx.outputs.address = Some(address.clone());
        self.progress_with(
            ctx,
            "public_ip_confirmed",
            format!("VM public IP confirmed: {}", address),
            BTreeMap::from([("public_ip", serde_json::Value::from(address.clone()))]),
        )
        .await;

        if !req.blueprint.manages_domain {
            ctx.add_access_url(format!("http://{}", address));
        }
        Ok(())
    }

    async fn wait_for_address(
        &self,
        target: &str,
        ip: &ResourceHandle,
    ) -> Result<String, ProvisionError> {
        let attempts = self.timings.address_poll_attempts;
        for attempt in 1..=attempts {
            let address = self.lifecycle.public_address(ip).await.map_err(|e| {
                ProvisionError::resource(
                    "public_ip_verification_failed",
                    format!("Failed to read public IP {}: {}", ip.name, e),
                )
            })?;
            if let Some(address) = address {
                return Ok(address);
            }
            debug!(target, attempt, "Public IP not assigned yet");
            if attempt < attempts {
                tokio::time::sleep(self.timings.resource_backoff * attempt).await;
            }
        }
        Err(ProvisionError::resource(
            "public_ip_verification_failed",
            format!(
                "No public IP address assigned to VM {} after {} checks",
                target, attempts
            ),
        ))
    }

    async fn dns(&self, ctx: &mut ProvisioningContext) -> Result<(), ProvisionError> {
        let req = ctx.request().clone();
        let domain = req.domain.clone().ok_or_else(|| {
            ProvisionError::Configuration("Blueprint manages a domain but none was given".into())
        })?;
        let address = require(&ctx.outputs.address, "public IP address")?;

        self.progress(ctx, "dns_configuration", format!("Configuring DNS for domain {}", domain))
            .await;
        self.progress(ctx, "creating_dns_zone", format!("Creating DNS zone for {}", domain))
            .await;
        let zone = self
            .ensure(
                ctx,
                spec(&req, &domain, ResourceConfig::DnsZone),
                "dns_zone_creation_failed",
                "DNS zone",
            )
            .await?;
        if zone.was_created() {
            self.progress(
                ctx,
                "dns_zone_created",
                format!("DNS zone {} created successfully", domain),
            )
            .await;
            self.progress(
                ctx,
                "dns_zone_initializing",
                format!(
                    "Waiting for DNS zone to initialize ({} seconds)",
                    self.timings.dns_zone_settle.as_secs()
                ),
            )
            .await;
            tokio::time::sleep(self.timings.dns_zone_settle).await;
        } else {
            self.progress(ctx, "dns_zone_exists", format!("DNS zone {} already exists", domain))
                .await;
        }
        let zone = zone.into_handle();
        ctx.outputs.zone = Some(zone.clone());

        self.progress(ctx, "verifying_ns_delegation", "Verifying NS delegation for DNS zone")
            .await;
        let zone_servers = self.lifecycle.zone_name_servers(&zone).await.map_err(|e| {
            ProvisionError::resource(
                "dns_configuration_failed",
                format!("Failed to read name servers of zone {}: {}", domain, e),
            )
        })?;
        self.delegation.verify(&domain, &zone_servers).await?;

        let record = record_name(&req.target_name);
        let fqdn = if record == "@" {
            domain.clone()
        } else {
            format!("{}.{}", record, domain)
        };
        self.progress(
            ctx,
            "creating_dns_records",
            format!("Creating DNS A records: [{}]", record),
        )
        .await;
        self.ensure(
            ctx,
            spec(&req, &record, ResourceConfig::DnsRecord {
                zone: domain.clone(),
                ipv4: address.clone(),
                ttl: RECORD_TTL,
            }),
            "dns_record_failed",
            "DNS A record",
        )
        .await?;
        self.progress_with(
            ctx,
            "dns_record_created",
            format!("Created DNS A record for {}", fqdn),
            BTreeMap::from([
                ("fqdn", serde_json::Value::from(fqdn.clone())),
                ("public_ip", serde_json::Value::from(address)),
            ]),
        )
        .await;

        ctx.add_access_url(format!("https://{}", fqdn));
        Ok(())
    }

    async fn search(&self, ctx: &mut ProvisioningContext) -> Result<(), ProvisionError> {
        let req = ctx.request().clone();
        let t = &req.target_name;
        let options = req.search_options().ok_or_else(|| {
            ProvisionError::Configuration("Search settings missing from request".into())
        })?;
        let sku = model_sku(&req.size).unwrap_or("S0");

        self.progress(
            ctx,
            "creating_cognitive_services",
            format!("Creating cognitive services account for {}", req.size),
        )
        .await;
        self.ensure(
            ctx,
            spec(&req, t, ResourceConfig::CognitiveAccount { sku: sku.into() }),
            "cognitive_services_failed",
            "cognitive services account",
        )
        .await?;
        self.progress(ctx, "cognitive_services_created", "Cognitive services account ready")
            .await;

        self.progress(
            ctx,
            "creating_storage",
            format!("Creating storage account {}", options.storage_account),
        )
        .await;
        self.ensure(
            ctx,
            spec(&req, &options.storage_account, ResourceConfig::StorageAccount {
                sku: STAGING_SKU.into(),
            }),
            "storage_creation_failed",
            "storage account",
        )
        .await?;
        self.progress(ctx, "storage_created", "Storage account ready").await;

        self.progress(
            ctx,
            "creating_search_service",
            format!("Creating search service {}", options.search_service),
        )
        .await;
        self.ensure(
            ctx,
            spec(&req, &options.search_service, ResourceConfig::SearchService {
                sku: "standard".into(),
            }),
            "search_service_failed",
            "search service",
        )
        .await?;
        self.progress(ctx, "search_service_created", "Search service ready")
            .await;

        let index_name = format!("{}-vector-index", t);
        self.progress(
            ctx,
            "creating_search_index",
            format!("Creating vector index {}", index_name),
        )
        .await;
        self.ensure(
            ctx,
            spec(&req, &index_name, ResourceConfig::SearchIndex {
                service: options.search_service.clone(),
                fields: index_fields(options.index_size),
            }),
            "search_index_failed",
            "search index",
        )
        .await?;
        self.progress_with(
            ctx,
            "search_index_created",
            format!("Vector index {} ready", index_name),
            BTreeMap::from([("index_name", serde_json::Value::from(index_name.clone()))]),
        )
        .await;

        ctx.add_access_url(format!("https://{}.cognitiveservices.azure.com/", t));
        ctx.add_access_url(format!("https://{}.search.windows.net", options.search_service));
        Ok(())
    }

    async fn script_deploy(&self, ctx: &mut ProvisioningContext) -> Result<(), ProvisionError> {
        let req = ctx.request().clone();
        let t = &req.target_name;
        let instance = require(&ctx.outputs.instance, "virtual machine")?;
        let template = req.blueprint.script_template.ok_or_else(|| {
            ProvisionError::Configuration(format!(
                "Blueprint {} has no setup script",
                req.blueprint.name
            ))
        })?;

        self.progress(ctx, "generating_setup_script", "Generating VM setup script")
            .await;
        let params = script_params(&req);

        let account_name = staging_account_name(t);
        self.progress(
            ctx,
            "creating_storage",
            format!("Setting up storage account {}", account_name),
        )
        .await;
        let account = self
            .ensure(
                ctx,
                spec(&req, &account_name, ResourceConfig::StorageAccount {
                    sku: STAGING_SKU.into(),
                }),
                "storage_creation_failed",
                "storage account",
            )
            .await?
            .into_handle();
        ctx.outputs.staging_account = Some(account.clone());
        self.progress(ctx, "storage_created", "Storage account created successfully")
            .await;

        self.progress(ctx, "uploading_script", "Uploading setup script to blob storage")
            .await;
        let reporting = RemoteReporting {
            webhook_url: req.webhook_url.clone(),
            target_key: req.target_key().to_string(),
            resource_group: req.resource_group.clone(),
            location: req.location.clone(),
        };
        let staged = self
            .stager
            .stage(&account.name, t, template, &params, &reporting)
            .await
            .map_err(|e| {
                ProvisionError::resource(
                    "script_upload_failed",
                    format!("Failed to upload setup script: {}", e),
                )
            })?;
        ctx.outputs.staged = Some(staged.clone());
        self.progress_with(
            ctx,
            "script_uploaded",
            "Setup script uploaded successfully",
            BTreeMap::from([(
                "expires_at",
                serde_json::Value::from(staged.expires_at.to_rfc3339()),
            )]),
        )
        .await;

        self.progress(ctx, "installing_extension", "Installing custom script extension")
            .await;
        let extension = ExtensionSpec::run_script(&staged.url, &staged.location.name);
        let limit = self.timings.extension_timeout;
        match tokio::time::timeout(limit, self.lifecycle.attach_extension(&instance, &extension))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ProvisionError::resource(
                    "extension_installation_failed",
                    format!("Failed to install custom script extension: {}", e),
                ));
            }
            Err(_) => {
                let timeout = ProvisionError::Timeout {
                    operation: "installing the custom script extension".into(),
                    seconds: limit.as_secs(),
                };
                return Err(ProvisionError::resource(
                    "extension_installation_failed",
                    timeout.to_string(),
                ));
            }
        }
        self.progress(
            ctx,
            "extension_installed",
            "Custom script extension installed successfully",
        )
        .await;
        Ok(())
    }

    async fn wait_remote(&self, ctx: &mut ProvisioningContext) {
        self.progress(
            ctx,
            "finalizing",
            format!(
                "Finalizing setup ({} seconds)",
                self.timings.remote_settle.as_secs()
            ),
        )
        .await;
        tokio::time::sleep(self.timings.remote_settle).await;
    }

    async fn notify(&self, ctx: &mut ProvisioningContext) {
        let req = ctx.request().clone();
        if req.recipients.is_empty() {
            self.progress(ctx, "email_skipped", "No recipients given, skipping completion email")
                .await;
            return;
        }
        self.progress(ctx, "sending_email", "Sending completion notification")
            .await;
        let notice = CompletionNotice {
            blueprint: req.blueprint.name.clone(),
            target_name: req.target_name.clone(),
            resource_group: req.resource_group.clone(),
            location: req.location.clone(),
            recipients: req.recipients.clone(),
            access_urls: ctx.access_urls().to_vec(),
            login: req.vm_options().map(|vm| AdminLogin {
                username: vm.admin_username.clone(),
                password: vm.admin_password.clone(),
            }),
            completed_at: Utc::now(),
        };
        match self.notifier.notify(&notice).await {
            Ok(()) => {
                self.progress(ctx, "email_sent", "Completion email sent successfully")
                    .await
            }
            Err(e) => {
                self.warning(
                    ctx,
                    "email_failed",
                    "Provisioning succeeded but the completion email could not be sent",
                    e.to_string(),
                )
                .await
            }
        }
    }

    // ── Terminal states ───────────────────────────────────────────────

    async fn complete(&self, ctx: &mut ProvisioningContext) {
        ctx.enter(Phase::Done);
        self.remove_temporary(ctx).await;

        let req = ctx.request().clone();
        let mut event = req
            .event(EventStatus::Completed, "completed")
            .with_message(format!("{} provisioning completed successfully", req.blueprint.name));
        for (key, value) in ctx.summary() {
            event = event.with_extra(key, value);
        }
        self.emit(ctx, event).await;
        ctx.finish(RunStatus::Completed);
        info!(
            run_id = %ctx.run_id(),
            target = %req.target_name,
            urls = ?ctx.access_urls(),
            "Provisioning completed"
        );
    }

    /// Drop the staged script and the storage account created to hold it.
    async fn remove_temporary(&self, ctx: &mut ProvisioningContext) {
        let staged = ctx.outputs.staged.take();
        let account = ctx.outputs.staging_account.clone();
        if staged.is_none() && account.is_none() {
            return;
        }
        self.progress(ctx, "cleaning_up", "Cleaning up temporary resources")
            .await;

        let mut problems = Vec::new();
        if let Some(staged) = &staged
            && let Err(e) = self.stager.remove(staged).await
        {
            problems.push(ProvisionError::Cleanup {
                resource: format!("setup script {}", staged.location),
                message: e.to_string(),
            });
        }
        let owned = account
            .as_ref()
            .filter(|a| ctx.created_handles().iter().any(|h| h.same_resource(a)));
        if let Some(account) = owned
            && let DeleteOutcome::Failed(message) = self.lifecycle.delete(account).await
        {
            problems.push(ProvisionError::Cleanup {
                resource: format!("storage account {}", account.name),
                message,
            });
        }

        if problems.is_empty() {
            self.progress(
                ctx,
                "cleanup_complete",
                "Temporary resources cleaned up successfully",
            )
            .await;
        } else {
            let joined = problems
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            self.warning(
                ctx,
                "cleanup_warning",
                "Some temporary resources could not be removed",
                joined,
            )
            .await;
        }
    }

    /// The single failure boundary: clean up, then report `failed` once.
    async fn fail(&self, ctx: &mut ProvisioningContext, error: ProvisionError) {
        let step = failure_step(&error);
        let message = error.to_string();
        error!(
            run_id = %ctx.run_id(),
            phase = %ctx.phase(),
            step = %step,
            error = %message,
            "Provisioning failed"
        );
        let failed_in = ctx.phase();
        ctx.enter(Phase::Failed);
        ctx.set_error(&message);

        if let Some(staged) = ctx.outputs.staged.take()
            && let Err(e) = self.stager.remove(&staged).await
        {
            warn!(run_id = %ctx.run_id(), error = %e, "Failed to remove staged script");
        }
        let report = self.cleanup.cleanup(ctx).await;
        let report = (report.attempted() > 0).then_some(report);

        let req = ctx.request().clone();
        let mut event = req
            .event(EventStatus::Failed, &step)
            .with_message(format!(
                "{} provisioning failed during {}",
                req.blueprint.name, failed_in
            ))
            .with_error(message)
            .with_extra("run_id", ctx.run_id());
        if let Some(report) = &report {
            event = event.with_extra("cleanup", report.to_json());
        }
        self.emit(ctx, event).await;
        ctx.finish(RunStatus::Failed);
    }
}

/// Step id reported in the final `failed` event.
pub fn failure_step(error: &ProvisionError) -> String {
    match error {
        ProvisionError::ResourceCreation { step, .. } => step.clone(),
        ProvisionError::Delegation { .. } => "ns_delegation_failed".into(),
        ProvisionError::Configuration(_) => "configuration_error".into(),
        ProvisionError::Validation(_) => "validation_failed".into(),
        ProvisionError::Timeout { .. } => "timeout".into(),
        ProvisionError::Notification(_)
        | ProvisionError::Cleanup { .. }
        | ProvisionError::Other(_) => "provisioning_failed".into(),
    }
}

fn spec(req: &ProvisioningRequest, name: &str, config: ResourceConfig) -> ResourceSpec {
    ResourceSpec::new(name, &req.resource_group, &req.location, config)
}

fn require<T: Clone>(slot: &Option<T>, what: &str) -> Result<T, ProvisionError> {
    slot.clone()
        .ok_or_else(|| ProvisionError::Other(anyhow::anyhow!("No {} available for this step", what)))
}

/// A record name for `target`: dots removed, `@` when nothing is left.
pub fn record_name(target: &str) -> String {
    let name: String = target.chars().filter(|c| *c != '.').collect();
    if name.is_empty() { "@".to_string() } else { name }
}

/// Temporary storage account: lowercase alphanumerics of the target plus a
/// four-digit suffix, at most 24 characters.
pub fn staging_account_name(target: &str) -> String {
    let mut base: String = target
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(20)
        .collect();
    if base.is_empty() {
        base.push_str("vm");
    }
    format!("{}{:04}", base, Utc::now().timestamp().rem_euclid(10_000))
}

fn index_fields(size: IndexSize) -> Vec<String> {
    let (m, ef_construction, ef_search) = size.hnsw();
    vec![
        "id".to_string(),
        "content".to_string(),
        "metadata".to_string(),
        format!(
            "content_vector:1536:hnsw(m={},efConstruction={},efSearch={})",
            m, ef_construction, ef_search
        ),
    ]
}

/// Token values for the blueprint's setup script.
pub fn script_params(req: &ProvisioningRequest) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("TARGET_NAME".to_string(), req.target_name.clone());
    if let Some(domain) = &req.domain {
        params.insert("DOMAIN".to_string(), domain.clone());
        params.insert("ADMIN_EMAIL".to_string(), format!("admin@{}", domain));
    }
    if let Some(fqdn) = req.fqdn() {
        params.insert("FQDN".to_string(), fqdn);
    }
    if let Some(vm) = req.vm_options() {
        if !vm.app_image.is_empty() {
            params.insert("APP_IMAGE".to_string(), vm.app_image.clone());
        }
        params.insert("APP_PORT".to_string(), vm.app_port.to_string());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::dns::StaticResolver;
    use crate::errors::CloudError;
    use crate::lifecycle::MemoryCloud;
    use crate::lifecycle::memory::{Fault, FaultTarget, ZONE_NAME_SERVERS};
    use crate::notify::RecordingNotifier;
    use crate::orchestrator::context::fixtures::*;
    use crate::staging::MemoryObjectStore;
    use crate::status::receiver::Receiver;
    use skyforge_common::ResourceKind;

    struct Harness {
        cloud: Arc<MemoryCloud>,
        store: Arc<MemoryObjectStore>,
        notifier: Arc<RecordingNotifier>,
        provisioner: Provisioner,
    }

    fn harness_with(
        credentials: StaticCredentials,
        resolver: StaticResolver,
        notifier: RecordingNotifier,
    ) -> Harness {
        harness_timed(credentials, resolver, notifier, Timings::immediate())
    }

    fn harness_timed(
        credentials: StaticCredentials,
        resolver: StaticResolver,
        notifier: RecordingNotifier,
        timings: Timings,
    ) -> Harness {
        let cloud = Arc::new(MemoryCloud::new());
        let store = Arc::new(MemoryObjectStore::new());
        let notifier = Arc::new(notifier);
        let provisioner = Provisioner::new(
            Collaborators {
                cloud: cloud.clone(),
                store: store.clone(),
                credentials: Arc::new(credentials),
                resolver: Arc::new(resolver),
                notifier: notifier.clone(),
            },
            timings,
            &StagingSection::default(),
        );
        Harness {
            cloud,
            store,
            notifier,
            provisioner,
        }
    }

    fn harness() -> Harness {
        harness_with(
            StaticCredentials::simulated(),
            StaticResolver::always(&ZONE_NAME_SERVERS[..]),
            RecordingNotifier::new(),
        )
    }

    fn steps(ctx: &ProvisioningContext) -> Vec<String> {
        ctx.events().iter().map(|e| e.step().to_string()).collect()
    }

    fn position(steps: &[String], step: &str) -> usize {
        steps
            .iter()
            .position(|s| s == step)
            .unwrap_or_else(|| panic!("step {} missing from {:?}", step, steps))
    }

    #[tokio::test]
    async fn app_vm_happy_path() {
        let h = harness();
        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.status(), RunStatus::Completed, "{:?}", ctx.error());
        let steps = steps(&ctx);
        let order = [
            "starting_provisioning",
            "authenticating",
            "creating_vnet",
            "nic_created",
            "creating_vm",
            "public_ip_confirmed",
            "verifying_ns_delegation",
            "dns_record_created",
            "uploading_script",
            "extension_installed",
            "finalizing",
            "email_sent",
            "cleanup_complete",
            "completed",
        ];
        let positions: Vec<usize> = order.iter().map(|s| position(&steps, s)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", steps);
        assert_eq!(steps.last().map(String::as_str), Some("completed"));
        assert_eq!(
            ctx.events()
                .iter()
                .filter(|e| e.status == EventStatus::Completed)
                .count(),
            1
        );

        assert!(!ctx.created_handles().is_empty());
        assert!(ctx.phases().windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ctx.phase(), Phase::Done);
        assert_eq!(ctx.access_urls(), &["https://web01.example.com".to_string()]);

        let vm = h.cloud.find(ResourceKind::ComputeInstance, "web01").unwrap();
        let extensions = h.cloud.extensions(&vm);
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions[0].command, "bash web01-setup.sh");
        assert!(h.cloud.find(ResourceKind::DnsRecord, "web01").is_some());

        // Temporary script storage is gone, the rest stays.
        assert_eq!(h.store.object_count(), 0);
        let account = ctx.outputs.staging_account.clone().unwrap();
        assert!(!h.cloud.exists(&account));
        assert_eq!(h.cloud.rules(ctx.outputs.security_group.as_ref().unwrap()).len(), 5);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].access_urls, vec!["https://web01.example.com"]);

        let last = ctx.events().last().unwrap().to_json();
        assert_eq!(last["details"]["url"], "https://web01.example.com");
        assert!(last["details"]["public_ip"].as_str().unwrap().starts_with("20."));
    }

    #[tokio::test]
    async fn compute_failure_cleans_up_network_only() {
        let h = harness();
        h.cloud.inject(Fault::ensure(
            ResourceKind::ComputeInstance,
            CloudError::Rejected("quota exceeded".into()),
        ));

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.status(), RunStatus::Failed);
        let last = ctx.events().last().unwrap();
        assert_eq!(last.status, EventStatus::Failed);
        assert_eq!(last.step(), "vm_creation_failed");
        assert!(last.details.error.as_deref().unwrap().contains("quota exceeded"));

        let deleted: Vec<(ResourceKind, String)> = h.cloud.deletes();
        assert_eq!(
            deleted,
            vec![
                (ResourceKind::Nic, "web01-nic".to_string()),
                (ResourceKind::SecurityGroup, "web01-nsg".to_string()),
                (ResourceKind::PublicIp, "web01-public-ip".to_string()),
                (ResourceKind::Subnet, "web01-subnet".to_string()),
                (ResourceKind::Network, "web01-vnet".to_string()),
            ]
        );
        assert_eq!(ctx.created_handles().len(), 5);
        assert_eq!(h.cloud.resource_count(), 0);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(last.details.extra["cleanup"]["attempted"], 5);
    }

    #[tokio::test]
    async fn vm_that_never_becomes_ready_is_cleaned_up() {
        let h = harness_timed(
            StaticCredentials::simulated(),
            StaticResolver::always(&ZONE_NAME_SERVERS[..]),
            RecordingNotifier::new(),
            Timings {
                compute_ready_timeout: std::time::Duration::from_millis(100),
                ..Timings::immediate()
            },
        );
        h.cloud.set_provisioning_polls(u32::MAX);

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.status(), RunStatus::Failed);
        assert_eq!(ctx.events().last().unwrap().step(), "vm_creation_failed");
        assert_eq!(ctx.created_handles().len(), 6);
        assert_eq!(
            h.cloud.deletes().first(),
            Some(&(ResourceKind::ComputeInstance, "web01".to_string()))
        );
        assert!(h.cloud.find(ResourceKind::ComputeInstance, "web01").is_none());
        assert_eq!(h.cloud.resource_count(), 0);
    }

    #[tokio::test]
    async fn configuration_error_after_network_still_cleans_up() {
        let h = harness();
        let request = ProvisioningRequest {
            options: search_request().options,
            ..app_vm_request("")
        };

        let ctx = h.provisioner.provision(request).await;

        assert_eq!(ctx.status(), RunStatus::Failed);
        let last = ctx.events().last().unwrap();
        assert_eq!(last.step(), "configuration_error");
        assert_eq!(h.cloud.deletes().len(), 5);
        assert_eq!(h.cloud.resource_count(), 0);
        assert_eq!(last.details.extra["cleanup"]["attempted"], 5);
    }

    #[tokio::test]
    async fn generated_password_reaches_the_completion_email() {
        use crate::orchestrator::blueprint::Blueprint;
        use crate::server::RequestParams;
        use crate::server::validate::build_request;

        let h = harness();
        let request = build_request(
            Arc::new(Blueprint::plain_vm()),
            &RequestParams::from_pairs(&[
                ("vm_name", "box"),
                ("resource_group", "rg"),
                ("location", "westeurope"),
                ("recipient_emails", "ops@example.com"),
            ]),
        )
        .unwrap();
        let password = request.vm_options().unwrap().admin_password.clone();

        let ctx = h.provisioner.provision(request).await;

        assert_eq!(ctx.status(), RunStatus::Completed);
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        let login = sent[0].login.as_ref().unwrap();
        assert_eq!(login.username, "azureuser");
        assert_eq!(login.password, password);
        assert!(sent[0].body().contains(&password));
    }

    #[tokio::test]
    async fn no_recipients_skips_the_email() {
        let h = harness();
        let request = ProvisioningRequest {
            recipients: Vec::new(),
            ..plain_vm_request()
        };

        let ctx = h.provisioner.provision(request).await;

        assert_eq!(ctx.status(), RunStatus::Completed);
        let steps = steps(&ctx);
        assert!(steps.iter().any(|s| s == "email_skipped"));
        assert!(!steps.iter().any(|s| s == "email_sent" || s == "sending_email"));
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn nothing_is_reported_as_provisioning_after_failure() {
        let h = harness();
        h.cloud.inject(Fault::ensure(
            ResourceKind::Subnet,
            CloudError::Rejected("address space overlap".into()),
        ));

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        let failed_at = ctx
            .events()
            .iter()
            .position(|e| e.status == EventStatus::Failed)
            .unwrap();
        assert_eq!(failed_at, ctx.events().len() - 1);
        assert_eq!(ctx.events()[failed_at].step(), "subnet_creation_failed");
        assert_eq!(h.cloud.deletes(), vec![(ResourceKind::Network, "web01-vnet".to_string())]);
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_resource_call() {
        let h = harness_with(
            StaticCredentials::missing(),
            StaticResolver::always(&ZONE_NAME_SERVERS[..]),
            RecordingNotifier::new(),
        );

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.status(), RunStatus::Failed);
        assert_eq!(ctx.events().last().unwrap().step(), "configuration_error");
        assert!(h.cloud.calls().is_empty());
        assert!(ctx.created_handles().is_empty());
        assert!(ctx.events().last().unwrap().details.extra.get("cleanup").is_none());
    }

    #[tokio::test]
    async fn rejected_credentials_report_authentication_failure() {
        let h = harness();
        h.cloud.inject(Fault::new(
            FaultTarget::VerifyAccess,
            CloudError::Unauthorized("expired secret".into()),
        ));

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.events().last().unwrap().step(), "authentication_failed");
        assert!(h.cloud.mutations().is_empty());
    }

    #[tokio::test]
    async fn delegation_mismatch_is_a_hard_failure() {
        let h = harness_with(
            StaticCredentials::simulated(),
            StaticResolver::always(&["ns1.registrar-parking.net."]),
            RecordingNotifier::new(),
        );

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.status(), RunStatus::Failed);
        let last = ctx.events().last().unwrap();
        assert_eq!(last.step(), "ns_delegation_failed");
        assert!(last.details.error.as_deref().unwrap().contains("ns1-01.azure-dns.com"));
        assert!(h.cloud.find(ResourceKind::DnsRecord, "web01").is_none());
        // VM, network and the zone this run created are all removed.
        assert_eq!(h.cloud.resource_count(), 0);
    }

    #[tokio::test]
    async fn adopted_zone_survives_failure() {
        let h = harness();
        let zone = h.cloud.seed(&ResourceSpec::new(
            "example.com",
            "rg-web",
            "westeurope",
            ResourceConfig::DnsZone,
        ));
        h.cloud.inject(Fault::new(
            FaultTarget::AttachExtension,
            CloudError::Rejected("extension handler not supported".into()),
        ));

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.events().last().unwrap().step(), "extension_installation_failed");
        assert!(steps(&ctx).contains(&"dns_zone_exists".to_string()));
        assert!(ctx.adopted_handles().iter().any(|a| a.same_resource(&zone)));
        assert!(h.cloud.exists(&zone));
        assert!(!h.cloud.deletes().iter().any(|(k, _)| *k == ResourceKind::DnsZone));
        // The staged script does not outlive the run.
        assert_eq!(h.store.object_count(), 0);
    }

    #[tokio::test]
    async fn missing_public_address_fails_compute() {
        let h = harness();
        h.cloud.withhold_addresses();

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.events().last().unwrap().step(), "public_ip_verification_failed");
        assert!(
            h.cloud
                .deletes()
                .iter()
                .any(|(k, n)| *k == ResourceKind::ComputeInstance && n == "web01")
        );
    }

    #[tokio::test]
    async fn address_is_polled_until_assigned() {
        let h = harness();
        h.cloud.set_address_delay(2);

        let ctx = h.provisioner.provision(plain_vm_request()).await;

        assert_eq!(ctx.status(), RunStatus::Completed);
        assert!(ctx.access_urls()[0].starts_with("http://20."));
    }

    #[tokio::test]
    async fn notification_failure_keeps_the_run_successful() {
        let h = harness_with(
            StaticCredentials::simulated(),
            StaticResolver::always(&ZONE_NAME_SERVERS[..]),
            RecordingNotifier::failing("relay refused"),
        );

        let ctx = h.provisioner.provision(app_vm_request("")).await;

        assert_eq!(ctx.status(), RunStatus::Completed);
        let warning = ctx
            .events()
            .iter()
            .find(|e| e.step() == "email_failed")
            .unwrap();
        assert_eq!(warning.status, EventStatus::Warning);
        assert!(warning.details.error.as_deref().unwrap().contains("relay refused"));
        assert!(h.cloud.deletes().iter().all(|(k, _)| *k == ResourceKind::StorageAccount));
    }

    #[tokio::test]
    async fn plain_vm_skips_dns() {
        let h = harness();
        let ctx = h.provisioner.provision(plain_vm_request()).await;

        assert_eq!(ctx.status(), RunStatus::Completed);
        assert!(!ctx.phases().contains(&Phase::Dns));
        assert_eq!(h.cloud.ensure_calls(ResourceKind::DnsZone), 0);
        assert!(!steps(&ctx).iter().any(|s| s.starts_with("creating_dns")));
    }

    #[tokio::test]
    async fn search_stack_creates_index_and_reports_endpoints() {
        let h = harness();
        let ctx = h.provisioner.provision(search_request()).await;

        assert_eq!(ctx.status(), RunStatus::Completed, "{:?}", ctx.error());
        let kinds: Vec<ResourceKind> = ctx.created_handles().iter().map(|h| h.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::CognitiveAccount,
                ResourceKind::StorageAccount,
                ResourceKind::SearchService,
                ResourceKind::SearchIndex,
            ]
        );
        assert_eq!(
            ctx.access_urls(),
            &[
                "https://docs.cognitiveservices.azure.com/".to_string(),
                "https://docs-search.search.windows.net".to_string(),
            ]
        );
        assert!(h.cloud.find(ResourceKind::SearchIndex, "docs-vector-index").is_some());
        assert_eq!(ctx.events().last().unwrap().to_json()["deployment_name"], "docs");
    }

    #[tokio::test]
    async fn search_service_failure_unwinds_storage_and_cognitive() {
        let h = harness();
        h.cloud.inject(Fault::ensure(
            ResourceKind::SearchService,
            CloudError::Rejected("sku unavailable in region".into()),
        ));

        let ctx = h.provisioner.provision(search_request()).await;

        assert_eq!(ctx.events().last().unwrap().step(), "search_service_failed");
        assert_eq!(
            h.cloud.deletes(),
            vec![
                (ResourceKind::StorageAccount, "docsstore".to_string()),
                (ResourceKind::CognitiveAccount, "docs".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn webhook_receives_every_event_in_order() {
        let receiver = Receiver::start(0, "https://status.example/runs/1").await;
        let h = harness();
        let mut ctx = ProvisioningContext::new(
            "run-42",
            ProvisioningRequest {
                webhook_url: receiver.url.clone(),
                ..plain_vm_request()
            },
        );

        let outcome = h.provisioner.announce(&mut ctx).await;
        assert!(outcome.success);
        assert_eq!(outcome.status_url, "https://status.example/runs/1");

        let ctx = h.provisioner.run(ctx).await;
        let events = receiver.events().await;
        assert_eq!(events.len(), ctx.events().len());
        assert_eq!(events[0]["details"]["step"], "init");
        assert_eq!(events.last().unwrap()["status"], "completed");
        assert!(events.iter().all(|e| e["vm_name"] == "web01"));
        assert!(events.iter().all(|e| e["details"]["timestamp"].is_string()));
    }

    #[test]
    fn record_names_and_storage_names() {
        assert_eq!(record_name("web01"), "web01");
        assert_eq!(record_name("web.01"), "web01");
        assert_eq!(record_name("."), "@");

        let name = staging_account_name("My-Very_Long.Target-Name-2024");
        assert!(name.len() <= 24);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(name.starts_with("myverylongtargetname"));
        assert!(staging_account_name("--").starts_with("vm"));
    }

    #[test]
    fn script_params_cover_template_tokens() {
        let params = script_params(&app_vm_request(""));
        assert_eq!(params["FQDN"], "web01.example.com");
        assert_eq!(params["ADMIN_EMAIL"], "admin@example.com");
        assert_eq!(params["APP_PORT"], "3000");
        assert!(!params.contains_key("APP_IMAGE"));

        let plain = script_params(&plain_vm_request());
        assert!(!plain.contains_key("DOMAIN"));
        assert_eq!(plain["TARGET_NAME"], "web01");
    }

    #[test]
    fn failure_steps_by_error() {
        assert_eq!(
            failure_step(&ProvisionError::resource("nic_creation_failed", "x")),
            "nic_creation_failed"
        );
        assert_eq!(
            failure_step(&ProvisionError::Configuration("no creds".into())),
            "configuration_error"
        );
        let delegation = ProvisionError::Delegation {
            zone: "example.com".into(),
            message: "mismatch".into(),
        };
        assert_eq!(failure_step(&delegation), "ns_delegation_failed");
    }
}
