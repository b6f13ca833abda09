//! HTTP service command: `skyforge serve`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use skyforge::config::{ResolverMode, SkyforgeConfig};
use skyforge::credentials::EnvCredentials;
use skyforge::dns::{DohResolver, NameServerResolver, StaticResolver};
use skyforge::lifecycle::MemoryCloud;
use skyforge::lifecycle::memory::ZONE_NAME_SERVERS;
use skyforge::orchestrator::{BlueprintRegistry, Collaborators, Provisioner};
use skyforge::server::{self, AppState};
use skyforge::staging::MemoryObjectStore;

pub async fn cmd_serve(config_path: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = SkyforgeConfig::load_or_default(config_path)?;
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let resolver: Arc<dyn NameServerResolver> = match config.dns.resolver {
        ResolverMode::Simulated => Arc::new(StaticResolver::always(&ZONE_NAME_SERVERS[..])),
        ResolverMode::Doh => Arc::new(DohResolver::new(config.dns.doh_endpoint.clone())),
    };
    let notifier = skyforge::notify::from_config(&config.notify)
        .context("Failed to configure notifications")?;

    let provisioner = Provisioner::from_config(
        Collaborators {
            cloud: Arc::new(MemoryCloud::new()),
            store: Arc::new(MemoryObjectStore::new()),
            credentials: Arc::new(EnvCredentials::new(config.credentials.clone())),
            resolver,
            notifier,
        },
        &config,
    );
    info!(
        resolver = %config.dns.resolver,
        notify = ?config.notify.mode,
        "Using the simulated cloud backend"
    );

    let state = Arc::new(AppState::new(
        BlueprintRegistry::from_config(&config),
        provisioner,
    ));
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    server::serve(state, &host, port).await
}
