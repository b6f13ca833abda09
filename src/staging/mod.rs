//! Setup-script staging.
//!
//! Renders a blueprint's script template, uploads it as `<target>-setup.sh`
//! and hands back a short-lived read-only URL for the run-script extension.
//! Nothing here executes the script.

pub mod render;
pub mod store;

pub use render::render;
pub use store::{MemoryObjectStore, ObjectLocation, ObjectStore, SignedUrl};

use crate::config::StagingSection;
use crate::errors::CloudError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const APP_VM_TEMPLATE: &str = include_str!("templates/app_vm.sh");
pub const PLAIN_VM_TEMPLATE: &str = include_str!("templates/plain_vm.sh");

/// Token the stager fills with the `notify_webhook` shell function.
pub const WEBHOOK_FUNCTION_TOKEN: &str = "WEBHOOK_FUNCTION";

/// Identity the remote script reports under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReporting {
    pub webhook_url: String,
    pub target_key: String,
    pub resource_group: String,
    pub location: String,
}

/// Shell function `notify_webhook STATUS STEP MESSAGE` posting the same JSON
/// shape the orchestrator sends. A no-op when there is no webhook.
pub fn webhook_function(reporting: &RemoteReporting) -> String {
    if reporting.webhook_url.trim().is_empty() {
        return "notify_webhook() { return 0; }".to_string();
    }
    format!(
        r#"WEBHOOK_URL="{url}"
notify_webhook() {{
    local status="$1"
    local step="$2"
    local message="$3"
    JSON_PAYLOAD=$(cat <<EOF
{{
  "{key}": "$(hostname)",
  "status": "$status",
  "resource_group": "{rg}",
  "location": "{location}",
  "details": {{
    "step": "$step",
    "message": "$message",
    "timestamp": "$(date -u +'%Y-%m-%dT%H:%M:%SZ')"
  }}
}}
EOF
    )
    curl -s -X POST "$WEBHOOK_URL" -H "Content-Type: application/json" -d "$JSON_PAYLOAD" --connect-timeout 10 --max-time 30 --retry 2 --retry-delay 5 --output /dev/null || true
}}"#,
        url = reporting.webhook_url,
        key = reporting.target_key,
        rg = reporting.resource_group,
        location = reporting.location,
    )
}

/// Render `template` with the webhook function injected ahead of the caller's
/// parameters.
pub fn render_script(
    template: &str,
    params: &BTreeMap<String, String>,
    reporting: &RemoteReporting,
) -> String {
    let mut params = params.clone();
    params.insert(
        WEBHOOK_FUNCTION_TOKEN.to_string(),
        webhook_function(reporting),
    );
    render(template, &params)
}

pub fn object_name(target_name: &str) -> String {
    format!("{}-setup.sh", target_name)
}

/// An uploaded script and its fetch URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedScript {
    pub location: ObjectLocation,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub size: usize,
}

#[derive(Clone)]
pub struct ScriptStager {
    store: Arc<dyn ObjectStore>,
    container: String,
    ttl: Duration,
}

impl ScriptStager {
    pub fn new(store: Arc<dyn ObjectStore>, settings: &StagingSection) -> Self {
        Self {
            store,
            container: settings.container.clone(),
            ttl: settings.url_ttl(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Render, upload (overwriting) and sign. `account` is the storage account
    /// the object goes into.
    pub async fn stage(
        &self,
        account: &str,
        target_name: &str,
        template: &str,
        params: &BTreeMap<String, String>,
        reporting: &RemoteReporting,
    ) -> Result<StagedScript, CloudError> {
        let script = render_script(template, params, reporting);
        let location = ObjectLocation::new(account, &self.container, object_name(target_name));
        let size = script.len();

        debug!(%location, size, "Uploading setup script");
        self.store.put(&location, script.into_bytes()).await?;
        let signed = self.store.signed_url(&location, self.ttl).await?;
        info!(%location, expires_at = %signed.expires_at, "Setup script staged");

        Ok(StagedScript {
            location,
            url: signed.url,
            expires_at: signed.expires_at,
            size,
        })
    }

    /// Remove a staged script. Already removed counts as success.
    pub async fn remove(&self, staged: &StagedScript) -> Result<(), CloudError> {
        match self.store.delete(&staged.location).await {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }
}
