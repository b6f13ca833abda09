//! Setup-script preview: `skyforge render`.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::Path;

use skyforge::config::SkyforgeConfig;
use skyforge::orchestrator::BlueprintRegistry;
use skyforge::staging::{RemoteReporting, render_script};

/// Split `KEY=VALUE` arguments. Later keys win.
pub fn parse_params(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .with_context(|| format!("Invalid --param '{}': expected KEY=VALUE", item))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid --param '{}': empty key", item);
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

pub fn cmd_render(
    config_path: &Path,
    blueprint: &str,
    raw_params: &[String],
    hook_url: Option<&str>,
) -> Result<()> {
    let config = SkyforgeConfig::load_or_default(config_path)?;
    let registry = BlueprintRegistry::from_config(&config);
    let Some(bp) = registry.get(blueprint) else {
        bail!(
            "Unknown blueprint '{}'. Available: {}",
            blueprint,
            registry.names().join(", ")
        );
    };
    let Some(template) = bp.script_template else {
        bail!("Blueprint '{}' has no setup script", bp.name);
    };

    let params = parse_params(raw_params)?;
    let reporting = RemoteReporting {
        webhook_url: hook_url.unwrap_or_default().to_string(),
        target_key: bp.target_key.clone(),
        resource_group: params.get("RESOURCE_GROUP").cloned().unwrap_or_default(),
        location: params.get("LOCATION").cloned().unwrap_or_default(),
    };
    print!("{}", render_script(template, &params, &reporting));
    Ok(())
}
