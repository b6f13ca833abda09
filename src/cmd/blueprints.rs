//! Blueprint listing: `skyforge blueprints`.

use anyhow::Result;
use std::path::Path;

use skyforge::config::SkyforgeConfig;
use skyforge::orchestrator::BlueprintRegistry;

pub fn cmd_blueprints(config_path: &Path) -> Result<()> {
    let config = SkyforgeConfig::load_or_default(config_path)?;
    let registry = BlueprintRegistry::from_config(&config);

    for bp in registry.all() {
        println!("{}", bp.name);
        println!("  {}", bp.description);
        let plan: Vec<&str> = bp.plan.iter().map(|p| p.as_str()).collect();
        println!("  plan: {}", plan.join(" -> "));
        println!("  target: {}   size field: {}", bp.target_key, bp.size_field);
        if let Some(size) = &bp.default_size {
            println!("  default size: {}", size);
        }
        if !bp.ports.is_empty() {
            let ports: Vec<String> = bp.ports.iter().map(u16::to_string).collect();
            println!("  ports: {}", ports.join(", "));
        }
        println!();
    }
    Ok(())
}
