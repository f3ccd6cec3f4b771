//! Show the effective configuration.

use mixcast_common::config::{config_file_path, EngineConfig};

pub fn run(config: &EngineConfig) -> anyhow::Result<()> {
    let path = config_file_path();
    println!(
        "Config file: {} ({})",
        path.display(),
        if path.exists() { "found" } else { "not found, using defaults" }
    );
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
