use std::fs;

use anyhow::{Result, bail};
use shared::config::Config;

/// Generates a configuration file with every default spelled out.
///
/// # Arguments
/// * `format` - The format of the configuration file ("yaml" or "json").
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str) -> Result<()> {
    let config = Config::with_defaults();
    let (file_name, serialized) = match format {
        "yaml" => ("config.yaml", serde_yml::to_string(&config)?),
        "json" => ("config.json", serde_json::to_string_pretty(&config)?),
        _ => bail!("Unsupported format. Use 'yaml' or 'json'."),
    };

    fs::write(file_name, serialized)?;

    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}
