use std::path::Path;

use crate::error::ConfigError;

use super::schema::OrchestratorConfig;

/// Read, parse and validate a JSON config file.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let config: OrchestratorConfig = serde_json::from_str(&raw)?;
    config.validate()?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
}
