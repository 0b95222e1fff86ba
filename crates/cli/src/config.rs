use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use quay_core::{load_dotenv, DispatchConfig};

/// Load the dispatcher config from `path`, or from defaults plus `QUAY_*`
/// environment variables. `.env` is read first in both cases.
pub fn load(path: Option<&Path>) -> Result<DispatchConfig> {
    load_dotenv();
    let config = match path {
        Some(path) => {
            debug!(config_path = %path.display(), "Loading config");
            DispatchConfig::from_file(path)
                .with_context(|| format!("failed to load config: {}", path.display()))?
        }
        None => {
            debug!("No config file given, using defaults and environment");
            DispatchConfig::from_env().context("invalid dispatcher settings in environment")?
        }
    };
    config.log_summary();
    Ok(config)
}

/// Pretty-printed JSON of the effective config.
pub fn render(config: &DispatchConfig) -> Result<String> {
    serde_json::to_string_pretty(&config.to_json()).context("failed to serialize config")
}
