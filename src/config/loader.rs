use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::types::NotewrightConfig;

pub const APP_NAME: &str = "notewright";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Returns the default path to the configuration file.
pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not find config directory"))?
        .join(APP_NAME);
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

pub fn get_config_path_or_default(override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            log::debug!("Using override config path: {}", path.display());
            Ok(path.to_path_buf())
        }
        None => get_config_path(),
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
}

/// Loads the configuration from `override_path` or the default location and
/// applies environment overrides. A missing file yields the defaults.
pub fn load_config(override_path: Option<&Path>) -> Result<NotewrightConfig> {
    let path = get_config_path_or_default(override_path)?;
    let mut config = load_config_from_path(&path)?;
    config.apply_env_overrides();
    Ok(config)
}

/// Loads the configuration from `path` without environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<NotewrightConfig> {
    if !path.exists() {
        log::info!("Config file not found at '{}'. Using defaults.", path.display());
        return Ok(NotewrightConfig::default());
    }

    log::debug!("Loading config from '{}'", path.display());
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = if is_json(path) {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config file: {}", path.display()))?
    } else {
        toml::from_str(&content).with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?
    };
    Ok(config)
}

pub fn save_config_to_path(config: &NotewrightConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
    }

    let content = if is_json(path) {
        serde_json::to_string_pretty(config).context("Failed to serialize config to JSON")?
    } else {
        toml::to_string_pretty(config).context("Failed to serialize config to TOML")?
    };

    fs::write(path, content).with_context(|| format!("Failed to write config file: {}", path.display()))?;
    log::debug!("Configuration saved to '{}'", path.display());
    Ok(())
}

/// Writes a default configuration unless one already exists. Returns the path
/// and whether a file was created.
pub fn init_config(override_path: Option<&Path>) -> Result<(PathBuf, bool)> {
    let path = get_config_path_or_default(override_path)?;
    if path.exists() {
        return Ok((path, false));
    }
    save_config_to_path(&NotewrightConfig::default(), &path)?;
    log::info!("Created default configuration at '{}'", path.display());
    Ok((path, true))
}
