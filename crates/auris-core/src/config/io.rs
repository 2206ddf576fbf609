//! Generic configuration file I/O
//!
//! YAML loading and saving for any serialisable configuration type. A
//! missing file yields the type's defaults so a fresh install runs
//! without any setup; an unreadable or unparsable file logs a warning
//! and also falls back to defaults. Range validation happens separately
//! on the loaded values.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from a YAML file, or defaults when absent or
/// unreadable
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("Config file {:?} not found, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => {
                log::info!("Loaded configuration from {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("Failed to parse config file {:?}: {e}, using defaults", path);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {:?}: {e}, using defaults", path);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialise config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file {:?}", path))?;
    Ok(())
}
