//! Configuration management

use anyhow::{Context, Result};
use playground_core::PlaygroundConfig;
use std::path::PathBuf;

pub struct SettingsManager;

impl SettingsManager {
    /// Get the playground home directory (~/.playground)
    pub fn playground_home() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("PLAYGROUND_HOME") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".playground"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::playground_home()?.join("config.yaml"))
    }

    /// Directory holding one encoded snapshot per workspace
    pub fn autosave_dir() -> Result<PathBuf> {
        Ok(Self::playground_home()?.join("autosave"))
    }

    /// Default directory a workspace is mounted into on this machine
    pub fn sandbox_dir() -> Result<PathBuf> {
        Ok(Self::playground_home()?.join("sandbox"))
    }

    /// Load the config, falling back to defaults when there is no file
    pub fn load() -> Result<PlaygroundConfig> {
        let path = Self::config_path()?;
        PlaygroundConfig::load_or_default(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))
    }

    pub fn save(config: &PlaygroundConfig) -> Result<PathBuf> {
        let path = Self::config_path()?;
        config
            .save(&path)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        Ok(path)
    }
}
