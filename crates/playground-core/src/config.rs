//! Engine configuration

use crate::Result;
use playground_types::DEFAULT_LANGUAGE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundConfig {
    /// Extension every source file name must end with
    pub required_extension: String,
    pub default_language: String,
    /// Shell used for terminals and the prepare command
    pub shell: String,
    pub editor: EditorConfig,
    pub terminal: TerminalConfig,
    pub sandbox: SandboxConfig,
    pub store: StoreConfig,
    pub autosave: AutosaveConfig,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            required_extension: ".ts".to_string(),
            default_language: DEFAULT_LANGUAGE.to_string(),
            shell: "sh".to_string(),
            editor: EditorConfig::default(),
            terminal: TerminalConfig::default(),
            sandbox: SandboxConfig::default(),
            store: StoreConfig::default(),
            autosave: AutosaveConfig::default(),
        }
    }
}

impl PlaygroundConfig {
    /// Load from YAML, or JSON when the file ends in `.json`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::PlaygroundError::from_io(e, &path.display().to_string()))?;
        let config = if is_json(path) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Quiet period before buffered edits are written back
    pub debounce_ms: u64,
    pub resolve_attempts: u32,
    pub resolve_interval_ms: u64,
    pub write_retry_interval_ms: u64,
    /// Upper bound for the final write when a file is deselected
    pub flush_timeout_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            resolve_attempts: 5,
            resolve_interval_ms: 100,
            write_retry_interval_ms: 250,
            flush_timeout_ms: 5000,
        }
    }
}

impl EditorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn resolve_interval(&self) -> Duration {
        Duration::from_millis(self.resolve_interval_ms)
    }

    pub fn write_retry_interval(&self) -> Duration {
        Duration::from_millis(self.write_retry_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub resize_debounce_ms: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            resize_debounce_ms: 100,
        }
    }
}

impl TerminalConfig {
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub acquire_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 10_000,
        }
    }
}

impl SandboxConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 0 disables idle teardown
    pub idle_ttl_ms: u64,
}

impl StoreConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_ms > 0).then(|| Duration::from_millis(self.idle_ttl_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 1000,
        }
    }
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: PlaygroundConfig = serde_yaml::from_str("editor:\n  debounce_ms: 50\n").unwrap();
        assert_eq!(config.editor.debounce(), Duration::from_millis(50));
        assert_eq!(config.editor.resolve_attempts, 5);
        assert_eq!(config.required_extension, ".ts");
        assert_eq!(config.store.idle_ttl(), None);
    }

    #[test]
    fn test_save_and_load_by_extension() {
        let dir = TempDir::new().unwrap();
        let mut config = PlaygroundConfig::default();
        config.shell = "bash".into();

        for name in ["config.yaml", "config.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            assert_eq!(PlaygroundConfig::load(&path).unwrap(), config);
        }

        let missing = dir.path().join("missing.yaml");
        assert_eq!(
            PlaygroundConfig::load_or_default(&missing).unwrap(),
            PlaygroundConfig::default()
        );
    }
}
