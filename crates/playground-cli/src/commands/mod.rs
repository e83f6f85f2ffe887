//! CLI commands

pub mod config;
pub mod mount;
pub mod run;
pub mod share;
pub mod trace;

use anyhow::{Context, Result};
use playground_core::{Workspace, WorkspaceSnapshot};
use std::path::{Path, PathBuf};

/// Read a workspace scaffold from YAML, or JSON when the file ends in `.json`
pub fn load_workspace(path: &Path) -> Result<Workspace> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workspace {:?}", path))?;
    let snapshot: WorkspaceSnapshot = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid workspace JSON in {:?}", path))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid workspace YAML in {:?}", path))?
    };
    Ok(Workspace::from_snapshot(snapshot))
}

/// Sandbox directory for a command, defaulting to the one under the playground home
pub fn sandbox_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => crate::config::SettingsManager::sandbox_dir(),
    }
}
