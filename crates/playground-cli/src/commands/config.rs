//! Config command - Inspect and reset playground configuration

use crate::config::SettingsManager;
use anyhow::{Context, Result};
use colored::Colorize;
use playground_core::PlaygroundConfig;

/// Show the effective configuration
pub async fn show() -> Result<()> {
    let config = SettingsManager::load().context("Failed to load config")?;
    let path = SettingsManager::config_path()?;

    println!("{}", "Playground Configuration".bold().underline());
    println!("  File: {}", path.display().to_string().dimmed());
    if !path.exists() {
        println!("{}", "  (not written yet, showing defaults)".yellow().dimmed());
    }
    println!();

    println!("{}", "Workspace:".cyan().bold());
    println!("  Extension: {}", config.required_extension);
    println!("  Language:  {}", config.default_language);
    println!("  Shell:     {}", config.shell);
    println!();

    println!("{}", "Editor:".cyan().bold());
    println!("  Debounce:        {}ms", config.editor.debounce_ms);
    println!("  Flush timeout:   {}ms", config.editor.flush_timeout_ms);
    println!();

    println!("{}", "Autosave:".cyan().bold());
    let state = if config.autosave.enabled {
        "enabled".green()
    } else {
        "disabled".red()
    };
    println!("  State:    {}", state);
    println!("  Debounce: {}ms", config.autosave.debounce_ms);

    Ok(())
}

/// Write the default configuration, replacing any existing file
pub async fn reset() -> Result<()> {
    let path = SettingsManager::save(&PlaygroundConfig::default())?;
    println!("{} Configuration reset: {}", "✓".green(), path.display());
    Ok(())
}
