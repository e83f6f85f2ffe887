//! Mount command - Write a workspace scaffold into a local sandbox directory

use super::{load_workspace, sandbox_dir};
use crate::local::LocalFs;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

pub async fn execute(workspace: PathBuf, dir: Option<PathBuf>) -> Result<()> {
    let workspace = load_workspace(&workspace)?;
    let dir = sandbox_dir(dir)?;
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create sandbox directory {:?}", dir))?;

    info!("Mounting '{}' into {:?}", workspace.name(), dir);
    let fs = LocalFs::new(&dir);
    playground_core::mount::mount(&fs, &workspace).await?;

    let files = workspace.file_paths().count();
    println!(
        "{} Mounted {} ({} files) at {}",
        "✓".green(),
        workspace.name().cyan(),
        files,
        dir.join(workspace.name()).display()
    );
    Ok(())
}
