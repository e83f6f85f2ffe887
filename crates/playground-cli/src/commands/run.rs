//! Run command - Boot a full playground session on the local machine

use super::{load_workspace, sandbox_dir};
use crate::config::SettingsManager;
use crate::local::{FileSnapshotStore, LocalFs, PtyProcessHost, StdioTerminal, TeeSurface};
use anyhow::{Context, Result};
use colored::Colorize;
use playground_core::memory::MemoryEditor;
use playground_core::{autosave, Collaborators, Playground, PrepareStatus, SandboxGate, ShellSpec};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RunOptions {
    pub workspace: PathBuf,
    pub dir: Option<PathBuf>,
    /// Start from the last autosave instead of the scaffold
    pub restore: bool,
    /// Index of the shell to open
    pub shell: usize,
}

pub async fn execute(options: RunOptions) -> Result<()> {
    let config = SettingsManager::load()?;
    let scaffold = load_workspace(&options.workspace)?;
    let dir = sandbox_dir(options.dir)?;
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create sandbox directory {:?}", dir))?;

    let snapshots = Arc::new(FileSnapshotStore::new(SettingsManager::autosave_dir()?));
    let key = scaffold.name().to_string();
    let workspace = if options.restore {
        let fallback = scaffold.clone();
        autosave::restore(snapshots.as_ref(), &key, move || fallback).await
    } else {
        scaffold
    };

    let shell = workspace
        .shells()
        .get(options.shell)
        .cloned()
        .unwrap_or_else(ShellSpec::new);

    info!("Running '{}' in {:?}", workspace.name(), dir);
    let gate = SandboxGate::new();
    let stdio: Arc<StdioTerminal> = Arc::new(StdioTerminal::new());
    let playground = Playground::boot(
        config,
        &gate,
        workspace,
        Collaborators {
            fs: Arc::new(LocalFs::new(&dir)),
            processes: Arc::new(PtyProcessHost::new(&dir)),
            editor: Arc::new(MemoryEditor::new()),
            snapshots: Some(snapshots),
            prepare_output: Some(stdio.clone()),
        },
    )
    .await?;

    match playground.prepared().await {
        PrepareStatus::Finished(0) | PrepareStatus::Skipped => {}
        PrepareStatus::Finished(code) => {
            println!("{} Prepare command exited with {}", "⚠️".yellow(), code);
        }
        PrepareStatus::Failed(reason) => {
            println!("{} Prepare command failed: {}", "⚠️".yellow(), reason);
        }
        status => warn!("Unexpected prepare status: {:?}", status),
    }

    let (tee, copies) = TeeSurface::new(stdio);
    playground.attach_trace(copies);
    println!(
        "{} Opening {} (exit the shell to stop)",
        "▶".green(),
        shell.display_label().cyan()
    );
    let mut terminal = playground.open_terminal(&shell, Arc::new(tee)).await?;

    let code = tokio::select! {
        code = terminal.wait() => Some(code?),
        _ = tokio::signal::ctrl_c() => None,
    };
    terminal.close().await?;

    println!();
    match code {
        Some(code) => println!("{} Shell exited with {}", "✓".green(), code),
        None => println!("{} Interrupted", "✓".green()),
    }
    super::trace::print_forest(&playground.trace().get());

    playground.shutdown().await;
    Ok(())
}
