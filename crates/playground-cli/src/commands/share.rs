//! Share command - Encode a workspace into a share code and back

use super::load_workspace;
use anyhow::{Context, Result};
use colored::Colorize;
use playground_core::codec;
use std::path::PathBuf;

pub async fn encode(workspace: PathBuf) -> Result<()> {
    let workspace = load_workspace(&workspace)?;
    let code = codec::encode(&workspace)?;
    println!("{}", code);
    Ok(())
}

pub async fn decode(code: &str, output: Option<PathBuf>) -> Result<()> {
    let workspace = codec::decode(code.trim()).context("Invalid share code")?;
    let yaml = serde_yaml::to_string(&workspace.to_snapshot())?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, yaml)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!(
                "{} Wrote {} to {}",
                "✓".green(),
                workspace.name().cyan(),
                path.display()
            );
        }
        None => print!("{}", yaml),
    }
    Ok(())
}
