//! Playground CLI
//!
//! Mounts workspace scaffolds into a local sandbox directory, runs them under
//! a pseudo-terminal and renders the call trees their output carries.

mod commands;
mod config;
mod local;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "playground")]
#[command(author, version, about = "Playground - Run workspace scaffolds in a local sandbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a workspace scaffold into the sandbox directory
    Mount {
        /// Workspace file (YAML or JSON)
        workspace: PathBuf,

        /// Sandbox directory (defaults to ~/.playground/sandbox)
        #[arg(short, long, env = "PLAYGROUND_SANDBOX")]
        dir: Option<PathBuf>,
    },

    /// Boot a session: mount, prepare, open a shell and collect traces
    Run {
        /// Workspace file (YAML or JSON)
        workspace: PathBuf,

        /// Sandbox directory (defaults to ~/.playground/sandbox)
        #[arg(short, long, env = "PLAYGROUND_SANDBOX")]
        dir: Option<PathBuf>,

        /// Start from the last autosave of this workspace
        #[arg(short, long)]
        restore: bool,

        /// Which of the workspace's shells to open
        #[arg(short, long, default_value_t = 0)]
        shell: usize,
    },

    /// Render call trees from captured program output
    Trace {
        /// File holding the output
        file: PathBuf,

        /// Print the forest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encode and decode share codes
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ShareAction {
    /// Print the share code for a workspace file
    Encode { workspace: PathBuf },
    /// Turn a share code back into a workspace file
    Decode {
        code: String,

        /// Write the workspace here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Reset to default configuration
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "playground_cli=debug,playground_core=debug"
        } else {
            "playground_cli=info,playground_core=warn"
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    info!("Starting Playground CLI");

    let result = match cli.command {
        Commands::Mount { workspace, dir } => commands::mount::execute(workspace, dir).await,
        Commands::Run {
            workspace,
            dir,
            restore,
            shell,
        } => {
            commands::run::execute(commands::run::RunOptions {
                workspace,
                dir,
                restore,
                shell,
            })
            .await
        }
        Commands::Trace { file, json } => commands::trace::execute(file, json).await,
        Commands::Share { action } => match action {
            ShareAction::Encode { workspace } => commands::share::encode(workspace).await,
            ShareAction::Decode { code, output } => commands::share::decode(&code, output).await,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show().await,
            ConfigAction::Reset => commands::config::reset().await,
        },
    };

    if let Err(ref e) = result {
        error!("Command failed: {}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    result
}
