//! CLI module for Canopy
//!
//! Inspects transport selection, the backend's terminal-state cache and the
//! core configuration.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::transport::TransportKind;

/// Canopy - worktree terminal core
#[derive(Parser)]
#[command(name = "canopy", version, about = "Canopy terminal core CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config.json (defaults to the app config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Force a transport instead of probing (native or websocket)
    #[arg(long, global = true)]
    pub transport: Option<TransportKind>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which transport would be used and why
    Probe,
    /// Inspect the backend's terminal layout cache
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Manage the core configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum StateAction {
    /// Print the cached layout for a workspace
    Get {
        /// Workspace path
        workspace: String,
        /// Worktree name (omit for the main workspace)
        #[arg(short, long)]
        worktree: Option<String>,
    },
    /// Print layout broadcasts for a workspace as they arrive
    Watch {
        /// Workspace path
        workspace: String,
        /// Worktree name (omit for the main workspace)
        #[arg(short, long)]
        worktree: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the CLI
pub fn run() {
    let cli = Cli::parse();
    let _log_guard = commands::init_cli_logging();

    let result = match cli.command {
        Commands::Probe => commands::probe(cli.config, cli.transport),
        Commands::State { action } => match action {
            StateAction::Get { workspace, worktree } => {
                commands::state_get(cli.config, cli.transport, workspace, worktree)
            }
            StateAction::Watch { workspace, worktree } => {
                commands::state_watch(cli.config, cli.transport, workspace, worktree)
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(cli.config),
            ConfigAction::Path => commands::config_path(cli.config),
            ConfigAction::Init { force } => commands::config_init(cli.config, force),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
