//! Canopy CLI - inspect the terminal core from the command line
//!
//! Usage:
//!   canopy-cli probe [--transport native|websocket] [--config <path>]
//!   canopy-cli state get <workspace> [--worktree <name>]
//!   canopy-cli state watch <workspace> [--worktree <name>]
//!   canopy-cli config show|path|init [--force]

fn main() {
    canopy_lib::cli::run();
}
