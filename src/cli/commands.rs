//! CLI command implementations
//!
//! Each command builds its own runtime; errors are reported as strings the
//! way `run` prints them.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;

use crate::config::{default_config_path, CoreConfig};
use crate::layout::WorkspaceKey;
use crate::logging::init_logging;
use crate::transport::{self, ipc, Backend, TransportKind};
use crate::util::app_data_dir;

pub fn init_cli_logging() -> Option<WorkerGuard> {
    let data_dir = app_data_dir().ok()?;
    init_logging(&data_dir, "canopy-cli.log")
}

fn config_file(explicit: Option<PathBuf>) -> Result<PathBuf, String> {
    match explicit {
        Some(path) => Ok(path),
        None => default_config_path().map_err(|e| e.to_string()),
    }
}

fn load_config(explicit: Option<PathBuf>, kind: Option<TransportKind>) -> Result<CoreConfig, String> {
    let path = config_file(explicit)?;
    let mut config = CoreConfig::load(&path);
    if kind.is_some() {
        config.transport = kind;
    }
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {e}"))
}

async fn connect_backend(config: CoreConfig) -> Result<Backend, String> {
    let resolved = config.resolve().await;
    let transport = transport::connect(&resolved).await.map_err(|e| e.to_string())?;
    Ok(Backend::new(transport))
}

/// Show which transport would be used
pub fn probe(explicit: Option<PathBuf>, kind: Option<TransportKind>) -> Result<(), String> {
    let config = load_config(explicit, kind)?;
    let forced = config.transport.is_some();
    let port = ipc::discover_port(&config);

    let resolved = runtime()?.block_on(config.resolve());
    println!(
        "Transport: {} ({})",
        resolved.transport,
        if forced { "configured" } else { "probed" }
    );
    match port {
        Some(port) => println!("  IPC port: {}", port),
        None => println!("  IPC port: not found"),
    }
    println!("  HTTP:     {}", resolved.config.http_base_url);
    println!("  WS:       {}", transport::ws::ws_url(&resolved.config));
    Ok(())
}

/// Print the cached layout for a workspace
pub fn state_get(
    explicit: Option<PathBuf>,
    kind: Option<TransportKind>,
    workspace: String,
    worktree: Option<String>,
) -> Result<(), String> {
    let config = load_config(explicit, kind)?;
    let key = WorkspaceKey::new(workspace, worktree);

    runtime()?.block_on(async move {
        let backend = connect_backend(config).await?;
        let state = backend
            .get_terminal_state(&key)
            .await
            .map_err(|e| e.to_string())?;
        match state {
            Some(layout) => {
                let json = serde_json::to_string_pretty(&layout).map_err(|e| e.to_string())?;
                println!("{}", json);
            }
            None => println!("No cached layout for {}", key),
        }
        Ok(())
    })
}

/// Print layout broadcasts as they arrive, until Ctrl+C
pub fn state_watch(
    explicit: Option<PathBuf>,
    kind: Option<TransportKind>,
    workspace: String,
    worktree: Option<String>,
) -> Result<(), String> {
    let config = load_config(explicit, kind)?;
    let key = WorkspaceKey::new(workspace, worktree);

    runtime()?.block_on(async move {
        let backend = connect_backend(config).await?;
        let mut subscription = backend.subscribe_terminal_state(&key);
        println!("--- Watching {} (Ctrl+C to stop) ---", key);

        loop {
            tokio::select! {
                message = subscription.recv() => {
                    let Some(message) = message else {
                        return Err("Stream closed".to_string());
                    };
                    let json = serde_json::to_string(&message).map_err(|e| e.to_string())?;
                    println!("{}", json);
                }
                _ = tokio::signal::ctrl_c() => return Ok(()),
            }
        }
    })
}

/// Print the effective configuration
pub fn config_show(explicit: Option<PathBuf>) -> Result<(), String> {
    let config = load_config(explicit, None)?;
    let json = serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

/// Print the config file location
pub fn config_path(explicit: Option<PathBuf>) -> Result<(), String> {
    let path = config_file(explicit)?;
    println!("{}", path.display());
    Ok(())
}

/// Write a default config file
pub fn config_init(explicit: Option<PathBuf>, force: bool) -> Result<(), String> {
    let path = config_file(explicit)?;
    if path.exists() && !force {
        return Err(format!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        ));
    }
    CoreConfig::default().save(&path).map_err(|e| e.to_string())?;
    println!("Wrote {}", path.display());
    Ok(())
}
