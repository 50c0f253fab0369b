use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::{
    DEFAULT_BROADCAST_INTERVAL_MS, DEFAULT_HTTP_BASE_URL, DEFAULT_NUDGE_DELAY_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECONNECT_INITIAL_MS, DEFAULT_RECONNECT_MAX_MS,
    DEFAULT_RESIZE_DEBOUNCE_MS, ENV_HTTP_URL, ENV_IPC_PORT, ENV_TRANSPORT, ENV_WS_URL,
};
use crate::error::Result;
use crate::resize::PanelConfig;
use crate::session::{CellMetrics, ReadMode};
use crate::transport::{ipc, TransportKind};
use crate::util::{app_config_dir, atomic_write};

/// Core settings, persisted as `config.json` in the app config directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Forced transport; probed at startup when unset
    pub transport: Option<TransportKind>,
    pub ipc_port: Option<u16>,
    pub http_base_url: String,
    /// Derived from `http_base_url` when unset
    pub ws_url: Option<String>,
    pub read_mode: ReadMode,
    pub broadcast_interval_ms: u64,
    pub resize_debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub nudge_delay_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub panel: PanelConfig,
    pub cell: CellMetrics,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            transport: None,
            ipc_port: None,
            http_base_url: DEFAULT_HTTP_BASE_URL.to_string(),
            ws_url: None,
            read_mode: ReadMode::default(),
            broadcast_interval_ms: DEFAULT_BROADCAST_INTERVAL_MS,
            resize_debounce_ms: DEFAULT_RESIZE_DEBOUNCE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            nudge_delay_ms: DEFAULT_NUDGE_DELAY_MS,
            reconnect_initial_ms: DEFAULT_RECONNECT_INITIAL_MS,
            reconnect_max_ms: DEFAULT_RECONNECT_MAX_MS,
            panel: PanelConfig::default(),
            cell: CellMetrics::default(),
        }
    }
}

/// Default location of `config.json`.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join("config.json"))
}

impl CoreConfig {
    /// Read the file, falling back to defaults when it is missing or
    /// corrupt, then apply environment overrides.
    pub fn load(path: &Path) -> Self {
        let mut config = Self::load_file(path);
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config
    }

    fn load_file(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str::<CoreConfig>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    warn!("Corrupt config {}: {}", path.display(), e);
                }
            }
        }
        CoreConfig::default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(path, json.as_bytes())?;
        Ok(())
    }

    /// Apply `CANOPY_*` overrides. Unparseable values are ignored with a
    /// warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_TRANSPORT) {
            match value.parse() {
                Ok(kind) => self.transport = Some(kind),
                Err(err) => warn!(var = ENV_TRANSPORT, value = %value, error = %err, "ignoring override"),
            }
        }
        if let Some(value) = lookup(ENV_IPC_PORT) {
            match value.trim().parse() {
                Ok(port) => self.ipc_port = Some(port),
                Err(err) => warn!(var = ENV_IPC_PORT, value = %value, error = %err, "ignoring override"),
            }
        }
        if let Some(value) = lookup(ENV_HTTP_URL).filter(|v| !v.trim().is_empty()) {
            self.http_base_url = value.trim().to_string();
        }
        if let Some(value) = lookup(ENV_WS_URL).filter(|v| !v.trim().is_empty()) {
            self.ws_url = Some(value.trim().to_string());
        }
    }

    /// Probe the transport once. The result is never re-checked.
    pub async fn resolve(self) -> ResolvedConfig {
        let transport = TransportKind::probe(&self).await;
        let ipc_port = ipc::discover_port(&self);
        info!(transport = %transport, ipc_port = ?ipc_port, "transport resolved");
        ResolvedConfig {
            config: self,
            transport,
            ipc_port,
        }
    }
}

/// Configuration with the startup probe applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: CoreConfig,
    pub transport: TransportKind,
    pub ipc_port: Option<u16>,
}
