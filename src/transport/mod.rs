pub mod backend;
pub mod ipc;
pub mod loopback;
pub mod protocol;
pub mod subscription;
pub mod ws;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::config::{CoreConfig, ResolvedConfig};
use crate::error::{Error, Result};
use crate::layout::{TerminalStateMessage, WorkspaceKey};
use crate::session::SessionId;

pub use backend::Backend;
pub use ipc::IpcTransport;
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use protocol::{BackendEvent, BackendRequest, BackendResponse, StreamChannel};
pub use subscription::Subscription;
pub use ws::WsTransport;

/// Which backend bridge this process talks through. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Desktop client: newline-delimited JSON over the backend's local socket
    Native,
    /// Browser client: HTTP commands plus one multiplexed WebSocket
    #[serde(rename = "websocket")]
    WebSocket,
}

impl TransportKind {
    /// Explicit configuration wins; otherwise use the native bridge when the
    /// backend's IPC port answers, else fall back to the browser transport.
    pub async fn probe(config: &CoreConfig) -> Self {
        if let Some(kind) = config.transport {
            return kind;
        }
        match ipc::discover_port(config) {
            Some(port) if ipc::probe_port(port).await => TransportKind::Native,
            _ => TransportKind::WebSocket,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Native => f.write_str("native"),
            TransportKind::WebSocket => f.write_str("websocket"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "native" | "ipc" => Ok(TransportKind::Native),
            "websocket" | "ws" | "web" => Ok(TransportKind::WebSocket),
            other => Err(Error::Config(format!("Unknown transport: {other}"))),
        }
    }
}

/// Connection state for the backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Backend reachable, streams live
    Connected,
    /// Connection lost; streams are silent until it comes back
    Disconnected,
    Connecting,
}

/// Generic backend bridge: request/response commands plus duplex streams.
///
/// Subscribing never fails at the call site. A subscription the transport
/// could not establish is logged and yields nothing.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn call(&self, request: BackendRequest) -> Result<BackendResponse>;

    fn subscribe_output(&self, session_id: &SessionId) -> Subscription<String>;

    fn subscribe_terminal_state(&self, key: &WorkspaceKey) -> Subscription<TerminalStateMessage>;

    async fn write_stream(&self, session_id: &SessionId, data: &str) -> Result<()>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}

/// Build the transport the resolved configuration selected.
pub async fn connect(resolved: &ResolvedConfig) -> Result<Arc<dyn Transport>> {
    info!(transport = %resolved.transport, "connecting backend transport");
    match resolved.transport {
        TransportKind::Native => {
            let port = resolved
                .ipc_port
                .ok_or_else(|| Error::Transport("Backend IPC port not found".into()))?;
            let transport = IpcTransport::connect(port).await?;
            Ok(Arc::new(transport))
        }
        TransportKind::WebSocket => {
            let transport = WsTransport::connect(&resolved.config)?;
            Ok(Arc::new(transport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parses_aliases() {
        assert_eq!("IPC".parse::<TransportKind>().unwrap(), TransportKind::Native);
        assert_eq!("ws".parse::<TransportKind>().unwrap(), TransportKind::WebSocket);
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_transport_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&TransportKind::WebSocket).unwrap(),
            "\"websocket\""
        );
        assert_eq!(
            serde_json::from_str::<TransportKind>("\"native\"").unwrap(),
            TransportKind::Native
        );
    }

    #[tokio::test]
    async fn test_probe_prefers_explicit_config() {
        let config = CoreConfig {
            transport: Some(TransportKind::Native),
            ipc_port: None,
            ..CoreConfig::default()
        };
        assert_eq!(TransportKind::probe(&config).await, TransportKind::Native);
    }
}
