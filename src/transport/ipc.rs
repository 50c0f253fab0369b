use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::layout::{TerminalStateMessage, WorkspaceKey};
use crate::session::SessionId;
use crate::util::app_data_dir;

use super::protocol::{BackendEvent, BackendMessage, BackendRequest, BackendResponse};
use super::subscription::{Registry, Subscription};
use super::{ConnectionState, Transport, TransportKind};

const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<BackendResponse>>>>;

/// Backend port: configuration first, then the port file the backend
/// writes next to its data.
pub fn discover_port(config: &CoreConfig) -> Option<u16> {
    if let Some(port) = config.ipc_port {
        return Some(port);
    }
    read_port_file()
}

fn read_port_file() -> Option<u16> {
    let path = app_data_dir().ok()?.join("backend").join("port");
    let contents = std::fs::read_to_string(&path).ok()?;
    match contents.trim().parse() {
        Ok(port) => Some(port),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "invalid backend port file");
            None
        }
    }
}

/// True when something accepts connections on the port.
pub async fn probe_port(port: u16) -> bool {
    let addr = format!("127.0.0.1:{port}");
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&addr)).await,
        Ok(Ok(_))
    )
}

/// Native bridge: newline-delimited JSON over one local TCP connection.
///
/// Backend events are process-global, so every output chunk and every
/// terminal-state message reaches this client and is routed to local
/// subscribers by session id or workspace key.
pub struct IpcTransport {
    out_tx: mpsc::UnboundedSender<String>,
    pending: Pending,
    output: Arc<Registry<SessionId, String>>,
    states: Arc<Registry<WorkspaceKey, TerminalStateMessage>>,
    connection: watch::Receiver<ConnectionState>,
    tasks: Vec<JoinHandle<()>>,
}

impl IpcTransport {
    pub async fn connect(port: u16) -> Result<Self> {
        let addr = format!("127.0.0.1:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect to backend at {addr}: {e}")))?;
        info!(addr = %addr, "backend ipc connected");

        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader).lines();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let output = Registry::new();
        let states = Registry::new();
        let (connection_tx, connection) = watch::channel(ConnectionState::Connected);

        let write_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = out_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let pending_for_read = pending.clone();
        let output_for_read = output.clone();
        let states_for_read = states.clone();
        let read_task = tokio::spawn(async move {
            while let Ok(Some(line)) = reader.next_line().await {
                let message: BackendMessage = match serde_json::from_str(&line) {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(error = %err, "backend message parse failed");
                        continue;
                    }
                };

                match message {
                    BackendMessage::Response { id, response } => {
                        let sender = pending_for_read.lock().remove(&id);
                        if let Some(sender) = sender {
                            let _ = sender.send(response);
                        }
                    }
                    BackendMessage::Event { event } => match event {
                        BackendEvent::PtyOutput { session_id, data } => {
                            output_for_read.publish(&session_id, data);
                        }
                        BackendEvent::TerminalState { message } => {
                            states_for_read.publish(&message.key(), message);
                        }
                    },
                    BackendMessage::Request { .. } => {}
                }
            }

            warn!("backend connection closed");
            // Dropping the senders fails every in-flight request.
            pending_for_read.lock().clear();
            connection_tx.send_replace(ConnectionState::Disconnected);
        });

        Ok(Self {
            out_tx,
            pending,
            output,
            states,
            connection,
            tasks: vec![write_task, read_task],
        })
    }

    async fn send_request(&self, request: BackendRequest) -> Result<BackendResponse> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        debug!(request_id = %id, command = request.command_name(), "backend request");
        let message = BackendMessage::Request { id: id.clone(), request };
        let json = serde_json::to_string(&message)?;

        if self.out_tx.send(json).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::ConnectionClosed("Backend connection closed".into()));
        }

        match rx.await {
            Ok(response) => Ok(response),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::ConnectionClosed("Backend response dropped".into()))
            }
        }
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for IpcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    async fn call(&self, request: BackendRequest) -> Result<BackendResponse> {
        self.send_request(request).await
    }

    fn subscribe_output(&self, session_id: &SessionId) -> Subscription<String> {
        self.output.subscribe(session_id.clone(), |_| {}).0
    }

    fn subscribe_terminal_state(&self, key: &WorkspaceKey) -> Subscription<TerminalStateMessage> {
        self.states.subscribe(key.clone(), |_| {}).0
    }

    async fn write_stream(&self, session_id: &SessionId, data: &str) -> Result<()> {
        match self
            .send_request(BackendRequest::PtyWrite {
                session_id: session_id.clone(),
                data: data.to_string(),
            })
            .await?
        {
            BackendResponse::Error { message } => Err(Error::Backend(message)),
            _ => Ok(()),
        }
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ClientId, TerminalLayout};
    use tokio::net::TcpListener;

    /// Minimal backend: answers every request with `Ok` and pushes one event
    /// of each kind after the first request.
    async fn spawn_backend() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: BackendMessage = serde_json::from_str(&line).unwrap();
                let BackendMessage::Request { id, .. } = message else {
                    continue;
                };
                let events = [
                    BackendMessage::Event {
                        event: BackendEvent::PtyOutput {
                            session_id: SessionId::from_path("/ws"),
                            data: "$ ".into(),
                        },
                    },
                    BackendMessage::Event {
                        event: BackendEvent::TerminalState {
                            message: TerminalStateMessage {
                                workspace_path: "/other".into(),
                                worktree_name: None,
                                layout: TerminalLayout::default(),
                                client_id: ClientId::from("peer"),
                                seq: None,
                            },
                        },
                    },
                    BackendMessage::Response {
                        id,
                        response: BackendResponse::Ok,
                    },
                ];
                for message in events {
                    let mut json = serde_json::to_string(&message).unwrap();
                    json.push('\n');
                    writer.write_all(json.as_bytes()).await.unwrap();
                }
            }
        });
        port
    }

    #[tokio::test]
    async fn test_request_response_and_event_routing() {
        let port = spawn_backend().await;
        let transport = IpcTransport::connect(port).await.unwrap();

        let mut output = transport.subscribe_output(&SessionId::from_path("/ws"));
        let mut unrelated = transport.subscribe_output(&SessionId::from_path("/elsewhere"));
        let mut state = transport.subscribe_terminal_state(&WorkspaceKey::new("/ws", None));

        let response = transport
            .call(BackendRequest::PtyClose {
                session_id: SessionId::from_path("/ws"),
            })
            .await
            .unwrap();
        assert_eq!(response, BackendResponse::Ok);

        assert_eq!(output.recv().await.as_deref(), Some("$ "));
        assert!(unrelated.try_recv().is_none());
        // Terminal state for another workspace is filtered client-side.
        assert!(state.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_probe_port_detects_listener() {
        let port = spawn_backend().await;
        assert!(probe_port(port).await);
    }
}
