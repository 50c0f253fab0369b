use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};
use crate::layout::{TerminalLayout, TerminalStateMessage, WorkspaceKey};
use crate::session::{SessionId, TermSize};

use super::protocol::{BackendRequest, BackendResponse};
use super::subscription::{Registry, Subscription};
use super::{ConnectionState, Transport, TransportKind};

type OutputRegistry = Registry<SessionId, String>;
type StateRegistry = Registry<WorkspaceKey, TerminalStateMessage>;

/// One PTY as the in-process backend sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRecord {
    pub cwd: String,
    pub size: TermSize,
    /// Output not yet delivered to a stream subscriber or `pty_read`
    pub pending_output: String,
    /// Everything written to the PTY so far
    pub input: String,
}

#[derive(Default)]
struct HubState {
    ptys: HashMap<SessionId, PtyRecord>,
    terminal_state: HashMap<WorkspaceKey, TerminalLayout>,
    calls: Vec<BackendRequest>,
    failing: HashSet<String>,
}

struct Peer {
    output: Weak<OutputRegistry>,
    states: Weak<StateRegistry>,
}

/// In-process backend implementing the whole command surface, shared by any
/// number of connected transports. Used for offline runs and tests.
pub struct LoopbackHub {
    state: Mutex<HubState>,
    peers: Mutex<Vec<Peer>>,
    connection: watch::Sender<ConnectionState>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        let (connection, _) = watch::channel(ConnectionState::Connected);
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            peers: Mutex::new(Vec::new()),
            connection,
        })
    }

    /// A new client of this backend, behaving like the native bridge.
    pub fn connect(self: &Arc<Self>) -> Arc<LoopbackTransport> {
        self.connect_as(TransportKind::Native)
    }

    pub fn connect_as(self: &Arc<Self>, kind: TransportKind) -> Arc<LoopbackTransport> {
        let output = OutputRegistry::new();
        let states = StateRegistry::new();
        self.peers.lock().push(Peer {
            output: Arc::downgrade(&output),
            states: Arc::downgrade(&states),
        });
        Arc::new(LoopbackTransport {
            hub: self.clone(),
            kind,
            output,
            states,
        })
    }

    /// PTY output produced by the backend. Buffered for `pty_read` when no
    /// stream subscriber takes it.
    pub fn emit_output(&self, session_id: &SessionId, data: &str) {
        let delivered: usize = self
            .live_peers()
            .iter()
            .map(|(output, _)| output.publish(session_id, data.to_string()))
            .sum();
        if delivered > 0 {
            return;
        }
        if let Some(pty) = self.state.lock().ptys.get_mut(session_id) {
            pty.pending_output.push_str(data);
        }
    }

    pub fn seed_state(&self, key: WorkspaceKey, layout: TerminalLayout) {
        self.state.lock().terminal_state.insert(key, layout);
    }

    pub fn terminal_state(&self, key: &WorkspaceKey) -> Option<TerminalLayout> {
        self.state.lock().terminal_state.get(key).cloned()
    }

    pub fn pty(&self, session_id: &SessionId) -> Option<PtyRecord> {
        self.state.lock().ptys.get(session_id).cloned()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.state.lock().ptys.keys().cloned().collect();
        sessions.sort();
        sessions
    }

    pub fn calls(&self) -> Vec<BackendRequest> {
        self.state.lock().calls.clone()
    }

    pub fn calls_named(&self, command: &str) -> Vec<BackendRequest> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.command_name() == command)
            .cloned()
            .collect()
    }

    /// Make every following `command` call answer with an error.
    pub fn fail_command(&self, command: &str) {
        self.state.lock().failing.insert(command.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// Simulate the backend going away or coming back. Calls fail while not
    /// connected.
    pub fn set_connection(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    fn live_peers(&self) -> Vec<(Arc<OutputRegistry>, Arc<StateRegistry>)> {
        let mut peers = self.peers.lock();
        peers.retain(|peer| peer.output.strong_count() > 0);
        peers
            .iter()
            .filter_map(|peer| Some((peer.output.upgrade()?, peer.states.upgrade()?)))
            .collect()
    }

    fn handle(&self, request: BackendRequest) -> BackendResponse {
        let command = request.command_name();
        let mut state = self.state.lock();
        state.calls.push(request.clone());
        if state.failing.contains(command) {
            return BackendResponse::Error {
                message: format!("{command} failed"),
            };
        }

        match request {
            BackendRequest::PtyCreate { session_id, cwd, cols, rows } => {
                state.ptys.entry(session_id).or_insert_with(|| PtyRecord {
                    cwd,
                    size: TermSize::new(cols, rows),
                    pending_output: String::new(),
                    input: String::new(),
                });
                BackendResponse::Ok
            }
            BackendRequest::PtyRead { session_id } => match state.ptys.get_mut(&session_id) {
                Some(pty) => BackendResponse::Output {
                    data: std::mem::take(&mut pty.pending_output),
                },
                None => session_not_found(&session_id),
            },
            BackendRequest::PtyWrite { session_id, data } => match state.ptys.get_mut(&session_id) {
                Some(pty) => {
                    pty.input.push_str(&data);
                    BackendResponse::Ok
                }
                None => session_not_found(&session_id),
            },
            BackendRequest::PtyResize { session_id, cols, rows } => match state.ptys.get_mut(&session_id) {
                Some(pty) => {
                    pty.size = TermSize::new(cols, rows);
                    BackendResponse::Ok
                }
                None => session_not_found(&session_id),
            },
            BackendRequest::PtyClose { session_id } => match state.ptys.remove(&session_id) {
                Some(_) => BackendResponse::Ok,
                None => session_not_found(&session_id),
            },
            BackendRequest::GetTerminalState { workspace_path, worktree_name } => {
                let key = WorkspaceKey::new(workspace_path, worktree_name);
                BackendResponse::TerminalState {
                    state: state.terminal_state.get(&key).cloned(),
                }
            }
            request @ BackendRequest::BroadcastTerminalState { .. } => {
                let Some(message) = request.as_state_message() else {
                    return BackendResponse::Error {
                        message: "Malformed broadcast".into(),
                    };
                };
                let key = message.key();
                state.terminal_state.insert(key.clone(), message.layout.clone());
                drop(state);

                for (_, states) in self.live_peers() {
                    states.publish(&key, message.clone());
                }
                debug!(key = %key, client_id = %message.client_id, "loopback broadcast");
                BackendResponse::Ok
            }
        }
    }
}

fn session_not_found(session_id: &SessionId) -> BackendResponse {
    BackendResponse::Error {
        message: format!("Session not found: {session_id}"),
    }
}

/// One client's connection to a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    kind: TransportKind,
    output: Arc<OutputRegistry>,
    states: Arc<StateRegistry>,
}

impl LoopbackTransport {
    pub fn hub(&self) -> &Arc<LoopbackHub> {
        &self.hub
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn call(&self, request: BackendRequest) -> Result<BackendResponse> {
        if *self.hub.connection.borrow() != ConnectionState::Connected {
            return Err(Error::ConnectionClosed("Backend connection closed".into()));
        }
        Ok(self.hub.handle(request))
    }

    fn subscribe_output(&self, session_id: &SessionId) -> Subscription<String> {
        self.output.subscribe(session_id.clone(), |_| {}).0
    }

    fn subscribe_terminal_state(&self, key: &WorkspaceKey) -> Subscription<TerminalStateMessage> {
        self.states.subscribe(key.clone(), |_| {}).0
    }

    async fn write_stream(&self, session_id: &SessionId, data: &str) -> Result<()> {
        match self
            .call(BackendRequest::PtyWrite {
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
        self.hub.connection.subscribe()
    }
}
