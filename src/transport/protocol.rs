use serde::{Deserialize, Serialize};

use crate::layout::{ClientId, TerminalLayout, TerminalStateMessage, WorkspaceKey};
use crate::session::SessionId;

/// Backend command surface, one variant per command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendRequest {
    PtyCreate {
        session_id: SessionId,
        cwd: String,
        cols: u16,
        rows: u16,
    },
    /// Poll mode only
    PtyRead { session_id: SessionId },
    PtyWrite { session_id: SessionId, data: String },
    PtyResize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    PtyClose { session_id: SessionId },
    GetTerminalState {
        workspace_path: String,
        worktree_name: Option<String>,
    },
    BroadcastTerminalState {
        workspace_path: String,
        worktree_name: Option<String>,
        activated_terminals: Vec<String>,
        active_terminal_tab: Option<String>,
        terminal_visible: bool,
        client_id: ClientId,
        #[serde(default)]
        seq: Option<u64>,
    },
}

impl BackendRequest {
    pub fn broadcast(key: &WorkspaceKey, layout: &TerminalLayout, client_id: ClientId, seq: Option<u64>) -> Self {
        BackendRequest::BroadcastTerminalState {
            workspace_path: key.workspace_path.clone(),
            worktree_name: key.worktree_name.clone(),
            activated_terminals: layout.activated_terminals.iter().cloned().collect(),
            active_terminal_tab: layout.active_terminal_tab.clone(),
            terminal_visible: layout.terminal_visible,
            client_id,
            seq,
        }
    }

    /// Command name as exposed by the backend (also the HTTP route segment).
    pub fn command_name(&self) -> &'static str {
        match self {
            BackendRequest::PtyCreate { .. } => "pty_create",
            BackendRequest::PtyRead { .. } => "pty_read",
            BackendRequest::PtyWrite { .. } => "pty_write",
            BackendRequest::PtyResize { .. } => "pty_resize",
            BackendRequest::PtyClose { .. } => "pty_close",
            BackendRequest::GetTerminalState { .. } => "get_terminal_state",
            BackendRequest::BroadcastTerminalState { .. } => "broadcast_terminal_state",
        }
    }

    /// The message peers receive for a broadcast request.
    pub fn as_state_message(&self) -> Option<TerminalStateMessage> {
        match self {
            BackendRequest::BroadcastTerminalState {
                workspace_path,
                worktree_name,
                activated_terminals,
                active_terminal_tab,
                terminal_visible,
                client_id,
                seq,
            } => Some(TerminalStateMessage {
                workspace_path: workspace_path.clone(),
                worktree_name: worktree_name.clone(),
                layout: TerminalLayout {
                    activated_terminals: activated_terminals.iter().cloned().collect(),
                    active_terminal_tab: active_terminal_tab.clone(),
                    terminal_visible: *terminal_visible,
                },
                client_id: client_id.clone(),
                seq: *seq,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendResponse {
    Ok,
    Error { message: String },
    /// Pending PTY output returned by `pty_read`
    Output { data: String },
    TerminalState { state: Option<TerminalLayout> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    PtyOutput { session_id: SessionId, data: String },
    TerminalState { message: TerminalStateMessage },
}

/// Native IPC framing, one JSON document per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendMessage {
    Request { id: String, request: BackendRequest },
    Response { id: String, response: BackendResponse },
    Event { event: BackendEvent },
}

/// A stream multiplexed over the browser WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamChannel {
    Pty { session_id: SessionId },
    TerminalState {
        workspace_path: String,
        worktree_name: Option<String>,
    },
}

impl From<&WorkspaceKey> for StreamChannel {
    fn from(key: &WorkspaceKey) -> Self {
        StreamChannel::TerminalState {
            workspace_path: key.workspace_path.clone(),
            worktree_name: key.worktree_name.clone(),
        }
    }
}

/// Browser client to backend frames. Backend to client frames are
/// [`BackendEvent`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientFrame {
    Subscribe { channel: StreamChannel },
    Unsubscribe { channel: StreamChannel },
    Input { session_id: SessionId, data: String },
}
