use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};
use crate::layout::{ClientId, TerminalLayout, TerminalStateMessage, WorkspaceKey};
use crate::session::{SessionId, TermSize};

use super::protocol::{BackendRequest, BackendResponse};
use super::subscription::Subscription;
use super::{ConnectionState, Transport, TransportKind};

/// Typed command surface over whichever transport is active.
#[derive(Clone)]
pub struct Backend {
    transport: Arc<dyn Transport>,
}

impl Backend {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.connection_state()
    }

    async fn send(&self, request: BackendRequest) -> Result<BackendResponse> {
        debug!(command = request.command_name(), "backend call");
        self.transport.call(request).await
    }

    pub async fn pty_create(&self, session_id: &SessionId, cwd: &str, size: TermSize) -> Result<()> {
        match self
            .send(BackendRequest::PtyCreate {
                session_id: session_id.clone(),
                cwd: cwd.to_string(),
                cols: size.cols,
                rows: size.rows,
            })
            .await?
        {
            BackendResponse::Ok => Ok(()),
            BackendResponse::Error { message } => Err(Error::Backend(message)),
            _ => Err(Error::Transport("Unexpected backend response".into())),
        }
    }

    pub async fn pty_read(&self, session_id: &SessionId) -> Result<String> {
        match self
            .send(BackendRequest::PtyRead {
                session_id: session_id.clone(),
            })
            .await?
        {
            BackendResponse::Output { data } => Ok(data),
            BackendResponse::Error { message } => Err(Error::Backend(message)),
            _ => Err(Error::Transport("Unexpected backend response".into())),
        }
    }

    pub async fn pty_write(&self, session_id: &SessionId, data: &str) -> Result<()> {
        match self
            .send(BackendRequest::PtyWrite {
                session_id: session_id.clone(),
                data: data.to_string(),
            })
            .await?
        {
            BackendResponse::Ok => Ok(()),
            BackendResponse::Error { message } => Err(Error::Backend(message)),
            _ => Err(Error::Transport("Unexpected backend response".into())),
        }
    }

    pub async fn pty_resize(&self, session_id: &SessionId, size: TermSize) -> Result<()> {
        match self
            .send(BackendRequest::PtyResize {
                session_id: session_id.clone(),
                cols: size.cols,
                rows: size.rows,
            })
            .await?
        {
            BackendResponse::Ok => Ok(()),
            BackendResponse::Error { message } => Err(Error::Backend(message)),
            _ => Err(Error::Transport("Unexpected backend response".into())),
        }
    }

    pub async fn pty_close(&self, session_id: &SessionId) -> Result<()> {
        match self
            .send(BackendRequest::PtyClose {
                session_id: session_id.clone(),
            })
            .await?
        {
            BackendResponse::Ok => Ok(()),
            BackendResponse::Error { message } => Err(Error::Backend(message)),
            _ => Err(Error::Transport("Unexpected backend response".into())),
        }
    }

    pub async fn get_terminal_state(&self, key: &WorkspaceKey) -> Result<Option<TerminalLayout>> {
        match self
            .send(BackendRequest::GetTerminalState {
                workspace_path: key.workspace_path.clone(),
                worktree_name: key.worktree_name.clone(),
            })
            .await?
        {
            BackendResponse::TerminalState { state } => Ok(state),
            BackendResponse::Error { message } => Err(Error::Backend(message)),
            _ => Err(Error::Transport("Unexpected backend response".into())),
        }
    }

    pub async fn broadcast_terminal_state(
        &self,
        key: &WorkspaceKey,
        layout: &TerminalLayout,
        client_id: &ClientId,
        seq: Option<u64>,
    ) -> Result<()> {
        match self
            .send(BackendRequest::broadcast(key, layout, client_id.clone(), seq))
            .await?
        {
            BackendResponse::Ok => Ok(()),
            BackendResponse::Error { message } => Err(Error::Backend(message)),
            _ => Err(Error::Transport("Unexpected backend response".into())),
        }
    }

    pub fn subscribe_output(&self, session_id: &SessionId) -> Subscription<String> {
        self.transport.subscribe_output(session_id)
    }

    pub fn subscribe_terminal_state(&self, key: &WorkspaceKey) -> Subscription<TerminalStateMessage> {
        self.transport.subscribe_terminal_state(key)
    }

    /// Keystrokes, forwarded verbatim.
    pub async fn write_stream(&self, session_id: &SessionId, data: &str) -> Result<()> {
        self.transport.write_stream(session_id, data).await
    }
}
