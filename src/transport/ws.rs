use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::layout::{TerminalStateMessage, WorkspaceKey};
use crate::session::SessionId;

use super::protocol::{BackendEvent, BackendRequest, BackendResponse, StreamChannel, WsClientFrame};
use super::subscription::{Registry, Subscription};
use super::{ConnectionState, Transport, TransportKind};

type OutputRegistry = Registry<SessionId, String>;
type StateRegistry = Registry<WorkspaceKey, TerminalStateMessage>;

/// Browser bridge: commands over HTTP, streams over one multiplexed
/// WebSocket owned by a connection manager task.
///
/// The manager reconnects with exponential backoff and replays every live
/// subscription once the socket is back. Frames queued while the socket is
/// down are dropped.
pub struct WsTransport {
    http: reqwest::Client,
    http_base_url: String,
    frames: mpsc::UnboundedSender<WsClientFrame>,
    output: Arc<OutputRegistry>,
    states: Arc<StateRegistry>,
    connection: watch::Receiver<ConnectionState>,
    manager: JoinHandle<()>,
}

/// Reconnect delay bounds.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

/// WebSocket endpoint: configured explicitly or derived from the HTTP base.
pub fn ws_url(config: &CoreConfig) -> String {
    if let Some(url) = &config.ws_url {
        return url.clone();
    }
    let base = config.http_base_url.trim_end_matches('/');
    let base = if base.starts_with("https://") {
        base.replacen("https://", "wss://", 1)
    } else {
        base.replacen("http://", "ws://", 1)
    };
    format!("{base}/ws")
}

impl WsTransport {
    /// Start the connection manager. Must be called inside a tokio runtime.
    pub fn connect(config: &CoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {e}")))?;
        let backoff = Backoff {
            initial: Duration::from_millis(config.reconnect_initial_ms.max(1)),
            max: Duration::from_millis(config.reconnect_max_ms.max(config.reconnect_initial_ms)),
        };

        let (frames, frames_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection) = watch::channel(ConnectionState::Connecting);
        let output = OutputRegistry::new();
        let states = StateRegistry::new();

        let manager = ConnectionManager {
            url: ws_url(config),
            backoff,
            frames_rx,
            connection: connection_tx,
            output: output.clone(),
            states: states.clone(),
        };
        let manager = tokio::spawn(manager.run());

        Ok(Self {
            http,
            http_base_url: config.http_base_url.trim_end_matches('/').to_string(),
            frames,
            output,
            states,
            connection,
            manager,
        })
    }

    fn command_url(&self, command: &str) -> String {
        format!("{}/api/command/{command}", self.http_base_url)
    }

    fn send_frame(&self, frame: WsClientFrame) -> Result<()> {
        self.frames
            .send(frame)
            .map_err(|_| Error::ConnectionClosed("WebSocket manager stopped".into()))
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.manager.abort();
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn call(&self, request: BackendRequest) -> Result<BackendResponse> {
        let command = request.command_name();
        debug!(command, "http command");
        let response = self
            .http
            .post(self.command_url(command))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("{command} returned {status}: {body}")));
        }
        Ok(response.json::<BackendResponse>().await?)
    }

    fn subscribe_output(&self, session_id: &SessionId) -> Subscription<String> {
        let frames = self.frames.clone();
        let (subscription, first) = self.output.subscribe(session_id.clone(), move |session_id| {
            let _ = frames.send(WsClientFrame::Unsubscribe {
                channel: StreamChannel::Pty { session_id },
            });
        });
        if first {
            let channel = StreamChannel::Pty {
                session_id: session_id.clone(),
            };
            if let Err(err) = self.send_frame(WsClientFrame::Subscribe { channel }) {
                warn!(session_id = %session_id, error = %err, "pty subscribe failed");
            }
        }
        subscription
    }

    fn subscribe_terminal_state(&self, key: &WorkspaceKey) -> Subscription<TerminalStateMessage> {
        let frames = self.frames.clone();
        let (subscription, first) = self.states.subscribe(key.clone(), move |key| {
            let _ = frames.send(WsClientFrame::Unsubscribe {
                channel: StreamChannel::from(&key),
            });
        });
        if first {
            let channel = StreamChannel::from(key);
            if let Err(err) = self.send_frame(WsClientFrame::Subscribe { channel }) {
                warn!(key = %key, error = %err, "terminal state subscribe failed");
            }
        }
        subscription
    }

    async fn write_stream(&self, session_id: &SessionId, data: &str) -> Result<()> {
        self.send_frame(WsClientFrame::Input {
            session_id: session_id.clone(),
            data: data.to_string(),
        })
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }
}

struct ConnectionManager {
    url: String,
    backoff: Backoff,
    frames_rx: mpsc::UnboundedReceiver<WsClientFrame>,
    connection: watch::Sender<ConnectionState>,
    output: Arc<OutputRegistry>,
    states: Arc<StateRegistry>,
}

enum SessionEnd {
    /// Socket dropped, reconnect
    Lost,
    /// Transport handle gone, stop for good
    Shutdown,
}

impl ConnectionManager {
    async fn run(mut self) {
        let mut delay = self.backoff.initial;
        loop {
            self.connection.send_replace(ConnectionState::Connecting);
            match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!(url = %self.url, "websocket connected");
                    delay = self.backoff.initial;
                    match self.serve(stream).await {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Lost => warn!(url = %self.url, "websocket disconnected"),
                    }
                }
                Err(err) => {
                    debug!(url = %self.url, error = %err, "websocket connect failed");
                }
            }

            self.connection.send_replace(ConnectionState::Disconnected);
            if !self.wait(delay).await {
                return;
            }
            delay = self.backoff.next(delay);
        }
    }

    async fn serve(
        &mut self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> SessionEnd {
        let (mut writer, mut reader) = stream.split();
        let mut subscribed = HashSet::new();

        for channel in self.live_channels() {
            let frame = WsClientFrame::Subscribe {
                channel: channel.clone(),
            };
            if !send_frame(&mut writer, &frame).await {
                return SessionEnd::Lost;
            }
            subscribed.insert(channel);
        }
        self.connection.send_replace(ConnectionState::Connected);

        loop {
            tokio::select! {
                frame = self.frames_rx.recv() => {
                    let Some(frame) = frame else {
                        let _ = writer.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    };
                    if !admit(&frame, &mut subscribed) {
                        debug!(frame = ?frame, "already in that state on this socket");
                        continue;
                    }
                    if !send_frame(&mut writer, &frame).await {
                        return SessionEnd::Lost;
                    }
                }
                message = reader.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.route(&text),
                        Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "websocket read failed");
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }

    /// Sleep out the backoff, discarding frames queued meanwhile. Returns
    /// false when the transport was dropped.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                frame = self.frames_rx.recv() => match frame {
                    Some(frame) => debug!(frame = ?frame, "dropping frame while disconnected"),
                    None => return false,
                },
            }
        }
    }

    fn live_channels(&self) -> Vec<StreamChannel> {
        let mut channels: Vec<StreamChannel> = self
            .output
            .keys()
            .into_iter()
            .map(|session_id| StreamChannel::Pty { session_id })
            .collect();
        channels.extend(self.states.keys().iter().map(StreamChannel::from));
        channels
    }

    fn route(&self, text: &str) {
        let event: BackendEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "websocket event parse failed");
                return;
            }
        };
        match event {
            BackendEvent::PtyOutput { session_id, data } => {
                self.output.publish(&session_id, data);
            }
            BackendEvent::TerminalState { message } => {
                self.states.publish(&message.key(), message);
            }
        }
    }
}

/// One Subscribe per channel per socket: a subscription queued while
/// connecting is already covered by the replay.
fn admit(frame: &WsClientFrame, subscribed: &mut HashSet<StreamChannel>) -> bool {
    match frame {
        WsClientFrame::Subscribe { channel } => subscribed.insert(channel.clone()),
        WsClientFrame::Unsubscribe { channel } => subscribed.remove(channel),
        WsClientFrame::Input { .. } => true,
    }
}

async fn send_frame<S>(writer: &mut S, frame: &WsClientFrame) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "websocket frame encode failed");
            return true;
        }
    };
    match writer.send(Message::Text(json)).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "websocket send failed");
            false
        }
    }
}
