use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use canopy_lib::layout::{TerminalLayout, WorkspaceKey};
use canopy_lib::session::SessionId;
use canopy_lib::transport::protocol::{StreamChannel, WsClientFrame};
use canopy_lib::transport::{
    BackendEvent, BackendRequest, BackendResponse, ConnectionState, Transport, WsTransport,
};
use canopy_lib::CoreConfig;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct ServerState {
    connections: Arc<AtomicUsize>,
    frames: Arc<Mutex<Vec<WsClientFrame>>>,
    commands: Arc<Mutex<Vec<(String, BackendRequest)>>>,
}

async fn command(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(request): Json<BackendRequest>,
) -> Json<BackendResponse> {
    state.commands.lock().push((name.clone(), request));
    let response = match name.as_str() {
        "get_terminal_state" => BackendResponse::TerminalState {
            state: Some(TerminalLayout {
                terminal_visible: true,
                ..TerminalLayout::default()
            }),
        },
        "pty_read" => BackendResponse::Error {
            message: "poll mode disabled".into(),
        },
        _ => BackendResponse::Ok,
    };
    Json(response)
}

async fn ws_handler(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Answers every pty subscription with `conn<n>`; the first connection is
/// dropped right after that to exercise reconnects.
async fn handle_socket(mut socket: WebSocket, state: ServerState) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<WsClientFrame>(&text) else {
            continue;
        };
        state.frames.lock().push(frame.clone());

        if let WsClientFrame::Subscribe {
            channel: StreamChannel::Pty { session_id },
        } = frame
        {
            let event = BackendEvent::PtyOutput {
                session_id,
                data: format!("conn{connection}"),
            };
            let json = serde_json::to_string(&event).unwrap();
            if socket.send(WsMessage::Text(json)).await.is_err() {
                return;
            }
            if connection == 1 {
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }
}

async fn spawn_server() -> (CoreConfig, ServerState) {
    let state = ServerState::default();
    let router = Router::new()
        .route("/api/command/:name", post(command))
        .route("/ws", get(ws_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    let config = CoreConfig {
        http_base_url: format!("http://{addr}"),
        reconnect_initial_ms: 10,
        reconnect_max_ms: 50,
        ..CoreConfig::default()
    };
    (config, state)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn connected(transport: &WsTransport) {
    let mut connection = transport.connection_state();
    tokio::time::timeout(TIMEOUT, connection.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .expect("websocket never connected")
        .expect("connection watch closed");
}

#[tokio::test]
async fn test_commands_go_over_http() {
    let (config, state) = spawn_server().await;
    let transport = WsTransport::connect(&config).unwrap();

    let response = transport
        .call(BackendRequest::GetTerminalState {
            workspace_path: "/ws".into(),
            worktree_name: Some("feat".into()),
        })
        .await
        .unwrap();

    assert!(matches!(
        response,
        BackendResponse::TerminalState { state: Some(layout) } if layout.terminal_visible
    ));
    let commands = state.commands.lock().clone();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].0, "get_terminal_state");
}

#[tokio::test]
async fn test_subscriptions_are_replayed_after_reconnect() {
    let (config, state) = spawn_server().await;
    let transport = WsTransport::connect(&config).unwrap();
    let session_id = SessionId::from_path("/ws/main");
    connected(&transport).await;

    let mut output = transport.subscribe_output(&session_id);

    let first = tokio::time::timeout(TIMEOUT, output.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some("conn1"));

    // The server dropped the first socket; the manager reconnects and
    // subscribes again without any help from the subscriber.
    let second = tokio::time::timeout(TIMEOUT, output.recv()).await.unwrap();
    assert_eq!(second.as_deref(), Some("conn2"));
    assert!(state.connections.load(Ordering::SeqCst) >= 2);
    connected(&transport).await;
}

#[tokio::test]
async fn test_last_drop_unsubscribes() {
    let (config, state) = spawn_server().await;
    let transport = WsTransport::connect(&config).unwrap();
    let key = WorkspaceKey::new("/ws", None);
    connected(&transport).await;

    let first = transport.subscribe_terminal_state(&key);
    let second = transport.subscribe_terminal_state(&key);
    let channel = StreamChannel::from(&key);

    let subscribe = WsClientFrame::Subscribe {
        channel: channel.clone(),
    };
    let unsubscribe = WsClientFrame::Unsubscribe { channel };

    wait_for(|| state.frames.lock().contains(&subscribe)).await;

    drop(first);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!state.frames.lock().contains(&unsubscribe));

    drop(second);
    wait_for(|| state.frames.lock().contains(&unsubscribe)).await;
    let subscribes = state
        .frames
        .lock()
        .iter()
        .filter(|frame| **frame == subscribe)
        .count();
    assert_eq!(subscribes, 1);
}

#[tokio::test]
async fn test_input_rides_the_socket() {
    let (config, state) = spawn_server().await;
    let transport = WsTransport::connect(&config).unwrap();
    let key = WorkspaceKey::new("/ws", None);

    connected(&transport).await;
    let _states = transport.subscribe_terminal_state(&key);

    let session_id = SessionId::from_path("/ws");
    transport.write_stream(&session_id, "ls\r").await.unwrap();

    let expected = WsClientFrame::Input {
        session_id,
        data: "ls\r".into(),
    };
    wait_for(|| state.frames.lock().contains(&expected)).await;
    assert!(state.commands.lock().is_empty());
}

#[tokio::test]
async fn test_subscription_made_while_connecting_is_sent_once() {
    let (config, state) = spawn_server().await;
    let transport = WsTransport::connect(&config).unwrap();
    let key = WorkspaceKey::new("/ws", Some("feat".into()));

    // Queued before the socket is up, then covered again by the replay.
    let _states = transport.subscribe_terminal_state(&key);
    connected(&transport).await;

    let subscribe = WsClientFrame::Subscribe {
        channel: StreamChannel::from(&key),
    };
    wait_for(|| state.frames.lock().contains(&subscribe)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let subscribes = state
        .frames
        .lock()
        .iter()
        .filter(|frame| **frame == subscribe)
        .count();
    assert_eq!(subscribes, 1);
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);
}
