mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use canopy_lib::layout::{ClientId, TerminalLayout, WorkspaceContext, WorkspaceKey};
use canopy_lib::session::{SessionId, TermSize};
use canopy_lib::transport::{Backend, BackendRequest, ConnectionState, LoopbackHub};
use canopy_lib::TerminalController;

use common::{settle, test_config, RecordingSinks};

fn controller(hub: &Arc<LoopbackHub>, id: &str) -> TerminalController {
    TerminalController::with_client_id(
        Backend::new(hub.connect()),
        RecordingSinks::new(),
        &test_config(),
        ClientId::from(id),
    )
}

fn main_ctx() -> WorkspaceContext {
    WorkspaceContext::main("/ws/main", vec!["api".into(), "web".into()])
}

fn set(paths: &[&str]) -> BTreeSet<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

fn broadcasts(hub: &LoopbackHub) -> usize {
    hub.calls_named("broadcast_terminal_state").len()
}

fn resizes(hub: &LoopbackHub) -> Vec<BackendRequest> {
    hub.calls_named("pty_resize")
}

#[tokio::test(start_paused = true)]
async fn test_edits_propagate_between_clients_without_bouncing() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    let b = controller(&hub, "b");
    a.switch_workspace(main_ctx()).await;
    b.switch_workspace(main_ctx()).await;

    a.open_tab("/ws/main");
    settle().await;

    assert_eq!(b.snapshot().layout, a.snapshot().layout);
    assert!(b.snapshot().mounted.contains("/ws/main"));
    assert_eq!(broadcasts(&hub), 1);
    assert_eq!(a.last_broadcast_seq(), 1);
    assert_eq!(b.last_broadcast_seq(), 0);

    b.open_tab("/ws/main/api");
    settle().await;

    let layout = a.snapshot().layout;
    assert_eq!(layout.activated_terminals, set(&["/ws/main", "/ws/main/api"]));
    assert_eq!(layout.active_terminal_tab.as_deref(), Some("/ws/main/api"));
    assert_eq!(b.snapshot().layout, layout);
    assert_eq!(broadcasts(&hub), 2);
}

#[tokio::test(start_paused = true)]
async fn test_own_echo_leaves_state_untouched() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;

    a.open_tab("/ws/main");
    let before = a.snapshot();
    settle().await;

    // The loopback hub delivers every broadcast back to its sender.
    assert_eq!(broadcasts(&hub), 1);
    assert_eq!(a.snapshot().layout, before.layout);
    assert_eq!(a.snapshot().mounted, before.mounted);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_collapse_into_one_trailing_broadcast() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;
    let key = WorkspaceKey::new("/ws/main", None);

    a.open_tab("/ws/main");
    settle().await;
    assert_eq!(broadcasts(&hub), 1);

    a.open_tab("/ws/main/api");
    a.open_tab("/ws/main/web");
    a.close_tab("/ws/main/web");
    a.toggle_visibility();
    settle().await;
    assert_eq!(broadcasts(&hub), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(broadcasts(&hub), 2);
    assert_eq!(hub.terminal_state(&key), Some(a.snapshot().layout));
    assert_eq!(a.last_broadcast_seq(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_switch_adopts_authoritative_layout() {
    let hub = LoopbackHub::new();
    let seeded = TerminalLayout {
        activated_terminals: set(&["/ws/main/api"]),
        active_terminal_tab: Some("/ws/main/api".into()),
        terminal_visible: true,
    };
    hub.seed_state(WorkspaceKey::new("/ws/main", None), seeded.clone());
    let a = controller(&hub, "a");

    let snapshot = a.switch_workspace(main_ctx()).await;
    settle().await;

    assert_eq!(snapshot.layout, seeded);
    assert!(snapshot.mounted.contains("/ws/main/api"));
    assert_eq!(broadcasts(&hub), 0);

    let pty = hub.pty(&SessionId::from_path("/ws/main/api")).unwrap();
    assert_eq!(pty.cwd, "/ws/main/api");
}

#[tokio::test(start_paused = true)]
async fn test_switching_back_restores_cached_layout() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    let feature = WorkspaceContext::worktree("/ws/main", "feat", "/ws/feat", vec![]);

    a.switch_workspace(main_ctx()).await;
    a.open_tab("/ws/main");
    a.open_tab("/ws/main/web");
    let main_layout = a.snapshot().layout;
    // Let the trailing broadcast reach the backend cache.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let on_feature = a.switch_workspace(feature).await;
    assert!(on_feature.layout.is_initial());
    // Sessions of the other root stay mounted.
    assert!(on_feature.mounted.contains("/ws/main/web"));

    let back = a.switch_workspace(main_ctx()).await;
    assert_eq!(back.layout, main_layout);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_refetches_layout_changed_while_offline() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;
    a.open_tab("/ws/main");
    settle().await;

    hub.set_connection(ConnectionState::Disconnected);
    settle().await;
    let changed = TerminalLayout {
        activated_terminals: set(&["/ws/main", "/ws/main/web"]),
        active_terminal_tab: Some("/ws/main/web".into()),
        terminal_visible: true,
    };
    hub.seed_state(WorkspaceKey::new("/ws/main", None), changed.clone());

    hub.set_connection(ConnectionState::Connected);
    settle().await;

    assert_eq!(a.snapshot().layout, changed);
}

#[tokio::test(start_paused = true)]
async fn test_close_tab_terminates_pty() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;

    a.open_tab("/ws/main");
    settle().await;
    assert_eq!(hub.sessions(), vec![SessionId::from_path("/ws/main")]);

    a.close_tab("/ws/main");
    settle().await;
    assert!(hub.sessions().is_empty());
    assert!(a.snapshot().mounted.is_empty());
    assert_eq!(a.snapshot().layout.active_terminal_tab, None);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_worktree_closes_its_sessions() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    let feature = WorkspaceContext::worktree("/ws/main", "feat", "/ws/feat", vec!["api".into()]);
    a.switch_workspace(feature).await;

    a.open_tab("/ws/feat");
    settle().await;
    a.open_tab("/ws/feat/api");
    settle().await;
    assert_eq!(hub.sessions().len(), 2);

    a.cleanup_worktree("/ws/feat");
    settle().await;

    assert!(hub.sessions().is_empty());
    assert_eq!(hub.calls_named("pty_close").len(), 2);
    let snapshot = a.snapshot();
    assert!(snapshot.mounted.is_empty());
    assert!(snapshot.layout.activated_terminals.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_tab_runs_independent_session() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;

    a.open_tab("/ws/main/api");
    settle().await;
    a.duplicate_tab("/ws/main/api");
    settle().await;

    let snapshot = a.snapshot();
    let active = snapshot.layout.active_terminal_tab.clone().unwrap();
    assert!(active.starts_with("/ws/main/api#"));
    assert_eq!(snapshot.layout.activated_terminals.len(), 2);
    assert_eq!(hub.sessions().len(), 2);

    let pty = hub.pty(&SessionId::from_path(&active)).unwrap();
    assert_eq!(pty.cwd, "/ws/main/api");
    assert!(snapshot.tabs.iter().any(|tab| tab.is_duplicate && tab.name == "api (2)"));
}

#[tokio::test(start_paused = true)]
async fn test_quick_round_trip_keeps_unsent_edits() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    let feature = WorkspaceContext::worktree("/ws/main", "feat", "/ws/feat", vec![]);
    let key = WorkspaceKey::new("/ws/main", None);

    a.switch_workspace(main_ctx()).await;
    a.open_tab("/ws/main");
    a.open_tab("/ws/main/web");
    let before = a.snapshot().layout;

    // Both switches land inside one broadcast window.
    a.switch_workspace(feature).await;
    let back = a.switch_workspace(main_ctx()).await;
    assert_eq!(back.layout, before);
    assert!(back.mounted.contains("/ws/main/web"));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(hub.terminal_state(&key), Some(before.clone()));
    assert_eq!(a.snapshot().layout, before);
}

#[tokio::test(start_paused = true)]
async fn test_pending_broadcast_does_not_override_adopted_peer_layout() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    let b = controller(&hub, "b");
    let key = WorkspaceKey::new("/ws/main", None);
    a.switch_workspace(main_ctx()).await;
    b.switch_workspace(main_ctx()).await;

    // Leading send for the first edit, the second waits for the window.
    a.open_tab("/ws/main");
    a.open_tab("/ws/main/api");
    settle().await;

    b.open_tab("/ws/main/web");
    settle().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let layout = b.snapshot().layout;
    assert_eq!(layout.active_terminal_tab.as_deref(), Some("/ws/main/web"));
    assert_eq!(a.snapshot().layout, layout);
    assert_eq!(hub.terminal_state(&key), Some(layout));
}

#[tokio::test(start_paused = true)]
async fn test_open_tab_nudge_reflows_the_pty_once() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;

    a.open_tab("/ws/main");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        resizes(&hub),
        vec![BackendRequest::PtyResize {
            session_id: SessionId::from_path("/ws/main"),
            cols: 120,
            rows: 17,
        }]
    );
    assert_eq!(a.panel().geometry().height_px, 300);
}

#[tokio::test(start_paused = true)]
async fn test_panel_drag_sends_one_debounced_resize() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;
    a.open_tab("/ws/main");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let baseline = resizes(&hub).len();

    let panel = a.panel();
    panel.begin_drag(500.0);
    for step in 1..=10 {
        panel.drag_to(500.0 - 10.0 * step as f64);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panel.end_drag();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let resizes = resizes(&hub);
    assert_eq!(resizes.len(), baseline + 1);
    assert_eq!(
        resizes.last(),
        Some(&BackendRequest::PtyResize {
            session_id: SessionId::from_path("/ws/main"),
            cols: 120,
            rows: 23,
        })
    );
    assert_eq!(panel.geometry().height_px, 400);
}

#[tokio::test(start_paused = true)]
async fn test_panel_width_change_refits_visible_session() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;
    a.open_tab("/ws/main");
    tokio::time::sleep(Duration::from_millis(100)).await;

    a.panel().set_width(800);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pty = hub.pty(&SessionId::from_path("/ws/main")).unwrap();
    assert_eq!(pty.size, TermSize::new(100, 17));
}

#[tokio::test(start_paused = true)]
async fn test_close_others_and_close_all_terminate_the_rest() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    a.switch_workspace(main_ctx()).await;
    for path in ["/ws/main", "/ws/main/api", "/ws/main/web"] {
        a.open_tab(path);
        settle().await;
    }
    assert_eq!(hub.sessions().len(), 3);

    a.close_others("/ws/main/api");
    settle().await;
    assert_eq!(hub.sessions(), vec![SessionId::from_path("/ws/main/api")]);
    assert_eq!(hub.calls_named("pty_close").len(), 2);
    assert_eq!(a.snapshot().mounted, set(&["/ws/main/api"]));

    a.close_all();
    settle().await;
    assert!(hub.sessions().is_empty());
    assert_eq!(hub.calls_named("pty_close").len(), 3);
    assert!(a.snapshot().mounted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_unmounts_without_closing_again() {
    let hub = LoopbackHub::new();
    let a = controller(&hub, "a");
    let b = controller(&hub, "b");
    a.switch_workspace(main_ctx()).await;
    b.switch_workspace(main_ctx()).await;

    a.open_tab("/ws/main");
    settle().await;
    a.open_tab("/ws/main/api");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(b.snapshot().mounted.contains("/ws/main/api"));

    b.close_tab("/ws/main/api");
    settle().await;

    assert_eq!(hub.calls_named("pty_close").len(), 1);
    let snapshot = a.snapshot();
    assert!(!snapshot.mounted.contains("/ws/main/api"));
    assert!(!a.sessions().surface_paths().contains("/ws/main/api"));
    assert_eq!(snapshot.layout.active_terminal_tab.as_deref(), Some("/ws/main"));
}
