use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::layout::{
    ClientId, LayoutEvent, LayoutMachine, LayoutSnapshot, SideEffect, TerminalTab, Transition,
    WorkspaceContext, WorkspaceKey,
};
use crate::resize::PanelController;
use crate::session::{CellMetrics, SessionMultiplexer, SinkFactory, SurfaceOptions, TermSize};
use crate::sync::Broadcaster;
use crate::transport::{Backend, ConnectionState};

/// Terminal core for one client: layout machine, sessions, broadcasts and
/// the terminal panel.
///
/// Transitions run synchronously under one lock; their side effects run
/// afterwards on the runtime. The UI layer only subscribes to snapshots.
#[derive(Clone)]
pub struct TerminalController {
    inner: Arc<Inner>,
}

struct Listener {
    key: WorkspaceKey,
    task: JoinHandle<()>,
}

struct Inner {
    machine: Mutex<LayoutMachine>,
    backend: Backend,
    broadcaster: Broadcaster,
    sessions: SessionMultiplexer,
    panel: PanelController,
    cell: CellMetrics,
    snapshot: watch::Sender<LayoutSnapshot>,
    listener: Mutex<Option<Listener>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl TerminalController {
    /// Must be called inside a tokio runtime.
    pub fn new(backend: Backend, sinks: Arc<dyn SinkFactory>, config: &CoreConfig) -> Self {
        Self::with_client_id(backend, sinks, config, ClientId::generate())
    }

    pub fn with_client_id(
        backend: Backend,
        sinks: Arc<dyn SinkFactory>,
        config: &CoreConfig,
        client_id: ClientId,
    ) -> Self {
        let machine = LayoutMachine::new(client_id.clone());
        let (snapshot, current) = watch::channel(machine.snapshot());
        let broadcaster = Broadcaster::new(
            backend.clone(),
            client_id.clone(),
            Duration::from_millis(config.broadcast_interval_ms),
            current,
        );
        let sessions = SessionMultiplexer::new(backend.clone(), sinks, SurfaceOptions::from_config(config));
        let panel = PanelController::new(config.panel, Duration::from_millis(config.nudge_delay_ms));

        let inner = Arc::new(Inner {
            machine: Mutex::new(machine),
            backend,
            broadcaster,
            sessions,
            panel,
            cell: config.cell,
            snapshot,
            listener: Mutex::new(None),
            watchers: Mutex::new(Vec::new()),
        });

        let watchers = vec![
            tokio::spawn(watch_connection(Arc::downgrade(&inner), inner.backend.connection_state())),
            tokio::spawn(watch_panel(Arc::downgrade(&inner), inner.panel.subscribe())),
        ];
        *inner.watchers.lock() = watchers;

        info!(client_id = %client_id, transport = %inner.backend.kind(), "terminal controller started");
        Self { inner }
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.machine.lock().client_id().clone()
    }

    pub fn snapshot(&self) -> LayoutSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LayoutSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn tabs(&self) -> Vec<TerminalTab> {
        self.inner.snapshot.borrow().tabs.clone()
    }

    pub fn panel(&self) -> &PanelController {
        &self.inner.panel
    }

    pub fn sessions(&self) -> &SessionMultiplexer {
        &self.inner.sessions
    }

    /// Sequence number of the last broadcast this client sent.
    pub fn last_broadcast_seq(&self) -> u64 {
        self.inner.broadcaster.last_seq()
    }

    pub fn dispatch(&self, event: LayoutEvent) -> Transition {
        self.inner.dispatch(event).0
    }

    pub fn open_tab(&self, path: &str) -> Transition {
        self.dispatch(LayoutEvent::OpenTab(path.to_string()))
    }

    pub fn close_tab(&self, path: &str) -> Transition {
        self.dispatch(LayoutEvent::CloseTab(path.to_string()))
    }

    pub fn close_others(&self, keep: &str) -> Transition {
        self.dispatch(LayoutEvent::CloseOthers(keep.to_string()))
    }

    pub fn close_all(&self) -> Transition {
        self.dispatch(LayoutEvent::CloseAll)
    }

    /// New independent session next to `path`, discriminated by the current
    /// time in milliseconds.
    pub fn duplicate_tab(&self, path: &str) -> Transition {
        self.dispatch(LayoutEvent::DuplicateTab {
            path: path.to_string(),
            discriminator: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn toggle_visibility(&self) -> Transition {
        self.dispatch(LayoutEvent::ToggleVisibility)
    }

    /// Switch roots: the cached layout applies at once, the backend's
    /// authoritative copy is reconciled before this returns.
    pub async fn switch_workspace(&self, context: WorkspaceContext) -> LayoutSnapshot {
        let (_, fetches) = self.inner.dispatch(LayoutEvent::SwitchWorkspaceRoot(context));
        for fetch in fetches {
            let _ = fetch.await;
        }
        self.snapshot()
    }

    pub fn set_projects(&self, projects: Vec<String>) -> Transition {
        self.dispatch(LayoutEvent::SetProjects(projects))
    }

    /// A worktree was archived or deleted: drop and close every session
    /// under its path.
    pub fn cleanup_worktree(&self, path: &str) -> Transition {
        self.dispatch(LayoutEvent::CleanupPrefix(path.to_string()))
    }

    /// Re-read the backend's cached layout for the current workspace.
    pub async fn resync(&self) {
        let (_, fetches) = self.inner.dispatch(LayoutEvent::Resync);
        for fetch in fetches {
            let _ = fetch.await;
        }
    }

    /// Keystrokes for a session, best-effort.
    pub async fn write(&self, path: &str, data: &str) {
        self.inner.sessions.write(path, data).await;
    }
}

impl Inner {
    fn term_size(&self) -> TermSize {
        TermSize::fit(self.panel.geometry(), self.cell)
    }

    /// Apply under the lock, align sessions and publish, then start side
    /// effects. Returns the handles of any authoritative fetches.
    fn dispatch(self: &Arc<Self>, event: LayoutEvent) -> (Transition, Vec<JoinHandle<()>>) {
        let transition = {
            let mut machine = self.machine.lock();
            let transition = machine.apply(event);
            let snapshot = machine.snapshot();

            self.sessions.sync(
                &snapshot.mounted,
                snapshot.layout.active_terminal_tab.as_deref(),
                snapshot.layout.terminal_visible,
                self.term_size(),
            );
            self.ensure_listener(snapshot.key.as_ref());
            self.snapshot.send_if_modified(|current| {
                if *current == snapshot {
                    false
                } else {
                    *current = snapshot;
                    true
                }
            });
            transition
        };

        let fetches = self.run_effects(&transition.effects);
        (transition, fetches)
    }

    fn run_effects(self: &Arc<Self>, effects: &[SideEffect]) -> Vec<JoinHandle<()>> {
        let mut fetches = Vec::new();
        for effect in effects {
            match effect.clone() {
                SideEffect::Broadcast { key, layout } => self.broadcaster.schedule(key, layout),
                SideEffect::ClosePty(path) => {
                    let inner = self.clone();
                    tokio::spawn(async move {
                        inner.sessions.close(&path).await;
                    });
                }
                SideEffect::ResizeNudge => {
                    let inner = self.clone();
                    tokio::spawn(async move {
                        inner.panel.nudge().await;
                        inner.sessions.reflow();
                    });
                }
                SideEffect::FetchAuthoritative { key, generation } => {
                    let inner = self.clone();
                    fetches.push(tokio::spawn(async move {
                        inner.fetch_authoritative(key, generation).await;
                    }));
                }
            }
        }
        fetches
    }

    async fn fetch_authoritative(self: &Arc<Self>, key: WorkspaceKey, generation: u64) {
        // Our own unsent edit for this key must reach the cache before we
        // read it back.
        self.broadcaster.flush(key.clone()).await;
        match self.backend.get_terminal_state(&key).await {
            Ok(layout) => {
                debug!(key = %key, generation, found = layout.is_some(), "authoritative layout fetched");
                self.dispatch(LayoutEvent::ReconcileFetched { key, generation, layout });
            }
            Err(err) => warn!(key = %key, error = %err, "failed to fetch terminal state"),
        }
    }

    /// One peer-update listener, for the selected workspace only.
    fn ensure_listener(self: &Arc<Self>, key: Option<&WorkspaceKey>) {
        let mut listener = self.listener.lock();
        if listener.as_ref().map(|l| &l.key) == key {
            return;
        }
        if let Some(previous) = listener.take() {
            previous.task.abort();
        }
        let Some(key) = key else {
            return;
        };

        let mut subscription = self.backend.subscribe_terminal_state(key);
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.dispatch(LayoutEvent::ReceiveExternalUpdate(message));
            }
        });
        *listener = Some(Listener {
            key: key.clone(),
            task,
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.task.abort();
        }
        for watcher in self.watchers.lock().drain(..) {
            watcher.abort();
        }
    }
}

/// Re-fetch the authoritative layout every time the connection comes back.
async fn watch_connection(inner: Weak<Inner>, mut state: watch::Receiver<ConnectionState>) {
    let mut connected = *state.borrow_and_update() == ConnectionState::Connected;
    while state.changed().await.is_ok() {
        let now_connected = *state.borrow_and_update() == ConnectionState::Connected;
        if now_connected && !connected {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            info!("backend reconnected, resyncing terminal layout");
            inner.dispatch(LayoutEvent::Resync);
        }
        connected = now_connected;
    }
}

/// Refit the visible session whenever the panel geometry changes.
async fn watch_panel(inner: Weak<Inner>, mut geometry: watch::Receiver<crate::session::PanelGeometry>) {
    while geometry.changed().await.is_ok() {
        let panel = *geometry.borrow_and_update();
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.sessions.refit(TermSize::fit(panel, inner.cell));
    }
}
