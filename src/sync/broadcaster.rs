use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::layout::{ClientId, LayoutSnapshot, TerminalLayout, WorkspaceKey};
use crate::transport::Backend;

use super::rate_limit::RateLimiter;

enum Command {
    Schedule(WorkspaceKey, TerminalLayout),
    Flush(WorkspaceKey, oneshot::Sender<()>),
}

/// Rate-limited sender of layout broadcasts.
///
/// Every message carries this client's id and a per-client sequence number
/// that increases with each send. What goes out is the layout the client
/// holds when the message leaves, so a peer update adopted while a trailing
/// send was pending is never overwritten with the older local edit.
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<Command>,
    seq: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Broadcaster {
    pub fn new(
        backend: Backend,
        client_id: ClientId,
        interval: Duration,
        current: watch::Receiver<LayoutSnapshot>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let seq = Arc::new(AtomicU64::new(0));
        let worker = Worker {
            backend,
            client_id,
            seq: seq.clone(),
            limiter: RateLimiter::new(interval),
            current,
        };
        let task = tokio::spawn(worker.run(rx));
        Self { tx, seq, task }
    }

    pub fn schedule(&self, key: WorkspaceKey, layout: TerminalLayout) {
        if self.tx.send(Command::Schedule(key, layout)).is_err() {
            warn!("broadcaster stopped, dropping layout update");
        }
    }

    /// Send whatever is pending for `key` now and wait until the backend
    /// has it.
    pub async fn flush(&self, key: WorkspaceKey) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(key, ack)).is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Sequence number of the last message sent.
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Worker {
    backend: Backend,
    client_id: ClientId,
    seq: Arc<AtomicU64>,
    limiter: RateLimiter<WorkspaceKey, TerminalLayout>,
    current: watch::Receiver<LayoutSnapshot>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.limiter.next_deadline();
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Schedule(key, layout)) => {
                        if let Some(layout) = self.limiter.offer(key.clone(), layout, Instant::now()) {
                            self.send(&key, layout).await;
                        }
                    }
                    Some(Command::Flush(key, ack)) => {
                        if let Some(layout) = self.limiter.take(&key, Instant::now()) {
                            self.send(&key, layout).await;
                        }
                        let _ = ack.send(());
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for (key, layout) in self.limiter.take_due(Instant::now()) {
                        self.send(&key, layout).await;
                    }
                }
            }
        }
    }

    /// The layout held now for `key` when it is still the selected
    /// workspace, else the last one queued for it.
    fn latest(&self, key: &WorkspaceKey, queued: TerminalLayout) -> TerminalLayout {
        let current = self.current.borrow();
        if current.key.as_ref() == Some(key) {
            current.layout.clone()
        } else {
            queued
        }
    }

    async fn send(&self, key: &WorkspaceKey, queued: TerminalLayout) {
        let layout = self.latest(key, queued);
        if layout.is_initial() {
            debug!(key = %key, "layout back to initial, nothing to broadcast");
            return;
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        match self
            .backend
            .broadcast_terminal_state(key, &layout, &self.client_id, Some(seq))
            .await
        {
            Ok(()) => debug!(key = %key, seq, "layout broadcast"),
            Err(err) => warn!(key = %key, seq, error = %err, "layout broadcast failed"),
        }
    }
}
