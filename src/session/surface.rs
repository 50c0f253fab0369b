use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CoreConfig;
use crate::resize::Debouncer;
use crate::transport::Backend;

use super::id::{base_path, SessionId};
use super::types::{ReadMode, TermSize, TerminalSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub read_mode: ReadMode,
    pub poll_interval: Duration,
    pub resize_debounce: Duration,
}

impl SurfaceOptions {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            read_mode: config.read_mode,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            resize_debounce: Duration::from_millis(config.resize_debounce_ms),
        }
    }
}

/// A terminal surface bound to one backend session.
///
/// The PTY is created the first time the surface is shown and outlives
/// hiding; only [`PtySurface::close`] terminates it.
pub struct PtySurface {
    path: String,
    session_id: SessionId,
    backend: Backend,
    sink: Arc<dyn TerminalSink>,
    options: SurfaceOptions,
    created: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    resize: Debouncer,
    size: Option<TermSize>,
}

impl PtySurface {
    pub fn new(path: &str, backend: Backend, sink: Arc<dyn TerminalSink>, options: SurfaceOptions) -> Self {
        Self {
            path: path.to_string(),
            session_id: SessionId::from_path(path),
            backend,
            sink,
            options,
            created: Arc::new(AtomicBool::new(false)),
            reader: None,
            resize: Debouncer::new(options.resize_debounce),
            size: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_reading(&self) -> bool {
        self.reader.as_ref().is_some_and(|reader| !reader.is_finished())
    }

    /// Become visible: create the PTY if needed, then start the read loop.
    pub fn show(&mut self, size: TermSize) {
        if self.reader.is_some() {
            self.resize(size);
            return;
        }
        if self.created.load(Ordering::SeqCst) && self.size != Some(size) {
            self.resize(size);
        }
        self.size = Some(size);

        let task = ReadLoop {
            path: self.path.clone(),
            session_id: self.session_id.clone(),
            backend: self.backend.clone(),
            sink: self.sink.clone(),
            created: self.created.clone(),
            mode: self.options.read_mode,
            poll_interval: self.options.poll_interval,
            size,
        };
        self.reader = Some(tokio::spawn(task.run()));
    }

    /// Stop reading. The PTY keeps running.
    pub fn hide(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            debug!(session_id = %self.session_id, "surface hidden");
        }
    }

    /// Debounced `pty_resize`; skipped until the PTY exists.
    pub fn resize(&mut self, size: TermSize) {
        if self.size == Some(size) {
            return;
        }
        self.schedule_resize(size);
    }

    /// Resend the current size even if it did not change, so the shell
    /// redraws. Goes through the same debounce as [`PtySurface::resize`].
    pub fn reflow(&mut self) {
        if let Some(size) = self.size {
            self.schedule_resize(size);
        }
    }

    fn schedule_resize(&mut self, size: TermSize) {
        self.size = Some(size);

        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let created = self.created.clone();
        self.resize.schedule(async move {
            if !created.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = backend.pty_resize(&session_id, size).await {
                debug!(session_id = %session_id, error = %err, "pty resize failed");
            }
        });
    }

    /// Tear the session down: stop reading first, then terminate the PTY.
    pub async fn close(mut self) {
        self.hide();
        self.resize.cancel();
        close_session(&self.backend, &self.session_id).await;
    }
}

impl Drop for PtySurface {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Best-effort keystroke forwarding. Streaming sessions write on the stream;
/// polling sessions stay on request/response and use `pty_write`.
pub(crate) async fn write_input(backend: &Backend, session_id: &SessionId, mode: ReadMode, data: &str) {
    let result = match mode {
        ReadMode::Streaming => backend.write_stream(session_id, data).await,
        ReadMode::Polling => backend.pty_write(session_id, data).await,
    };
    if let Err(err) = result {
        debug!(session_id = %session_id, error = %err, "pty write failed");
    }
}

pub(crate) async fn close_session(backend: &Backend, session_id: &SessionId) {
    match backend.pty_close(session_id).await {
        Ok(()) => debug!(session_id = %session_id, "pty closed"),
        Err(err) => warn!(session_id = %session_id, error = %err, "pty close failed"),
    }
}

struct ReadLoop {
    path: String,
    session_id: SessionId,
    backend: Backend,
    sink: Arc<dyn TerminalSink>,
    created: Arc<AtomicBool>,
    mode: ReadMode,
    poll_interval: Duration,
    size: TermSize,
}

impl ReadLoop {
    async fn run(self) {
        // Subscribe before creating so no early output is missed.
        let subscription = match self.mode {
            ReadMode::Streaming => Some(self.backend.subscribe_output(&self.session_id)),
            ReadMode::Polling => None,
        };

        if !self.created.load(Ordering::SeqCst) {
            let cwd = base_path(&self.path);
            match self.backend.pty_create(&self.session_id, cwd, self.size).await {
                Ok(()) => {
                    self.created.store(true, Ordering::SeqCst);
                    debug!(session_id = %self.session_id, cwd, cols = self.size.cols, rows = self.size.rows, "pty created");
                }
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, "pty create failed");
                    self.sink.show_error(&format!("Failed to start terminal: {err}"));
                    return;
                }
            }
        }

        match subscription {
            Some(mut subscription) => {
                while let Some(data) = subscription.recv().await {
                    self.sink.write_output(&data);
                }
                debug!(session_id = %self.session_id, "output stream ended");
            }
            None => {
                let mut ticker = tokio::time::interval(self.poll_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match self.backend.pty_read(&self.session_id).await {
                        Ok(data) if !data.is_empty() => self.sink.write_output(&data),
                        Ok(_) => {}
                        Err(err) => debug!(session_id = %self.session_id, error = %err, "pty read failed"),
                    }
                }
            }
        }
    }
}
