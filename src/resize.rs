use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::PanelGeometry;

/// Terminal panel bounds, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub initial_height_px: u32,
    pub min_height_px: u32,
    pub max_height_px: u32,
    pub width_px: u32,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            initial_height_px: 300,
            min_height_px: 100,
            max_height_px: 800,
            width_px: 960,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DragState {
    start_y: f64,
    start_height: u32,
}

/// Drag-resize of the terminal panel and the post-open resize nudge.
///
/// Geometry changes are published on a watch channel; the session layer
/// refits whichever surface is visible.
pub struct PanelController {
    config: PanelConfig,
    nudge_delay: Duration,
    geometry: watch::Sender<PanelGeometry>,
    drag: Mutex<Option<DragState>>,
}

impl PanelController {
    pub fn new(config: PanelConfig, nudge_delay: Duration) -> Self {
        let max = config.max_height_px.max(config.min_height_px);
        let config = PanelConfig {
            max_height_px: max,
            ..config
        };
        let height = config.initial_height_px.clamp(config.min_height_px, max);
        let (geometry, _) = watch::channel(PanelGeometry {
            width_px: config.width_px,
            height_px: height,
        });
        Self {
            config,
            nudge_delay,
            geometry,
            drag: Mutex::new(None),
        }
    }

    pub fn geometry(&self) -> PanelGeometry {
        *self.geometry.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PanelGeometry> {
        self.geometry.subscribe()
    }

    /// Returns the clamped height actually applied.
    pub fn set_height(&self, height_px: u32) -> u32 {
        let height = height_px.clamp(self.config.min_height_px, self.config.max_height_px);
        self.publish_height(height);
        height
    }

    pub fn set_width(&self, width_px: u32) {
        self.geometry.send_if_modified(|geometry| {
            let changed = geometry.width_px != width_px;
            geometry.width_px = width_px;
            changed
        });
    }

    pub fn begin_drag(&self, y: f64) {
        *self.drag.lock() = Some(DragState {
            start_y: y,
            start_height: self.geometry().height_px,
        });
    }

    /// Pointer moved to `y`. Dragging up grows the panel. Ignored when no
    /// drag is in progress.
    pub fn drag_to(&self, y: f64) -> Option<u32> {
        let drag = (*self.drag.lock())?;
        let delta = drag.start_y - y;
        let target = (drag.start_height as f64 + delta).round().max(0.0) as u32;
        Some(self.set_height(target))
    }

    /// Pointer released; the drag state is removed.
    pub fn end_drag(&self) {
        self.drag.lock().take();
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.lock().is_some()
    }

    /// Shrink by one pixel and restore, forcing the visible PTY to reflow.
    pub async fn nudge(&self) {
        let height = self.geometry().height_px;
        let shrunk = height.saturating_sub(1);
        self.publish_height(shrunk);
        tokio::time::sleep(self.nudge_delay).await;

        // Leave the height alone if a drag moved it meanwhile.
        self.geometry.send_if_modified(|geometry| {
            if geometry.height_px == shrunk {
                geometry.height_px = height;
                true
            } else {
                false
            }
        });
        debug!(height, "panel nudged");
    }

    fn publish_height(&self, height_px: u32) {
        self.geometry.send_if_modified(|geometry| {
            let changed = geometry.height_px != height_px;
            geometry.height_px = height_px;
            changed
        });
    }
}

/// Runs the most recently scheduled job after a quiet period.
///
/// Scheduling aborts whatever was pending; dropping the debouncer cancels
/// pending work.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn schedule<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        });
        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
