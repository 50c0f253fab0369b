use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::transport::Backend;

use super::id::SessionId;
use super::surface::{close_session, write_input, PtySurface, SurfaceOptions};
use super::types::{SinkFactory, TermSize};

/// One surface per mounted session; at most one of them reads at a time.
pub struct SessionMultiplexer {
    backend: Backend,
    sinks: Arc<dyn SinkFactory>,
    options: SurfaceOptions,
    surfaces: Mutex<HashMap<String, PtySurface>>,
}

impl SessionMultiplexer {
    pub fn new(backend: Backend, sinks: Arc<dyn SinkFactory>, options: SurfaceOptions) -> Self {
        Self {
            backend,
            sinks,
            options,
            surfaces: Mutex::new(HashMap::new()),
        }
    }

    /// Align surfaces with the layout. Unmounted surfaces are dropped without
    /// touching their PTY; only the active one is shown, and only when the
    /// panel is visible.
    pub fn sync(&self, mounted: &BTreeSet<String>, active: Option<&str>, visible: bool, size: TermSize) {
        let mut surfaces = self.surfaces.lock();
        surfaces.retain(|path, _| mounted.contains(path));

        for path in mounted {
            if !surfaces.contains_key(path) {
                let surface = PtySurface::new(path, self.backend.clone(), self.sinks.sink_for(path), self.options);
                surfaces.insert(path.clone(), surface);
            }
        }

        let shown = active.filter(|_| visible);
        // Hide before showing so two surfaces never read at once.
        for (path, surface) in surfaces.iter_mut() {
            if Some(path.as_str()) != shown {
                surface.hide();
            }
        }
        if let Some(path) = shown {
            if let Some(surface) = surfaces.get_mut(path) {
                surface.show(size);
            }
        }
    }

    /// Explicit close: stop reading, then terminate the PTY.
    pub async fn close(&self, path: &str) {
        let surface = self.surfaces.lock().remove(path);
        match surface {
            Some(surface) => surface.close().await,
            None => {
                debug!(path, "closing session without a surface");
                close_session(&self.backend, &SessionId::from_path(path)).await;
            }
        }
    }

    /// New panel geometry for whichever surface is visible.
    pub fn refit(&self, size: TermSize) {
        for surface in self.surfaces.lock().values_mut() {
            if surface.is_reading() {
                surface.resize(size);
            }
        }
    }

    /// Resend the visible surface's size so its shell redraws.
    pub fn reflow(&self) {
        for surface in self.surfaces.lock().values_mut() {
            if surface.is_reading() {
                surface.reflow();
            }
        }
    }

    /// Best-effort keystrokes for a session.
    pub async fn write(&self, path: &str, data: &str) {
        write_input(&self.backend, &SessionId::from_path(path), self.options.read_mode, data).await;
    }

    pub fn surface_paths(&self) -> BTreeSet<String> {
        self.surfaces.lock().keys().cloned().collect()
    }

    /// Paths whose surface currently runs a read loop.
    pub fn reading(&self) -> Vec<String> {
        self.surfaces
            .lock()
            .values()
            .filter(|surface| surface.is_reading())
            .map(|surface| surface.path().to_string())
            .collect()
    }
}
