use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::{MIN_COLS, MIN_ROWS};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Fit the panel's pixel area to whole cells, never below the minimum
    /// usable size.
    pub fn fit(panel: PanelGeometry, cell: CellMetrics) -> Self {
        let cols = cells(panel.width_px, cell.width).max(MIN_COLS);
        let rows = cells(panel.height_px, cell.height).max(MIN_ROWS);
        Self { cols, rows }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

fn cells(px: u32, cell: f32) -> u16 {
    if cell <= 0.0 || !cell.is_finite() {
        return 0;
    }
    let count = (px as f32 / cell).floor();
    count.clamp(0.0, u16::MAX as f32) as u16
}

/// Pixel area available to the terminal surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PanelGeometry {
    pub width_px: u32,
    pub height_px: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub width: f32,
    pub height: f32,
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self { width: 8.0, height: 17.0 }
    }
}

/// How a visible surface pulls PTY output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Output pushed over the transport's stream subscription
    #[default]
    Streaming,
    /// `pty_read` on a fixed interval
    Polling,
}

/// Rendering side of one terminal surface.
pub trait TerminalSink: Send + Sync {
    fn write_output(&self, data: &str);

    /// Render an error inside the surface itself, as a red line by default.
    fn show_error(&self, message: &str) {
        self.write_output(&format!("\r\n\x1b[31m{message}\x1b[0m\r\n"));
    }
}

/// Hands out the sink a session renders into.
pub trait SinkFactory: Send + Sync {
    fn sink_for(&self, path: &str) -> Arc<dyn TerminalSink>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_divides_by_cell_size() {
        let size = TermSize::fit(
            PanelGeometry { width_px: 800, height_px: 340 },
            CellMetrics { width: 8.0, height: 17.0 },
        );
        assert_eq!(size, TermSize::new(100, 20));
    }

    #[test]
    fn test_fit_clamps_to_minimum() {
        let size = TermSize::fit(PanelGeometry { width_px: 10, height_px: 0 }, CellMetrics::default());
        assert_eq!(size, TermSize::new(MIN_COLS, MIN_ROWS));

        let degenerate = TermSize::fit(
            PanelGeometry { width_px: 800, height_px: 600 },
            CellMetrics { width: 0.0, height: f32::NAN },
        );
        assert_eq!(degenerate, TermSize::new(MIN_COLS, MIN_ROWS));
    }
}
