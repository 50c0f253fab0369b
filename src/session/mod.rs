pub mod id;
pub mod multiplexer;
pub mod surface;
mod types;

pub use id::SessionId;
pub use multiplexer::SessionMultiplexer;
pub use surface::{PtySurface, SurfaceOptions};
pub use types::{CellMetrics, PanelGeometry, ReadMode, SinkFactory, TermSize, TerminalSink};
