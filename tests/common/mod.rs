#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use canopy_lib::session::{SinkFactory, TerminalSink};
use canopy_lib::CoreConfig;

/// Sink that keeps everything written to it.
#[derive(Default)]
pub struct RecordingSink {
    output: Mutex<String>,
}

impl RecordingSink {
    pub fn output(&self) -> String {
        self.output.lock().clone()
    }
}

impl TerminalSink for RecordingSink {
    fn write_output(&self, data: &str) {
        self.output.lock().push_str(data);
    }
}

/// Hands out one recording sink per path.
#[derive(Default)]
pub struct RecordingSinks {
    sinks: Mutex<HashMap<String, Arc<RecordingSink>>>,
}

impl RecordingSinks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn output(&self, path: &str) -> String {
        self.sinks
            .lock()
            .get(path)
            .map(|sink| sink.output())
            .unwrap_or_default()
    }
}

impl SinkFactory for RecordingSinks {
    fn sink_for(&self, path: &str) -> Arc<dyn TerminalSink> {
        self.sinks
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone()
    }
}

pub fn test_config() -> CoreConfig {
    CoreConfig {
        broadcast_interval_ms: 300,
        resize_debounce_ms: 20,
        poll_interval_ms: 10,
        nudge_delay_ms: 5,
        reconnect_initial_ms: 10,
        reconnect_max_ms: 50,
        ..CoreConfig::default()
    }
}

/// Let spawned tasks run; with paused time this also advances the clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
