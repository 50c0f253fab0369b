//! Tracing setup for canopy processes.
//!
//! Logs always go to a daily file under the data directory. The
//! `CANOPY_LOG_*` variables move that directory, change the filter, mirror
//! records to stderr, or switch logging off entirely.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

use crate::constants::{ENV_LOG_DIR, ENV_LOG_DISABLE, ENV_LOG_LEVEL, ENV_LOG_STDERR};

const DEFAULT_FILTER: &str = "info";

/// Where and how much to log, as read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: PathBuf,
    /// `None` defers to `RUST_LOG`, then to `info`
    pub filter: Option<String>,
    pub stderr: bool,
}

impl LogSettings {
    /// `None` when `CANOPY_LOG_DISABLE` is set.
    pub fn from_env(data_dir: &Path) -> Option<Self> {
        Self::resolve(data_dir, |name| env::var(name).ok())
    }

    fn resolve(data_dir: &Path, var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let flag = |name: &str| var(name).is_some_and(|value| is_truthy(&value));
        if flag(ENV_LOG_DISABLE) {
            return None;
        }

        let dir = var(ENV_LOG_DIR)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));
        let filter = var(ENV_LOG_LEVEL).filter(|level| !level.trim().is_empty());

        Some(Self {
            dir,
            filter,
            stderr: flag(ENV_LOG_STDERR),
        })
    }

    fn env_filter(&self) -> EnvFilter {
        match &self.filter {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        }
    }
}

/// Install the global subscriber writing to `<dir>/<file_name>.<date>`.
///
/// The returned guard owns the background writer. Records still buffered
/// when it drops are flushed, later ones are lost.
pub fn init_logging(data_dir: &Path, file_name: &str) -> Option<WorkerGuard> {
    let settings = LogSettings::from_env(data_dir)?;

    if let Err(err) = fs::create_dir_all(&settings.dir) {
        eprintln!("canopy: cannot create log directory {}: {err}", settings.dir.display());
        return None;
    }

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&settings.dir, file_name));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    let stderr_layer = settings.stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
    });

    // A second init in the same process keeps the first subscriber.
    if let Err(err) = Registry::default()
        .with(settings.env_filter())
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
    {
        eprintln!("canopy: logging already initialized: {err}");
    }
    Some(guard)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
