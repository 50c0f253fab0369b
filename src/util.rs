use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::APP_DIR_NAME;
use crate::error::{Error, Result};

/// Atomically write content to a file, creating its parent directory.
///
/// Writes to a temporary file first, then renames to the target path so
/// readers never observe a partially-written file.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn dir_name() -> String {
    if cfg!(debug_assertions) {
        format!("{APP_DIR_NAME}-dev")
    } else {
        APP_DIR_NAME.to_string()
    }
}

/// Platform data directory (`~/.local/share/canopy` and friends).
pub fn app_data_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .ok_or_else(|| Error::Config("Could not find data directory".into()))?
        .join(dir_name()))
}

/// Platform config directory holding `config.json`.
pub fn app_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| Error::Config("Could not find config directory".into()))?
        .join(dir_name()))
}
