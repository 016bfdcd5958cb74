//! Centralized path resolution for Hyperion Guard
//!
//! Every file the guard reads or writes is resolved here.
//!
//! ## Path Strategy
//!
//! The base directory follows platform conventions unless the configuration
//! sets `data_dir`:
//! - **macOS**: `~/Library/Application Support/HyperionGuard/`
//! - **Windows**: `%LOCALAPPDATA%\HyperionGuard\`
//! - **Linux**: `$XDG_DATA_HOME/HyperionGuard/` (fallback `~/.local/share/HyperionGuard/`)
//!
//! ## Directory Structure
//!
//! ```text
//! HyperionGuard/
//! ├── data/
//! │ ├── config.toml
//! │ ├── ledger_snapshot.json
//! │ ├── audit.jsonl
//! │ └── .hyperion_guard.lock
//! └── logs/
//!   └── hyperion_guard_*.log
//! ```

use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "HyperionGuard";

// =============================================================================
// BASE DIRECTORY RESOLUTION
// =============================================================================

static BASE_DIRECTORY: OnceCell<PathBuf> = OnceCell::new();

fn resolve_base_directory() -> PathBuf {
  if let Some(dir) = dirs::data_local_dir() {
    return dir.join(APP_DIR);
  }

  if let Some(dir) = dirs::data_dir() {
    return dir.join(APP_DIR);
  }

  if let Some(home) = dirs::home_dir() {
    return home.join(APP_DIR);
  }

  PathBuf::from(APP_DIR)
}

/// Pin the base directory (from `data_dir` in the config)
///
/// Must happen before anything resolves a path. Setting the same directory
/// twice is fine; changing it afterwards is an error.
pub fn set_base_directory(dir: impl Into<PathBuf>) -> Result<(), String> {
  let dir = dir.into();
  match BASE_DIRECTORY.set(dir.clone()) {
    Ok(()) => Ok(()),
    Err(_) if BASE_DIRECTORY.get() == Some(&dir) => Ok(()),
    Err(_) => Err(format!(
      "Base directory already resolved to {}",
      get_base_directory().display()
    )),
  }
}

// =============================================================================
// DIRECTORY ACCESSORS
// =============================================================================

pub fn get_base_directory() -> PathBuf {
  BASE_DIRECTORY.get_or_init(resolve_base_directory).clone()
}

/// Snapshot, audit trail, lock and config
pub fn get_data_directory() -> PathBuf {
  get_base_directory().join("data")
}

pub fn get_logs_directory() -> PathBuf {
  get_base_directory().join("logs")
}

// =============================================================================
// FILE PATHS
// =============================================================================

/// Default configuration file, used when `--config` is not given
///
/// Always under the platform directory: the config itself may move the base
/// directory, so reading it must not pin the base.
pub fn get_config_path() -> PathBuf {
  resolve_base_directory().join("data").join("config.toml")
}

pub fn get_snapshot_path() -> PathBuf {
  snapshot_path_in(&get_data_directory())
}

pub fn get_audit_log_path() -> PathBuf {
  audit_log_path_in(&get_data_directory())
}

/// Returns the run lock file path
pub fn get_process_lock_path() -> PathBuf {
  process_lock_path_in(&get_data_directory())
}

pub fn snapshot_path_in(data_dir: &Path) -> PathBuf {
  data_dir.join("ledger_snapshot.json")
}

pub fn audit_log_path_in(data_dir: &Path) -> PathBuf {
  data_dir.join("audit.jsonl")
}

pub fn process_lock_path_in(data_dir: &Path) -> PathBuf {
  data_dir.join(".hyperion_guard.lock")
}

// =============================================================================
// DIRECTORY CREATION
// =============================================================================

/// Ensures the base, data and logs directories exist
pub fn ensure_all_directories() -> Result<(), String> {
  let dirs_to_create = vec![
    ("base", get_base_directory()),
    ("data", get_data_directory()),
    ("logs", get_logs_directory()),
  ];

  for (name, dir) in dirs_to_create {
    if !dir.exists() {
      std::fs::create_dir_all(&dir).map_err(|e| {
        format!(
          "Failed to create {} directory at {}: {}",
          name,
          dir.display(),
          e
        )
      })?;

      eprintln!("Created directory: {}", dir.display());
    }
  }

  Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
