//! Structured logging for Hyperion Guard
//!
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-tag debug control (`--debug ledger`, `--debug dispatch`, ...)
//! - Dual output: colored console + plain file under the logs directory
//!
//! ## Usage
//!
//! ```rust
//! use hyperion_guard::logger::{self, LogTag};
//!
//! logger::error(LogTag::Persistence, "Snapshot failed validation");
//! logger::info(LogTag::Dispatch, "Blacklist confirmed");
//! logger::debug(LogTag::Ledger, "Skipped duplicate event"); // only with --debug ledger
//! ```
//!
//! Logging works before `init` is called (console only, Info level). `init`
//! applies the CLI selection and opens the log file.

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

use std::path::Path;

pub use config::{get_logger_config, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger with the given configuration and log directory
///
/// When `log_dir` is `None` only console output is produced.
pub fn init(config: LoggerConfig, log_dir: Option<&Path>) {
    set_logger_config(config);

    if let Some(dir) = log_dir {
        if let Err(e) = file::init_file_logging(dir) {
            warning(LogTag::System, &format!("File logging disabled: {}", e));
        }
    }
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level, shown only when debug is enabled for the tag
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level, shown only with --verbose
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Force flush pending file writes
pub fn flush() {
    file::flush_file_logging();
}
