/// Logger configuration, held in a process-wide cell so any module can log
/// without threading a handle through every call.
use super::levels::LogLevel;
use super::tags::LogTag;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Highest level that is displayed
    pub min_level: LogLevel,
    /// Tags with debug output enabled
    pub debug_tags: HashSet<LogTag>,
    /// Mirror console output to the log file
    pub file_logging: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            file_logging: true,
        }
    }
}

impl LoggerConfig {
    /// Build from CLI selections: tag keys for debug output and the verbose switch
    pub fn from_selection(debug_keys: &[String], verbose: bool) -> Self {
        let debug_tags: HashSet<LogTag> = debug_keys
            .iter()
            .filter_map(|k| LogTag::from_debug_key(k))
            .collect();

        let min_level = if verbose {
            LogLevel::Verbose
        } else if !debug_tags.is_empty() {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };

        Self {
            min_level,
            debug_tags,
            file_logging: true,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let config = LOGGER_CONFIG.read();
    config.min_level == LogLevel::Verbose || config.debug_tags.contains(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_enables_debug_level() {
        let config = LoggerConfig::from_selection(&["dispatch".to_string(), "nope".to_string()], false);
        assert_eq!(config.min_level, LogLevel::Debug);
        assert!(config.debug_tags.contains(&LogTag::Dispatch));
        assert_eq!(config.debug_tags.len(), 1);
    }

    #[test]
    fn test_verbose_wins() {
        let config = LoggerConfig::from_selection(&[], true);
        assert_eq!(config.min_level, LogLevel::Verbose);
    }
}
