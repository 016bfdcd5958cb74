/// Command-line arguments for the guard binary
///
/// The command line only selects configuration and log output. Everything
/// that changes detection behaviour lives in the config file.
use crate::logger::{LogTag, LoggerConfig};
use crate::paths;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "hyperion-guard")]
#[command(about = "Scans token transfers and flags bot wallets for blacklisting", long_about = None)]
pub struct Arguments {
    /// Config file (defaults to config.toml in the data directory)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug output for a log tag (repeatable)
    #[arg(long = "debug", value_name = "TAG", value_parser = parse_debug_tag)]
    pub debug: Vec<String>,

    /// Log everything, including per-event detail
    #[arg(short, long)]
    pub verbose: bool,

    /// Console output only
    #[arg(long)]
    pub no_log_file: bool,
}

impl Arguments {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(paths::get_config_path)
    }

    pub fn logger_config(&self) -> LoggerConfig {
        let mut config = LoggerConfig::from_selection(&self.debug, self.verbose);
        config.file_logging = !self.no_log_file;
        config
    }
}

fn parse_debug_tag(raw: &str) -> Result<String, String> {
    let key = raw.trim().to_lowercase();
    match LogTag::from_debug_key(&key) {
        Some(_) => Ok(key),
        None => Err(format!(
            "unknown log tag '{}' (expected one of: system, config, ledger, detector, decision, dispatch, source, persistence, audit)",
            raw
        )),
    }
}
