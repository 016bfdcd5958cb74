/// Configuration utilities - loading and validation
///
/// The loaded `Config` is returned to the caller and passed down explicitly;
/// there is no process-wide configuration instance.
use super::schemas::{Config, TransferClassification};
use crate::errors::{GuardError, GuardResult};
use crate::ledger::is_valid_address;
use crate::logger::{self, LogTag};
use std::path::Path;

/// Load configuration from a TOML file
///
/// A missing file yields defaults (with a warning); an unreadable or invalid
/// file is an error. The result is validated before it is returned.
pub fn load_config_from_path(path: &Path) -> GuardResult<Config> {
    let config = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        parse_config(&contents).map_err(|e| {
            GuardError::Config(format!("Failed to parse config file '{}': {}", path.display(), e))
        })?
    } else {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path.display()),
        );
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

/// Parse configuration text without validating it
pub fn parse_config(contents: &str) -> Result<Config, String> {
    toml::from_str::<Config>(contents).map_err(|e| e.to_string())
}

impl Config {
    /// Reject configurations that would make the policy meaningless
    pub fn validate(&self) -> GuardResult<()> {
        let d = &self.detection;
        if !(d.wash_trading_ratio > 0.0 && d.wash_trading_ratio <= 1.0) {
            return Err(invalid("detection.wash_trading_ratio", "must be in (0, 1]"));
        }
        let scaled = d.wash_trading_ratio * 1_000_000.0;
        if (scaled - scaled.round()).abs() > 1e-3 {
            return Err(invalid(
                "detection.wash_trading_ratio",
                "at most 6 decimal places are supported",
            ));
        }
        if d.flag_threshold == 0 || d.flag_threshold > 4 {
            return Err(invalid("detection.flag_threshold", "must be between 1 and 4"));
        }
        if d.high_frequency_window_secs == 0 {
            return Err(invalid("detection.high_frequency_window_secs", "must be positive"));
        }
        if d.same_block_min_hits == 0 {
            return Err(invalid("detection.same_block_min_hits", "must be positive"));
        }

        let l = &self.ledger;
        if l.max_hold_history == 0 || l.max_open_buys == 0 || l.max_same_block_hits == 0 {
            return Err(invalid("ledger", "history caps must be positive"));
        }
        if l.processed_event_capacity == 0 {
            return Err(invalid("ledger.processed_event_capacity", "must be positive"));
        }

        if self.dispatch.attempts_per_run == 0 {
            return Err(invalid("dispatch.attempts_per_run", "must be at least 1"));
        }
        if self.dispatch.submission_timeout_ms == 0 {
            return Err(invalid("dispatch.submission_timeout_ms", "must be positive"));
        }

        if self.scan.max_block_span == 0 {
            return Err(invalid("scan.max_block_span", "must be at least 1"));
        }
        if self.scan.fetch_attempts == 0 {
            return Err(invalid("scan.fetch_attempts", "must be at least 1"));
        }
        // A live run must never look abandoned to the next one
        let longest_run_secs = self
            .scan
            .run_deadline_secs
            .saturating_add(self.scan.lock_wait_ms.saturating_add(999) / 1000);
        if self.scan.stale_lock_secs <= longest_run_secs {
            return Err(invalid(
                "scan.stale_lock_secs",
                &format!(
                    "must exceed run_deadline_secs + lock wait ({}s)",
                    longest_run_secs
                ),
            ));
        }

        if !is_valid_address(&self.rpc.token_contract) {
            return Err(invalid("rpc.token_contract", "not a 20-byte hex address"));
        }
        if self.rpc.classify == TransferClassification::Pairs && self.rpc.pair_addresses.is_empty() {
            return Err(invalid(
                "rpc.pair_addresses",
                "required unless classify = \"all_transfers\"",
            ));
        }
        for address in self.rpc.pair_addresses.iter().chain(self.whitelist.iter()) {
            if !is_valid_address(address) {
                return Err(invalid("address", &format!("'{}' is not a 20-byte hex address", address)));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> GuardError {
    GuardError::Config(format!("Invalid config field '{}': {}", field, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.min_sample_size, 4);
        assert_eq!(config.detection.wash_trading_ratio, 0.85);
        assert_eq!(config.detection.rapid_trading_blocks, 100);
        assert_eq!(config.detection.high_frequency_count, 20);
        assert_eq!(config.detection.high_frequency_window_secs, 3600);
        assert_eq!(config.detection.flag_threshold, 2);
        assert_eq!(config.dispatch.max_retries, 3);
        assert_eq!(config.detection.wash_ratio_ppm(), 850_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = parse_config(
            r#"
            whitelist = ["0x10ed43c718714eb63d5aa57b78b54704e256024e"]

            [detection]
            flag_threshold = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.detection.flag_threshold, 3);
        assert_eq!(config.detection.rapid_trading_blocks, 100);
        assert_eq!(config.whitelist.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.detection.wash_trading_ratio = 1.5;
        assert!(matches!(config.validate(), Err(GuardError::Config(_))));

        let mut config = Config::default();
        config.detection.flag_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.whitelist.push("not-an-address".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wash_ratio_finer_than_ppm_rejected() {
        let mut config = Config::default();
        config.detection.wash_trading_ratio = 0.8500004;
        assert!(matches!(config.validate(), Err(GuardError::Config(_))));

        config.detection.wash_trading_ratio = 0.850001;
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.wash_ratio_ppm(), 850_001);
    }

    #[test]
    fn test_stale_lock_must_outlast_a_run() {
        let mut config = Config::default();
        config.scan.run_deadline_secs = 1200;
        config.scan.stale_lock_secs = 900;
        assert!(matches!(config.validate(), Err(GuardError::Config(_))));

        // Deadline plus the rounded-up lock wait is still too close
        config.scan.run_deadline_secs = 894;
        config.scan.lock_wait_ms = 5_500;
        assert!(config.validate().is_err());

        config.scan.run_deadline_secs = 893;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_all_transfers_mode_needs_no_pairs() {
        let config = parse_config(
            r#"
            [rpc]
            classify = "all_transfers"
            pair_addresses = []
            "#,
        )
        .unwrap();
        assert_eq!(config.rpc.classify, TransferClassification::AllTransfers);
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.rpc.pair_addresses.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unparseable_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[detection\nflag_threshold = ").unwrap();
        assert!(matches!(load_config_from_path(&path), Err(GuardError::Config(_))));
    }
}
