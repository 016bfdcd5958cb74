//! High frequency: too many trades inside the trailing window
use super::{DetectorOutcome, Pattern};
use crate::config::DetectionConfig;
use crate::errors::DetectorError;
use crate::ledger::AddressStats;

/// The window trails the newest recorded trade, not the wall clock
pub fn evaluate(stats: &AddressStats, config: &DetectionConfig) -> Result<DetectorOutcome, DetectorError> {
    let Some(newest) = stats.trade_timestamps.iter().copied().max() else {
        return Ok(DetectorOutcome::new(
            Pattern::HighFrequency,
            false,
            "no recent trades".to_string(),
        ));
    };

    let horizon = newest.saturating_sub(config.high_frequency_window_secs);
    let count = stats.trade_timestamps.iter().filter(|ts| **ts >= horizon).count();

    Ok(DetectorOutcome::new(
        Pattern::HighFrequency,
        count > config.high_frequency_count,
        format!(
            "{} trades in {}s window (limit {})",
            count, config.high_frequency_window_secs, config.high_frequency_count
        ),
    ))
}
