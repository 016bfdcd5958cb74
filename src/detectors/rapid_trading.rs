//! Rapid trading: tokens sold shortly after they were bought
use super::{DetectorOutcome, Pattern};
use crate::config::DetectionConfig;
use crate::errors::DetectorError;
use crate::ledger::AddressStats;

/// Triggers when the mean buy->sell hold time is below the block threshold.
/// Needs at least one completed pair.
pub fn evaluate(stats: &AddressStats, config: &DetectionConfig) -> Result<DetectorOutcome, DetectorError> {
    let pairs = stats.hold_times.len() as u64;
    if pairs == 0 {
        return Ok(DetectorOutcome::new(
            Pattern::RapidTrading,
            false,
            "no completed buy/sell pairs".to_string(),
        ));
    }

    let total = stats
        .hold_times
        .iter()
        .try_fold(0u64, |acc, blocks| acc.checked_add(*blocks))
        .ok_or(DetectorError::Overflow {
            pattern: Pattern::RapidTrading,
            what: "hold time sum",
        })?;
    let limit = config
        .rapid_trading_blocks
        .checked_mul(pairs)
        .ok_or(DetectorError::Overflow {
            pattern: Pattern::RapidTrading,
            what: "hold time limit",
        })?;

    // mean < threshold  <=>  sum < threshold * pairs
    let triggered = total < limit;

    Ok(DetectorOutcome::new(
        Pattern::RapidTrading,
        triggered,
        format!(
            "avg hold {:.1} blocks over {} pairs (limit {})",
            total as f64 / pairs as f64,
            pairs,
            config.rapid_trading_blocks
        ),
    ))
}
