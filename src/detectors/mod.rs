//! Pattern detectors
//!
//! Each detector is a pure function of one address's statistics and the
//! detection thresholds. Detectors never mutate state and never read a clock,
//! so the same input always yields the same outcome.

pub mod high_frequency;
pub mod rapid_trading;
pub mod same_block;
pub mod wash_trading;

use crate::config::DetectionConfig;
use crate::errors::DetectorError;
use crate::ledger::AddressStats;
use serde::{Deserialize, Serialize};

/// Bot trading patterns. Declaration order is alphabetical so the derived
/// `Ord` gives a stable, name-sorted reason list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Pattern {
    HighFrequency,
    RapidTrading,
    SameBlock,
    WashTrading,
}

impl Pattern {
    pub const ALL: [Pattern; 4] = [
        Pattern::HighFrequency,
        Pattern::RapidTrading,
        Pattern::SameBlock,
        Pattern::WashTrading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::HighFrequency => "HighFrequency",
            Pattern::RapidTrading => "RapidTrading",
            Pattern::SameBlock => "SameBlock",
            Pattern::WashTrading => "WashTrading",
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one detector concluded about one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorOutcome {
    pub pattern: Pattern,
    pub triggered: bool,
    /// Human-readable numbers behind the verdict
    pub evidence: String,
}

impl DetectorOutcome {
    pub(crate) fn new(pattern: Pattern, triggered: bool, evidence: String) -> Self {
        Self {
            pattern,
            triggered,
            evidence,
        }
    }
}

/// Run every detector against one address, in `Pattern` order
pub fn run_all(
    stats: &AddressStats,
    config: &DetectionConfig,
) -> Result<Vec<DetectorOutcome>, DetectorError> {
    Ok(vec![
        high_frequency::evaluate(stats, config)?,
        rapid_trading::evaluate(stats, config)?,
        same_block::evaluate(stats, config)?,
        wash_trading::evaluate(stats, config)?,
    ])
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::ledger::{AddressStats, AddressStatus};
    use num_bigint::BigUint;

    /// Statistics that trip no detector with default thresholds
    pub fn quiet_stats() -> AddressStats {
        let mut stats = AddressStats::new(AddressStatus::Tracked);
        stats.total_buys = 2;
        stats.total_sells = 2;
        stats.buy_volume = BigUint::from(1_000u32);
        stats.sell_volume = BigUint::from(500u32);
        stats.hold_times = [500u64, 500].into_iter().collect();
        stats.trade_timestamps = [1_000u64, 2_000, 3_000, 4_000].into_iter().collect();
        stats
    }
}
