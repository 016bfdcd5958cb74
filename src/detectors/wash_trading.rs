//! Wash trading: buy and sell volumes that nearly cancel out
//!
//! Triggers when `min(buy, sell) / max(buy, sell)` exceeds the configured
//! ratio. The ratio is compared by cross-multiplication against a
//! parts-per-million threshold so arbitrarily large volumes lose no precision.

use super::{DetectorOutcome, Pattern};
use crate::config::DetectionConfig;
use crate::errors::DetectorError;
use crate::ledger::AddressStats;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

const PPM: u64 = 1_000_000;

pub fn evaluate(stats: &AddressStats, config: &DetectionConfig) -> Result<DetectorOutcome, DetectorError> {
    let trades = stats.total_trades();
    if trades < config.min_sample_size {
        return Ok(DetectorOutcome::new(
            Pattern::WashTrading,
            false,
            format!("{} trades, below sample size {}", trades, config.min_sample_size),
        ));
    }

    // Ratio is undefined for one-sided activity
    if stats.buy_volume.is_zero() || stats.sell_volume.is_zero() {
        return Ok(DetectorOutcome::new(
            Pattern::WashTrading,
            false,
            format!("one-sided volume ({}B/{}S trades)", stats.total_buys, stats.total_sells),
        ));
    }

    let (low, high) = if stats.buy_volume <= stats.sell_volume {
        (&stats.buy_volume, &stats.sell_volume)
    } else {
        (&stats.sell_volume, &stats.buy_volume)
    };

    let scaled_low = low * &BigUint::from(PPM);
    let threshold = high * &BigUint::from(config.wash_ratio_ppm());
    let triggered = scaled_low > threshold;

    // Always <= PPM because low <= high
    let ratio_ppm = (&scaled_low / high).to_u64().unwrap_or(PPM);

    Ok(DetectorOutcome::new(
        Pattern::WashTrading,
        triggered,
        format!(
            "{}B/{}S trades, volume ratio {:.4} (limit {})",
            stats.total_buys,
            stats.total_sells,
            ratio_ppm as f64 / PPM as f64,
            config.wash_trading_ratio
        ),
    ))
}
