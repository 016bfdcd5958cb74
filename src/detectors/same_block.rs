//! Same block: a buy and a sell by one address inside one block
use super::{DetectorOutcome, Pattern};
use crate::config::DetectionConfig;
use crate::errors::DetectorError;
use crate::ledger::AddressStats;

const EVIDENCE_BLOCKS: usize = 5;

pub fn evaluate(stats: &AddressStats, config: &DetectionConfig) -> Result<DetectorOutcome, DetectorError> {
    let hits = stats.same_block_hits.len();
    let recent: Vec<String> = stats
        .same_block_hits
        .iter()
        .rev()
        .take(EVIDENCE_BLOCKS)
        .map(|b| b.to_string())
        .collect();

    let evidence = if recent.is_empty() {
        "no same-block buy/sell".to_string()
    } else {
        format!("{} same-block buy/sell (latest blocks {})", hits, recent.join(", "))
    };

    Ok(DetectorOutcome::new(
        Pattern::SameBlock,
        hits >= config.same_block_min_hits,
        evidence,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::quiet_stats;

    #[test]
    fn test_single_hit_triggers() {
        let mut stats = quiet_stats();
        stats.same_block_hits.insert(1000);
        let outcome = evaluate(&stats, &DetectionConfig::default()).unwrap();
        assert!(outcome.triggered);
        assert_eq!(outcome.evidence, "1 same-block buy/sell (latest blocks 1000)");
    }

    #[test]
    fn test_no_hits() {
        assert!(!evaluate(&quiet_stats(), &DetectionConfig::default()).unwrap().triggered);
    }
}
