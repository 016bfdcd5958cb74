//! Decision engine: turns detector outcomes into blacklist decisions
//!
//! An address earns a decision when at least `flag_threshold` independent
//! patterns trigger in the same evaluation. Whitelisted and already
//! blacklisted addresses are never evaluated. The engine only ever moves an
//! address between `Tracked` and `Flagged`; everything after that belongs to
//! the dispatch coordinator.

use crate::config::DetectionConfig;
use crate::detectors::{self, Pattern};
use crate::errors::DetectorError;
use crate::ledger::{AddressStats, AddressStatus, TradeLedger};
use crate::logger::{self, LogTag};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEvidence {
    pub pattern: Pattern,
    pub detail: String,
}

/// Evidence-backed request to blacklist one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistDecision {
    pub address: String,
    /// Triggered patterns, sorted by name
    pub reasons: Vec<Pattern>,
    pub evidence: Vec<PatternEvidence>,
    pub decided_at_block: u64,
}

impl BlacklistDecision {
    pub fn reason_names(&self) -> Vec<String> {
        self.reasons.iter().map(|p| p.to_string()).collect()
    }

    pub fn evidence_summary(&self) -> String {
        self.evidence
            .iter()
            .map(|e| format!("{}: {}", e.pattern, e.detail))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Outcome of evaluating a set of addresses
#[derive(Debug, Default)]
pub struct EvaluationReport {
    /// Sorted by address
    pub decisions: Vec<BlacklistDecision>,
    pub faults: Vec<(String, DetectorError)>,
    pub evaluated: usize,
}

pub struct DecisionEngine {
    config: DetectionConfig,
}

impl DecisionEngine {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Evaluate one address
    ///
    /// All detectors run before anything is written, so a detector fault
    /// leaves `stats` exactly as it was.
    pub fn evaluate(
        &self,
        address: &str,
        stats: &mut AddressStats,
        watermark: u64,
    ) -> Result<Option<BlacklistDecision>, DetectorError> {
        if matches!(stats.status, AddressStatus::Whitelisted | AddressStatus::Blacklisted) {
            return Ok(None);
        }

        let outcomes = detectors::run_all(stats, &self.config)?;

        let fired: Vec<_> = outcomes.into_iter().filter(|o| o.triggered).collect();
        let triggered: BTreeSet<Pattern> = fired.iter().map(|o| o.pattern).collect();
        stats.flag_reasons = triggered.clone();

        if triggered.len() < self.config.flag_threshold {
            if stats.status == AddressStatus::Flagged {
                stats.status = AddressStatus::Tracked;
                stats.pending_decision = None;
                logger::info(
                    LogTag::Decision,
                    &format!("{} Flagged -> Tracked ({} patterns)", address, triggered.len()),
                );
            }
            if !triggered.is_empty() {
                logger::debug(
                    LogTag::Decision,
                    &format!("{} below threshold with {:?}", address, triggered),
                );
            }
            return Ok(None);
        }

        if !matches!(stats.status, AddressStatus::Tracked | AddressStatus::Flagged) {
            // Submission already in flight or awaiting retry
            return Ok(None);
        }

        let mut evidence: Vec<PatternEvidence> = fired
            .into_iter()
            .map(|o| PatternEvidence {
                pattern: o.pattern,
                detail: o.evidence,
            })
            .collect();
        evidence.sort_by_key(|e| e.pattern);

        let decision = BlacklistDecision {
            address: address.to_string(),
            reasons: triggered.into_iter().collect(),
            evidence,
            decided_at_block: watermark,
        };

        if stats.status == AddressStatus::Tracked {
            logger::info(LogTag::Decision, &format!("{} Tracked -> Flagged", address));
        }
        stats.status = AddressStatus::Flagged;
        stats.pending_decision = Some(decision.clone());

        logger::warning(
            LogTag::Decision,
            &format!(
                "BOT DETECTED {} at block {}: {}",
                address,
                watermark,
                decision.evidence_summary()
            ),
        );

        Ok(Some(decision))
    }

    /// Evaluate many addresses; detector faults are isolated per address
    pub fn evaluate_all(
        &self,
        ledger: &mut TradeLedger,
        addresses: &BTreeSet<String>,
        parallel: bool,
    ) -> EvaluationReport {
        let watermark = ledger.watermark();
        let entries = ledger.stats_for_evaluation(addresses);
        let evaluated = entries.len();

        let results: Vec<(String, Result<Option<BlacklistDecision>, DetectorError>)> = if parallel {
            entries
                .into_par_iter()
                .map(|(address, stats)| (address.clone(), self.evaluate(address, stats, watermark)))
                .collect()
        } else {
            entries
                .into_iter()
                .map(|(address, stats)| (address.clone(), self.evaluate(address, stats, watermark)))
                .collect()
        };

        let mut report = EvaluationReport {
            evaluated,
            ..EvaluationReport::default()
        };
        for (address, result) in results {
            match result {
                Ok(Some(decision)) => report.decisions.push(decision),
                Ok(None) => {}
                Err(e) => {
                    logger::error(
                        LogTag::Detector,
                        &format!("Detector fault for {}, status unchanged: {}", address, e),
                    );
                    report.faults.push((address, e));
                }
            }
        }
        report.decisions.sort_by(|a, b| a.address.cmp(&b.address));
        report.faults.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }
}
