//! Trade ledger: per-address trading statistics plus the processing watermark
//!
//! The ledger is a plain value owned by the run. It performs no I/O;
//! `snapshot()` / `restore()` hand its full state to the persistence layer.

mod snapshot;
mod stats;
mod types;

pub use snapshot::LedgerSnapshot;
pub use stats::{AddressStats, LedgerSettings};
pub use types::{
    is_valid_address, normalize_address, AddressStatus, Direction, EventKey, FailureKind, OpenBuy,
    SubmissionFailure, TradeEvent,
};

use crate::decision::BlacklistDecision;
use crate::logger::{self, LogTag};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Result of folding one batch into the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Addresses whose statistics changed
    pub touched: BTreeSet<String>,
    pub accepted: usize,
    pub below_watermark: usize,
    pub duplicates: usize,
    pub invalid_address: usize,
}

/// Per-status address counts for run summaries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub tracked: usize,
    pub flagged: usize,
    pub pending: usize,
    pub blacklisted: usize,
    pub failed: usize,
    pub needs_review: usize,
    pub whitelisted: usize,
}

#[derive(Debug, Clone)]
pub struct TradeLedger {
    settings: LedgerSettings,
    watermark_block: u64,
    stats: HashMap<String, AddressStats>,
    processed_order: VecDeque<EventKey>,
    processed: HashSet<EventKey>,
    whitelisted: BTreeSet<String>,
    blacklisted: BTreeSet<String>,
}

impl TradeLedger {
    pub fn new(settings: LedgerSettings) -> Self {
        Self {
            settings,
            watermark_block: 0,
            stats: HashMap::new(),
            processed_order: VecDeque::new(),
            processed: HashSet::new(),
            whitelisted: BTreeSet::new(),
            blacklisted: BTreeSet::new(),
        }
    }

    /// Rebuild a ledger from a persisted snapshot
    pub fn restore(snapshot: LedgerSnapshot, settings: LedgerSettings) -> Self {
        let mut ledger = Self::new(settings);
        ledger.watermark_block = snapshot.watermark_block;
        ledger.stats = snapshot.address_stats.into_iter().collect();
        for key in snapshot.processed_events {
            ledger.remember(key);
        }
        ledger.whitelisted = snapshot.whitelisted;
        ledger.blacklisted = snapshot.blacklisted;
        ledger
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            watermark_block: self.watermark_block,
            address_stats: self
                .stats
                .iter()
                .map(|(address, stats)| (address.clone(), stats.clone()))
                .collect(),
            processed_events: self.processed_order.iter().cloned().collect(),
            whitelisted: self.whitelisted.clone(),
            blacklisted: self.blacklisted.clone(),
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn watermark(&self) -> u64 {
        self.watermark_block
    }

    pub fn stats(&self, address: &str) -> Option<&AddressStats> {
        self.stats.get(address)
    }

    pub fn address_count(&self) -> usize {
        self.stats.len()
    }

    pub fn is_whitelisted(&self, address: &str) -> bool {
        self.whitelisted.contains(address)
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklisted.contains(address)
    }

    pub fn is_processed(&self, key: &EventKey) -> bool {
        self.processed.contains(key)
    }

    /// Fold a batch of events into the ledger
    ///
    /// The batch is applied in `(block, log_index)` order. Events at or below
    /// the watermark in force when the batch starts, and events already seen,
    /// are skipped. The watermark then moves to the highest accepted block.
    ///
    /// One log may carry two sides of a transfer (sender and receiver); both
    /// are accepted from the batch that first delivers the log.
    pub fn ingest(&mut self, mut events: Vec<TradeEvent>) -> IngestSummary {
        events.sort_by_key(|e| (e.block_number, e.log_index));

        let floor = self.watermark_block;
        let mut summary = IngestSummary::default();
        let mut highest = floor;
        let mut fresh_logs: HashSet<EventKey> = HashSet::new();
        let mut sides: HashSet<(EventKey, String, Direction)> = HashSet::new();

        for mut event in events {
            if event.block_number <= floor {
                summary.below_watermark += 1;
                logger::debug(
                    LogTag::Ledger,
                    &format!(
                        "Skipping {}:{} at block {} (watermark {})",
                        event.tx_hash, event.log_index, event.block_number, floor
                    ),
                );
                continue;
            }

            let key = event.key();
            if self.processed.contains(&key) && !fresh_logs.contains(&key) {
                summary.duplicates += 1;
                logger::debug(
                    LogTag::Ledger,
                    &format!("Skipping duplicate event {}:{}", key.tx_hash, key.log_index),
                );
                continue;
            }

            let Some(address) = normalize_address(&event.address) else {
                summary.invalid_address += 1;
                logger::warning(
                    LogTag::Ledger,
                    &format!("Skipping event {}:{} with invalid address '{}'", key.tx_hash, key.log_index, event.address),
                );
                continue;
            };
            event.address = address.clone();

            if !sides.insert((key.clone(), address.clone(), event.direction)) {
                summary.duplicates += 1;
                logger::debug(
                    LogTag::Ledger,
                    &format!("Skipping duplicate event {}:{}", key.tx_hash, key.log_index),
                );
                continue;
            }
            fresh_logs.insert(key.clone());

            let initial = if self.whitelisted.contains(&address) {
                AddressStatus::Whitelisted
            } else {
                AddressStatus::Tracked
            };
            self.stats
                .entry(address.clone())
                .or_insert_with(|| AddressStats::new(initial))
                .apply_event(&event, &self.settings);

            self.remember(key);
            highest = highest.max(event.block_number);
            summary.accepted += 1;
            summary.touched.insert(address);
        }

        self.watermark_block = highest;

        logger::debug(
            LogTag::Ledger,
            &format!(
                "Ingested {} events for {} addresses ({} below watermark, {} duplicates), watermark {}",
                summary.accepted,
                summary.touched.len(),
                summary.below_watermark,
                summary.duplicates,
                self.watermark_block
            ),
        );

        summary
    }

    /// Move the watermark forward after a fully fetched range. Never moves back.
    pub fn advance_watermark(&mut self, block: u64) -> bool {
        if block > self.watermark_block {
            self.watermark_block = block;
            true
        } else {
            false
        }
    }

    /// Apply an external whitelist change. Returns true when anything changed.
    pub fn apply_whitelist_change(&mut self, address: &str, is_whitelisted: bool) -> bool {
        let Some(address) = normalize_address(address) else {
            logger::warning(
                LogTag::Ledger,
                &format!("Ignoring whitelist change for invalid address '{}'", address),
            );
            return false;
        };

        if is_whitelisted {
            let newly_listed = self.whitelisted.insert(address.clone());
            let was_blacklisted = self.blacklisted.remove(&address);
            let stats = self
                .stats
                .entry(address.clone())
                .or_insert_with(|| AddressStats::new(AddressStatus::Whitelisted));
            let previous = stats.status;
            stats.status = AddressStatus::Whitelisted;
            stats.flag_reasons.clear();
            stats.pending_decision = None;
            stats.needs_review = false;

            if previous != AddressStatus::Whitelisted {
                logger::info(
                    LogTag::Ledger,
                    &format!("{} {} -> Whitelisted", address, previous),
                );
            }
            newly_listed || was_blacklisted || previous != AddressStatus::Whitelisted
        } else {
            if !self.whitelisted.remove(&address) {
                return false;
            }
            if let Some(stats) = self.stats.get_mut(&address) {
                // Submission history belongs to the earlier listing
                stats.status = AddressStatus::Tracked;
                stats.submission_attempts = 0;
                stats.last_failure = None;
                stats.needs_review = false;
                stats.pending_decision = None;
                logger::info(LogTag::Ledger, &format!("{} Whitelisted -> Tracked", address));
            }
            true
        }
    }

    /// Mutable access to the statistics of the given addresses, for evaluation.
    /// Unknown addresses are skipped.
    pub fn stats_for_evaluation<'a>(
        &'a mut self,
        addresses: &BTreeSet<String>,
    ) -> Vec<(&'a String, &'a mut AddressStats)> {
        self.stats
            .iter_mut()
            .filter(|(address, _)| addresses.contains(*address))
            .collect()
    }

    /// Flagged or retrying address enters a submission attempt.
    /// Returns the attempt number.
    pub fn begin_attempt(&mut self, address: &str) -> Option<u32> {
        if !self.set_status(address, AddressStatus::BlacklistPending) {
            return None;
        }
        let stats = self.stats.get_mut(address)?;
        stats.submission_attempts += 1;
        Some(stats.submission_attempts)
    }

    /// Submission confirmed on chain
    pub fn mark_blacklisted(&mut self, address: &str) -> bool {
        if self.whitelisted.contains(address) {
            logger::warning(
                LogTag::Ledger,
                &format!("Refusing to blacklist whitelisted address {}", address),
            );
            return false;
        }
        if !self.set_status(address, AddressStatus::Blacklisted) {
            return false;
        }
        if let Some(stats) = self.stats.get_mut(address) {
            stats.pending_decision = None;
            stats.last_failure = None;
            stats.needs_review = false;
        }
        self.blacklisted.insert(address.to_string());
        true
    }

    /// Submission did not confirm
    pub fn mark_failed(&mut self, address: &str, failure: SubmissionFailure) -> bool {
        if !self.set_status(address, AddressStatus::SubmissionFailed) {
            return false;
        }
        if let Some(stats) = self.stats.get_mut(address) {
            stats.needs_review = failure.kind.is_terminal();
            stats.last_failure = Some(failure);
        }
        true
    }

    /// Park an address for manual review without another submission.
    /// A `Flagged` address passes through `BlacklistPending` into
    /// `SubmissionFailed`; any other status except `SubmissionFailed` is refused.
    pub fn close_for_review(&mut self, address: &str, failure: SubmissionFailure) -> bool {
        let Some(status) = self.stats.get(address).map(|s| s.status) else {
            return false;
        };
        match status {
            AddressStatus::SubmissionFailed => {}
            AddressStatus::Flagged => {
                if !self.set_status(address, AddressStatus::BlacklistPending)
                    || !self.set_status(address, AddressStatus::SubmissionFailed)
                {
                    return false;
                }
            }
            _ => return false,
        }
        let Some(stats) = self.stats.get_mut(address) else {
            return false;
        };
        logger::warning(
            LogTag::Ledger,
            &format!("{} needs manual review: {}", address, failure.message),
        );
        stats.needs_review = true;
        stats.last_failure = Some(failure);
        true
    }

    /// Addresses in `SubmissionFailed` whose last failure was transient, with
    /// the decision that is still waiting to be submitted
    pub fn retryable(&self) -> Vec<(String, BlacklistDecision)> {
        let mut out: Vec<(String, BlacklistDecision)> = self
            .stats
            .iter()
            .filter(|(_, s)| s.status == AddressStatus::SubmissionFailed && !s.needs_review)
            .filter(|(_, s)| {
                s.last_failure
                    .as_ref()
                    .map_or(false, |f| f.kind == FailureKind::Transient)
            })
            .filter_map(|(address, s)| {
                s.pending_decision
                    .clone()
                    .map(|decision| (address.clone(), decision))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn counts(&self) -> LedgerCounts {
        let mut counts = LedgerCounts::default();
        for stats in self.stats.values() {
            match stats.status {
                AddressStatus::Tracked => counts.tracked += 1,
                AddressStatus::Flagged => counts.flagged += 1,
                AddressStatus::BlacklistPending => counts.pending += 1,
                AddressStatus::Blacklisted => counts.blacklisted += 1,
                AddressStatus::SubmissionFailed => counts.failed += 1,
                AddressStatus::Whitelisted => counts.whitelisted += 1,
            }
            if stats.needs_review {
                counts.needs_review += 1;
            }
        }
        counts
    }

    fn set_status(&mut self, address: &str, next: AddressStatus) -> bool {
        let Some(stats) = self.stats.get_mut(address) else {
            logger::warning(LogTag::Ledger, &format!("Unknown address {} for {}", address, next));
            return false;
        };
        let previous = stats.status;
        if !previous.can_transition_to(next) {
            logger::warning(
                LogTag::Ledger,
                &format!("Rejected transition {} {} -> {}", address, previous, next),
            );
            return false;
        }
        stats.status = next;
        logger::info(LogTag::Ledger, &format!("{} {} -> {}", address, previous, next));
        true
    }

    fn remember(&mut self, key: EventKey) {
        if self.processed.insert(key.clone()) {
            self.processed_order.push_back(key);
        }
        while self.processed_order.len() > self.settings.processed_event_capacity {
            if let Some(oldest) = self.processed_order.pop_front() {
                self.processed.remove(&oldest);
            }
        }
    }
}
