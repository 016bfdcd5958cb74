use super::types::{AddressStatus, Direction, OpenBuy, SubmissionFailure, TradeEvent};
use crate::decision::BlacklistDecision;
use crate::detectors::Pattern;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::collections::{BTreeSet, VecDeque};

/// Bounds applied while folding events into an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub window_secs: u64,
    pub max_hold_history: usize,
    pub max_open_buys: usize,
    pub max_same_block_hits: usize,
    pub processed_event_capacity: usize,
}

impl LedgerSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            window_secs: config.detection.high_frequency_window_secs,
            max_hold_history: config.ledger.max_hold_history,
            max_open_buys: config.ledger.max_open_buys,
            max_same_block_hits: config.ledger.max_same_block_hits,
            processed_event_capacity: config.ledger.processed_event_capacity,
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self::from_config(&crate::config::Config::default())
    }
}

/// Accumulated trading statistics for one address
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStats {
    pub total_buys: u64,
    pub total_sells: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub buy_volume: BigUint,
    #[serde_as(as = "DisplayFromStr")]
    pub sell_volume: BigUint,

    /// Unix seconds of recent trades, oldest first, trailing window only
    pub trade_timestamps: VecDeque<u64>,
    /// Buys not yet matched by a sell, oldest first
    pub open_buy_queue: VecDeque<OpenBuy>,
    /// Completed buy->sell block deltas, oldest first
    pub hold_times: VecDeque<u64>,
    pub same_block_hits: BTreeSet<u64>,

    pub status: AddressStatus,
    /// Patterns triggered by the latest evaluation only
    pub flag_reasons: BTreeSet<Pattern>,

    pub first_seen_block: Option<u64>,
    pub last_seen_block: Option<u64>,
    pub last_sell_block: Option<u64>,

    pub submission_attempts: u32,
    pub last_failure: Option<SubmissionFailure>,
    /// Set when automatic handling stopped and an operator has to look
    pub needs_review: bool,
    pub pending_decision: Option<BlacklistDecision>,
}

impl AddressStats {
    pub fn new(status: AddressStatus) -> Self {
        Self {
            total_buys: 0,
            total_sells: 0,
            buy_volume: BigUint::default(),
            sell_volume: BigUint::default(),
            trade_timestamps: VecDeque::new(),
            open_buy_queue: VecDeque::new(),
            hold_times: VecDeque::new(),
            same_block_hits: BTreeSet::new(),
            status,
            flag_reasons: BTreeSet::new(),
            first_seen_block: None,
            last_seen_block: None,
            last_sell_block: None,
            submission_attempts: 0,
            last_failure: None,
            needs_review: false,
            pending_decision: None,
        }
    }

    pub fn total_trades(&self) -> u64 {
        self.total_buys + self.total_sells
    }

    /// Fold one accepted event into the statistics
    pub(crate) fn apply_event(&mut self, event: &TradeEvent, settings: &LedgerSettings) {
        let block = event.block_number;
        if self.first_seen_block.is_none() {
            self.first_seen_block = Some(block);
        }
        self.last_seen_block = Some(self.last_seen_block.map_or(block, |b| b.max(block)));

        self.push_timestamp(event.timestamp, settings.window_secs);

        match event.direction {
            Direction::Buy => {
                self.total_buys += 1;
                self.buy_volume += &event.amount;

                if self.last_sell_block == Some(block) {
                    self.record_same_block(block, settings.max_same_block_hits);
                }

                self.open_buy_queue.push_back(OpenBuy {
                    block_number: block,
                    amount: event.amount.clone(),
                });
                while self.open_buy_queue.len() > settings.max_open_buys {
                    self.open_buy_queue.pop_front();
                }
            }
            Direction::Sell => {
                self.total_sells += 1;
                self.sell_volume += &event.amount;

                if self.open_buy_queue.iter().any(|b| b.block_number == block) {
                    self.record_same_block(block, settings.max_same_block_hits);
                }

                // FIFO: the oldest unmatched buy pays for this sell
                if let Some(buy) = self.open_buy_queue.pop_front() {
                    self.hold_times.push_back(block.saturating_sub(buy.block_number));
                    while self.hold_times.len() > settings.max_hold_history {
                        self.hold_times.pop_front();
                    }
                }

                self.last_sell_block = Some(block);
            }
        }
    }

    fn push_timestamp(&mut self, timestamp: u64, window_secs: u64) {
        self.trade_timestamps.push_back(timestamp);
        let newest = self.trade_timestamps.iter().copied().max().unwrap_or(timestamp);
        let horizon = newest.saturating_sub(window_secs);
        self.trade_timestamps.retain(|ts| *ts >= horizon);
    }

    fn record_same_block(&mut self, block: u64, cap: usize) {
        self.same_block_hits.insert(block);
        while self.same_block_hits.len() > cap {
            self.same_block_hits.pop_first();
        }
    }
}
