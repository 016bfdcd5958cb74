use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

/// Trade direction relative to the address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

/// One observed transfer of the monitored token, attributed to one address
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub address: String,
    pub direction: Direction,
    /// Token base units
    #[serde_as(as = "DisplayFromStr")]
    pub amount: BigUint,
    pub block_number: u64,
    /// Block timestamp, unix seconds
    pub timestamp: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

impl TradeEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            tx_hash: self.tx_hash.to_lowercase(),
            log_index: self.log_index,
        }
    }
}

/// Identity of an event for duplicate detection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub tx_hash: String,
    pub log_index: u64,
}

/// Lifecycle of an address inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressStatus {
    Tracked,
    Flagged,
    BlacklistPending,
    Blacklisted,
    SubmissionFailed,
    Whitelisted,
}

impl AddressStatus {
    /// Allowed status changes. Whitelisting is always allowed and
    /// un-whitelisting returns to `Tracked`.
    pub fn can_transition_to(self, next: AddressStatus) -> bool {
        use AddressStatus::*;
        match (self, next) {
            (_, Whitelisted) => true,
            (Whitelisted, Tracked) => true,
            (Whitelisted, _) => false,
            (Tracked, Flagged) | (Flagged, Tracked) => true,
            (Flagged, BlacklistPending) => true,
            (BlacklistPending, Blacklisted) => true,
            (BlacklistPending, SubmissionFailed) => true,
            (SubmissionFailed, BlacklistPending) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressStatus::Tracked => "Tracked",
            AddressStatus::Flagged => "Flagged",
            AddressStatus::BlacklistPending => "BlacklistPending",
            AddressStatus::Blacklisted => "Blacklisted",
            AddressStatus::SubmissionFailed => "SubmissionFailed",
            AddressStatus::Whitelisted => "Whitelisted",
        }
    }
}

impl std::fmt::Display for AddressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the last submission for an address did not confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transport error or timeout, retried on a later run
    Transient,
    /// Deterministic refusal by the sink, needs manual review
    Rejected,
    /// Transient failures used up the retry budget, needs manual review
    RetryExhausted,
}

impl FailureKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FailureKind::Transient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

/// Unmatched buy waiting for a sell
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBuy {
    pub block_number: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: BigUint,
}

/// Lowercase an address and check it is `0x` + 40 hex digits
pub fn normalize_address(address: &str) -> Option<String> {
    let lowered = address.trim().to_lowercase();
    if is_valid_address(&lowered) {
        Some(lowered)
    } else {
        None
    }
}

pub fn is_valid_address(address: &str) -> bool {
    let Some(hex) = address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) else {
        return false;
    };
    hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())
}
