//! External collaborators: where events come from and where blacklist
//! submissions go. The engine only sees these traits.

pub mod monitor;
pub mod rpc;

pub use monitor::MonitorSink;
pub use rpc::JsonRpcEventSource;

use crate::detectors::Pattern;
use crate::errors::{SinkError, SourceError};
use crate::ledger::TradeEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A log that could not be turned into a `TradeEvent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedEvent {
    pub tx_hash: Option<String>,
    pub log_index: Option<u64>,
    pub block_number: Option<u64>,
    pub reason: String,
}

/// Events for one block range
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub events: Vec<TradeEvent>,
    pub malformed: Vec<MalformedEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistChange {
    pub address: String,
    pub is_whitelisted: bool,
    pub block_number: u64,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &str;

    /// Current chain head
    async fn latest_block(&self) -> Result<u64, SourceError>;

    /// Transfer events in `[from_block, to_block]`
    async fn fetch_transfer_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<FetchedBatch, SourceError>;

    /// Whitelist changes observed in `[from_block, to_block]`
    async fn fetch_whitelist_changes(
        &self,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<WhitelistChange>, SourceError> {
        Ok(Vec::new())
    }
}

/// Definitive answer from the submission collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Confirmed { tx_hash: Option<String> },
    /// Deterministic refusal, never retried automatically
    Rejected { reason: String },
}

#[async_trait]
pub trait SubmissionSink: Send + Sync {
    fn name(&self) -> &str;

    async fn submit_blacklist(
        &self,
        address: &str,
        reasons: &[Pattern],
    ) -> Result<SubmitOutcome, SinkError>;
}
