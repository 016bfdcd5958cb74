//! EVM JSON-RPC event source for ERC-20 `Transfer` logs
//!
//! With `classify = "pairs"` transfers are classified against the configured
//! liquidity pairs:
//! - pair -> wallet: BUY by the wallet
//! - wallet -> pair: SELL by the wallet
//! - wallet -> wallet transfers are not trades
//!
//! With `classify = "all_transfers"` every transfer is a SELL by the sender and
//! a BUY by the receiver. Mints and burns are never trades.

use super::{EventSource, FetchedBatch, MalformedEvent};
use crate::config::{RpcConfig, TransferClassification};
use crate::errors::SourceError;
use crate::ledger::{normalize_address, Direction, TradeEvent};
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: Option<String>,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// A transfer that is a trade, before its block timestamp is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTrade {
    pub address: String,
    pub direction: Direction,
    pub amount: BigUint,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

/// Decides which side(s) of a transfer are trades
#[derive(Debug, Clone)]
pub enum TransferClassifier {
    Pairs(HashSet<String>),
    AllTransfers,
}

impl TransferClassifier {
    pub fn from_config(config: &RpcConfig) -> Self {
        match config.classify {
            TransferClassification::Pairs => TransferClassifier::Pairs(
                config
                    .pair_addresses
                    .iter()
                    .filter_map(|p| normalize_address(p))
                    .collect(),
            ),
            TransferClassification::AllTransfers => TransferClassifier::AllTransfers,
        }
    }

    fn sides(&self, from: String, to: String) -> Vec<(String, Direction)> {
        match self {
            TransferClassifier::Pairs(pairs) => match (pairs.contains(&from), pairs.contains(&to)) {
                (true, false) => vec![(to, Direction::Buy)],
                (false, true) => vec![(from, Direction::Sell)],
                _ => Vec::new(),
            },
            TransferClassifier::AllTransfers => vec![(from, Direction::Sell), (to, Direction::Buy)],
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RawBlock {
    timestamp: String,
}

pub struct JsonRpcEventSource {
    client: reqwest::Client,
    url: String,
    token_contract: String,
    classifier: TransferClassifier,
    timeout_ms: u64,
    next_id: AtomicU64,
}

impl JsonRpcEventSource {
    pub fn new(config: &RpcConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SourceError::Transport {
                endpoint: config.url.clone(),
                message: e.to_string(),
            })?;

        let token_contract = normalize_address(&config.token_contract).ok_or_else(|| {
            SourceError::InvalidResponse(format!("invalid token contract {}", config.token_contract))
        })?;

        Ok(Self {
            client,
            url: config.url.clone(),
            token_contract,
            classifier: TransferClassifier::from_config(config),
            timeout_ms: config.request_timeout_ms,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(if status == 429 {
                SourceError::Provider {
                    code: 429,
                    message: "rate limited".to_string(),
                }
            } else {
                SourceError::Transport {
                    endpoint: self.url.clone(),
                    message: format!("HTTP {} for {}", status, method),
                }
            });
        }

        let parsed: RpcResponse<T> = response.json().await.map_err(|e| self.transport_error(e))?;
        if let Some(err) = parsed.error {
            return Err(SourceError::Provider {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| SourceError::InvalidResponse(format!("{} returned no result", method)))
    }

    fn transport_error(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout {
                endpoint: self.url.clone(),
                timeout_ms: self.timeout_ms,
            }
        } else {
            SourceError::Transport {
                endpoint: self.url.clone(),
                message: e.to_string(),
            }
        }
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, SourceError> {
        let raw: RawBlock = self
            .call("eth_getBlockByNumber", json!([format!("0x{:x}", block), false]))
            .await?;
        parse_quantity(&raw.timestamp)
            .ok_or_else(|| SourceError::InvalidResponse(format!("bad timestamp for block {}", block)))
    }
}

#[async_trait]
impl EventSource for JsonRpcEventSource {
    fn name(&self) -> &str {
        "json-rpc"
    }

    async fn latest_block(&self) -> Result<u64, SourceError> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw).ok_or_else(|| SourceError::InvalidResponse(format!("bad block number {}", raw)))
    }

    async fn fetch_transfer_events(&self, from_block: u64, to_block: u64) -> Result<FetchedBatch, SourceError> {
        let logs: Vec<RawLog> = self
            .call(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("0x{:x}", from_block),
                    "toBlock": format!("0x{:x}", to_block),
                    "address": self.token_contract,
                    "topics": [TRANSFER_TOPIC],
                }]),
            )
            .await?;

        let mut batch = FetchedBatch::default();
        let mut trades = Vec::new();
        for log in &logs {
            match decode_transfer(log, &self.classifier) {
                Ok(decoded) => trades.extend(decoded),
                Err(reason) => batch.malformed.push(MalformedEvent {
                    tx_hash: log.transaction_hash.clone(),
                    log_index: log.log_index.as_deref().and_then(parse_quantity),
                    block_number: log.block_number.as_deref().and_then(parse_quantity),
                    reason,
                }),
            }
        }

        let blocks: BTreeSet<u64> = trades.iter().map(|t| t.block_number).collect();
        let mut timestamps = HashMap::with_capacity(blocks.len());
        for block in blocks {
            timestamps.insert(block, self.block_timestamp(block).await?);
        }

        batch.events = trades
            .into_iter()
            .map(|t| TradeEvent {
                timestamp: timestamps.get(&t.block_number).copied().unwrap_or_default(),
                address: t.address,
                direction: t.direction,
                amount: t.amount,
                block_number: t.block_number,
                tx_hash: t.tx_hash,
                log_index: t.log_index,
            })
            .collect();

        logger::debug(
            LogTag::Source,
            &format!(
                "Blocks {}-{}: {} logs, {} trades, {} malformed",
                from_block,
                to_block,
                logs.len(),
                batch.events.len(),
                batch.malformed.len()
            ),
        );

        Ok(batch)
    }
}

/// Turn one raw log into trades. Empty for transfers that are not trades,
/// `Err` for logs that cannot be decoded.
pub fn decode_transfer(log: &RawLog, classifier: &TransferClassifier) -> Result<Vec<DecodedTrade>, String> {
    if log.removed {
        return Ok(Vec::new());
    }
    if log.topics.len() != 3 {
        return Err(format!("expected 3 topics, got {}", log.topics.len()));
    }
    if !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return Ok(Vec::new());
    }

    let from = topic_to_address(&log.topics[1]).ok_or("invalid from topic")?;
    let to = topic_to_address(&log.topics[2]).ok_or("invalid to topic")?;
    let tx_hash = log
        .transaction_hash
        .as_deref()
        .map(str::to_lowercase)
        .ok_or("missing transactionHash")?;
    let block_number = log
        .block_number
        .as_deref()
        .and_then(parse_quantity)
        .ok_or("missing or invalid blockNumber")?;
    let log_index = log
        .log_index
        .as_deref()
        .and_then(parse_quantity)
        .ok_or("missing or invalid logIndex")?;
    let amount = log
        .data
        .as_deref()
        .and_then(parse_amount)
        .ok_or("missing or invalid amount")?;

    if from == ZERO_ADDRESS || to == ZERO_ADDRESS {
        return Ok(Vec::new());
    }

    Ok(classifier
        .sides(from, to)
        .into_iter()
        .map(|(address, direction)| DecodedTrade {
            address,
            direction,
            amount: amount.clone(),
            block_number,
            tx_hash: tx_hash.clone(),
            log_index,
        })
        .collect())
}

fn topic_to_address(topic: &str) -> Option<String> {
    let hex = topic.strip_prefix("0x")?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    normalize_address(&format!("0x{}", &hex[24..]))
}

fn parse_quantity(raw: &str) -> Option<u64> {
    let hex = raw.strip_prefix("0x")?;
    if hex.is_empty() {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

fn parse_amount(raw: &str) -> Option<BigUint> {
    let hex = raw.strip_prefix("0x")?;
    if hex.is_empty() {
        return None;
    }
    BigUint::parse_bytes(hex.as_bytes(), 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIR: &str = "0x90868821cb533f54b90bbdd5ff4128a13e0376ff";
    const WALLET: &str = "0x1111111111111111111111111111111111111111";
    const OTHER: &str = "0x2222222222222222222222222222222222222222";

    fn topic(address: &str) -> String {
        format!("0x000000000000000000000000{}", &address[2..])
    }

    fn raw_log(from: &str, to: &str) -> RawLog {
        serde_json::from_value(json!({
            "address": "0x654e38a4516f5476d723d770382a5eaf8bae0e0d",
            "topics": [TRANSFER_TOPIC, topic(from), topic(to)],
            "data": "0x00000000000000000000000000000000000000000000003635c9adc5dea00000",
            "blockNumber": "0x2a",
            "transactionHash": "0xABCDEF",
            "logIndex": "0x3",
            "removed": false
        }))
        .unwrap()
    }

    fn pairs() -> TransferClassifier {
        TransferClassifier::Pairs([PAIR.to_string()].into_iter().collect())
    }

    fn single(log: &RawLog, classifier: &TransferClassifier) -> DecodedTrade {
        let mut trades = decode_transfer(log, classifier).unwrap();
        assert_eq!(trades.len(), 1);
        trades.remove(0)
    }

    #[test]
    fn test_transfer_out_of_pair_is_buy() {
        let trade = single(&raw_log(PAIR, WALLET), &pairs());
        assert_eq!(trade.address, WALLET);
        assert_eq!(trade.direction, Direction::Buy);
        assert_eq!(trade.block_number, 42);
        assert_eq!(trade.log_index, 3);
        assert_eq!(trade.tx_hash, "0xabcdef");
        // 1000 * 10^18
        assert_eq!(trade.amount, BigUint::from(10u32).pow(21));
    }

    #[test]
    fn test_transfer_into_pair_is_sell() {
        let trade = single(&raw_log(WALLET, PAIR), &pairs());
        assert_eq!(trade.address, WALLET);
        assert_eq!(trade.direction, Direction::Sell);
    }

    #[test]
    fn test_non_trades_are_ignored() {
        assert!(decode_transfer(&raw_log(WALLET, OTHER), &pairs()).unwrap().is_empty());
        assert!(decode_transfer(&raw_log(ZERO_ADDRESS, WALLET), &pairs()).unwrap().is_empty());
        assert!(decode_transfer(&raw_log(PAIR, ZERO_ADDRESS), &pairs()).unwrap().is_empty());

        let mut removed = raw_log(PAIR, WALLET);
        removed.removed = true;
        assert!(decode_transfer(&removed, &pairs()).unwrap().is_empty());
    }

    #[test]
    fn test_all_transfers_records_both_parties() {
        let trades = decode_transfer(&raw_log(WALLET, OTHER), &TransferClassifier::AllTransfers).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!((trades[0].address.as_str(), trades[0].direction), (WALLET, Direction::Sell));
        assert_eq!((trades[1].address.as_str(), trades[1].direction), (OTHER, Direction::Buy));
        assert_eq!(trades[0].log_index, trades[1].log_index);
        assert_eq!(trades[0].amount, trades[1].amount);

        // Pair legs are ordinary parties in this mode
        let trades = decode_transfer(&raw_log(PAIR, WALLET), &TransferClassifier::AllTransfers).unwrap();
        assert_eq!(trades.len(), 2);

        let mints = decode_transfer(&raw_log(ZERO_ADDRESS, WALLET), &TransferClassifier::AllTransfers).unwrap();
        assert!(mints.is_empty());
    }

    #[test]
    fn test_classifier_follows_config() {
        let mut config = RpcConfig::default();
        assert!(matches!(TransferClassifier::from_config(&config), TransferClassifier::Pairs(p) if p.len() == 1));

        config.classify = TransferClassification::AllTransfers;
        assert!(matches!(TransferClassifier::from_config(&config), TransferClassifier::AllTransfers));
    }

    #[test]
    fn test_malformed_logs_are_errors() {
        let mut missing_block = raw_log(PAIR, WALLET);
        missing_block.block_number = None;
        assert!(decode_transfer(&missing_block, &pairs()).is_err());

        let mut bad_data = raw_log(PAIR, WALLET);
        bad_data.data = Some("0x".to_string());
        assert!(decode_transfer(&bad_data, &pairs()).is_err());

        let mut short_topics = raw_log(PAIR, WALLET);
        short_topics.topics.truncate(2);
        assert!(decode_transfer(&short_topics, &pairs()).is_err());
    }

    #[test]
    fn test_quantity_parsing() {
        assert_eq!(parse_quantity("0x0"), Some(0));
        assert_eq!(parse_quantity("0x1b4"), Some(436));
        assert_eq!(parse_quantity("1b4"), None);
        assert_eq!(parse_quantity("0x"), None);
    }
}
