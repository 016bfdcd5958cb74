use super::stats::AddressStats;
use super::types::{is_valid_address, AddressStatus, EventKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Everything the ledger needs to resume on the next run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub watermark_block: u64,
    pub address_stats: BTreeMap<String, AddressStats>,
    /// Oldest first; the ledger rotates out the front when full
    pub processed_events: Vec<EventKey>,
    pub whitelisted: BTreeSet<String>,
    pub blacklisted: BTreeSet<String>,
}

impl LedgerSnapshot {
    /// Structural checks run on every load. Any failure means the file cannot
    /// be trusted as the system of record.
    pub fn validate(&self) -> Result<(), String> {
        for address in self
            .address_stats
            .keys()
            .chain(self.whitelisted.iter())
            .chain(self.blacklisted.iter())
        {
            if !is_valid_address(address) || address.to_lowercase() != *address {
                return Err(format!("invalid address key '{}'", address));
            }
        }

        if let Some(both) = self.whitelisted.intersection(&self.blacklisted).next() {
            return Err(format!("{} is both whitelisted and blacklisted", both));
        }

        for address in &self.blacklisted {
            match self.address_stats.get(address) {
                Some(stats) if stats.status == AddressStatus::Blacklisted => {}
                Some(stats) => {
                    return Err(format!(
                        "{} is blacklisted but has status {}",
                        address, stats.status
                    ))
                }
                None => return Err(format!("{} is blacklisted but has no statistics", address)),
            }
        }

        for (address, stats) in &self.address_stats {
            let listed = self.whitelisted.contains(address);
            if listed != (stats.status == AddressStatus::Whitelisted) {
                return Err(format!(
                    "{} whitelist membership disagrees with status {}",
                    address, stats.status
                ));
            }
            if stats.status == AddressStatus::Blacklisted && !self.blacklisted.contains(address) {
                return Err(format!("{} has status Blacklisted but is not in the blacklist", address));
            }
            if stats.status == AddressStatus::BlacklistPending {
                return Err(format!("{} was persisted mid-submission", address));
            }
            if let Some(last) = stats.last_seen_block {
                if last > self.watermark_block {
                    return Err(format!(
                        "{} has activity at block {} above watermark {}",
                        address, last, self.watermark_block
                    ));
                }
            }
        }

        let mut seen = HashSet::with_capacity(self.processed_events.len());
        for key in &self.processed_events {
            if !seen.insert(key) {
                return Err(format!("duplicate processed event {}:{}", key.tx_hash, key.log_index));
            }
        }

        Ok(())
    }
}
