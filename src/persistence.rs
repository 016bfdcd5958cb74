//! Ledger snapshot file
//!
//! The snapshot is only ever replaced as a whole: the new content goes to a
//! temporary file in the same directory, is synced, then renamed over the old
//! one. A reader therefore sees either the previous run's snapshot or the new
//! one, never a mix.

use crate::errors::{GuardResult, StateError};
use crate::ledger::LedgerSnapshot;
use crate::logger::{self, LogTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    saved_at: DateTime<Utc>,
    ledger: LedgerSnapshot,
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last persisted snapshot
    ///
    /// `Ok(None)` only when no snapshot file exists. A file that does not
    /// parse or fails validation is an error, never an empty ledger.
    pub fn load(&self) -> GuardResult<Option<LedgerSnapshot>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                logger::info(
                    LogTag::Persistence,
                    &format!("No snapshot at {}, starting fresh", self.path.display()),
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let raw: Value = serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;
        let version = raw
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| self.corrupt("missing version".to_string()))?;
        if version != u64::from(SNAPSHOT_VERSION) {
            return Err(StateError::UnsupportedVersion {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                expected: SNAPSHOT_VERSION,
            }
            .into());
        }

        let envelope: SnapshotEnvelope =
            serde_json::from_value(raw).map_err(|e| self.corrupt(e.to_string()))?;
        envelope.ledger.validate().map_err(|reason| self.corrupt(reason))?;

        logger::info(
            LogTag::Persistence,
            &format!(
                "Loaded snapshot saved {} (watermark {}, {} addresses)",
                envelope.saved_at.format("%Y-%m-%d %H:%M:%S"),
                envelope.ledger.watermark_block,
                envelope.ledger.address_stats.len()
            ),
        );
        Ok(Some(envelope.ledger))
    }

    pub fn save(&self, snapshot: &LedgerSnapshot) -> GuardResult<()> {
        snapshot
            .validate()
            .map_err(|reason| self.write_failed(format!("refusing to write invalid snapshot: {}", reason)))?;

        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            ledger: snapshot.clone(),
        };
        let json = serde_json::to_vec_pretty(&envelope)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.write_failed(e.to_string()))?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.write_failed(e.to_string()))?;
        temp.write_all(&json)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| self.write_failed(e.to_string()))?;
        temp.persist(&self.path)
            .map_err(|e| self.write_failed(e.error.to_string()))?;

        logger::debug(
            LogTag::Persistence,
            &format!(
                "Saved snapshot to {} (watermark {}, {} bytes)",
                self.path.display(),
                snapshot.watermark_block,
                json.len()
            ),
        );
        Ok(())
    }

    fn corrupt(&self, reason: String) -> StateError {
        StateError::Corrupt {
            path: self.path.display().to_string(),
            reason,
        }
    }

    fn write_failed(&self, reason: String) -> StateError {
        StateError::WriteFailed {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GuardError;
    use crate::ledger::{Direction, LedgerSettings, TradeEvent, TradeLedger};
    use num_bigint::BigUint;

    fn ledger() -> TradeLedger {
        let mut ledger = TradeLedger::new(LedgerSettings::default());
        ledger.ingest(
            (1..=6u64)
                .map(|block| TradeEvent {
                    address: "0x00000000000000000000000000000000000000a1".to_string(),
                    direction: if block % 2 == 1 { Direction::Buy } else { Direction::Sell },
                    // Larger than u64 to exercise string amounts
                    amount: BigUint::from(u64::MAX) * BigUint::from(block),
                    block_number: block,
                    timestamp: 1_700_000_000 + block,
                    tx_hash: format!("0x{:064x}", block),
                    log_index: 0,
                })
                .collect(),
        );
        ledger.apply_whitelist_change("0x00000000000000000000000000000000000000b2", true);
        ledger
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state").join("ledger.json"));
        let snapshot = ledger().snapshot();

        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        // Overwrite leaves no temp files behind
        store.save(&snapshot).unwrap();
        let files: Vec<_> = fs::read_dir(dir.path().join("state")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("ledger.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_truncated_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("ledger.json"));
        store.save(&ledger().snapshot()).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), &content[..content.len() / 2]).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, GuardError::State(StateError::Corrupt { .. })));
        assert!(err.is_critical());
    }

    #[test]
    fn test_structurally_invalid_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("ledger.json"));
        store.save(&ledger().snapshot()).unwrap();

        // Watermark behind the statistics it claims to cover
        let mut raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        raw["ledger"]["watermark_block"] = Value::from(2u64);
        fs::write(store.path(), serde_json::to_string(&raw).unwrap()).unwrap();

        assert!(matches!(
            store.load().unwrap_err(),
            GuardError::State(StateError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_unknown_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("ledger.json"));
        store.save(&ledger().snapshot()).unwrap();

        let mut raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        raw["version"] = Value::from(9u64);
        fs::write(store.path(), serde_json::to_string(&raw).unwrap()).unwrap();

        assert!(matches!(
            store.load().unwrap_err(),
            GuardError::State(StateError::UnsupportedVersion { found: 9, expected: 1 })
        ));
    }
}
