//! Append-only audit trail
//!
//! One JSON object per line. The file is opened in append mode for every
//! write and never truncated or rewritten.

use crate::decision::{BlacklistDecision, PatternEvidence};
use crate::detectors::Pattern;
use crate::errors::{GuardError, GuardResult};
use crate::logger::{self, LogTag};
use crate::sources::{MalformedEvent, WhitelistChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Confirmed,
    /// Transient failure, retried on a later run
    Deferred,
    Rejected,
    RetryExhausted,
    SkippedWhitelisted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    Decision {
        timestamp: DateTime<Utc>,
        address: String,
        reasons: Vec<Pattern>,
        decided_at_block: u64,
        evidence: Vec<PatternEvidence>,
    },
    Dispatch {
        timestamp: DateTime<Utc>,
        address: String,
        reasons: Vec<Pattern>,
        decided_at_block: u64,
        outcome: AuditOutcome,
        attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx_hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    MalformedEvent {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        event: MalformedEvent,
    },
    WhitelistChange {
        timestamp: DateTime<Utc>,
        address: String,
        is_whitelisted: bool,
        block_number: u64,
    },
}

impl AuditEntry {
    pub fn decision(decision: &BlacklistDecision) -> Self {
        AuditEntry::Decision {
            timestamp: Utc::now(),
            address: decision.address.clone(),
            reasons: decision.reasons.clone(),
            decided_at_block: decision.decided_at_block,
            evidence: decision.evidence.clone(),
        }
    }

    pub fn dispatch(
        decision: &BlacklistDecision,
        outcome: AuditOutcome,
        attempts: u32,
        tx_hash: Option<String>,
        message: Option<String>,
    ) -> Self {
        AuditEntry::Dispatch {
            timestamp: Utc::now(),
            address: decision.address.clone(),
            reasons: decision.reasons.clone(),
            decided_at_block: decision.decided_at_block,
            outcome,
            attempts,
            tx_hash,
            message,
        }
    }

    pub fn malformed(event: &MalformedEvent) -> Self {
        AuditEntry::MalformedEvent {
            timestamp: Utc::now(),
            event: event.clone(),
        }
    }

    pub fn whitelist(change: &WhitelistChange) -> Self {
        AuditEntry::WhitelistChange {
            timestamp: Utc::now(),
            address: change.address.clone(),
            is_whitelisted: change.is_whitelisted,
            block_number: change.block_number,
        }
    }
}

pub struct AuditLog {
    path: PathBuf,
    appended: usize,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            appended: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written through this handle
    pub fn appended(&self) -> usize {
        self.appended
    }

    pub fn append(&mut self, entry: &AuditEntry) -> GuardResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                GuardError::Audit(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GuardError::Audit(format!("cannot open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| GuardError::Audit(format!("cannot append to {}: {}", self.path.display(), e)))?;

        self.appended += 1;
        logger::verbose(LogTag::Audit, line.trim_end());
        Ok(())
    }

    /// Read the whole trail back. Missing file reads as empty.
    pub fn read_entries(path: &Path) -> GuardResult<Vec<AuditEntry>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(GuardError::from))
            .collect()
    }
}
