/// Structured error handling for Hyperion Guard
///
/// Errors are grouped by the collaborator that produced them so callers can
/// decide between retrying, deferring to the next run, or aborting.
use thiserror::Error;

use crate::detectors::Pattern;

// =============================================================================
// MAIN ERROR TYPE
// =============================================================================

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Event source error: {0}")]
    Source(#[from] SourceError),

    #[error("Run lock at {path} is held by another run (waited {waited_ms}ms)")]
    LockBusy { path: String, waited_ms: u64 },

    #[error("Run deadline exceeded after {seconds} seconds")]
    DeadlineExceeded { seconds: u64 },

    #[error("Audit log error: {0}")]
    Audit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GuardError {
    /// Whether the next scheduled run may succeed without manual action
    pub fn is_recoverable(&self) -> bool {
        match self {
            GuardError::Source(e) => e.is_transient(),
            GuardError::LockBusy { .. } => true,
            GuardError::DeadlineExceeded { .. } => true,
            GuardError::Io(_) => true,
            _ => false,
        }
    }

    /// Conditions that need an operator before any further run
    pub fn is_critical(&self) -> bool {
        matches!(self, GuardError::Config(_) | GuardError::State(StateError::Corrupt { .. }))
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

// =============================================================================
// PERSISTED STATE ERRORS
// =============================================================================

#[derive(Error, Debug)]
pub enum StateError {
    /// The snapshot exists but cannot be trusted. Never recovered automatically.
    #[error("Snapshot {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Snapshot version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Failed to write snapshot {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

// =============================================================================
// EVENT SOURCE ERRORS
// =============================================================================

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Transport failure talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Provider returned error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Transport { .. } | SourceError::Timeout { .. } => true,
            // -32005 is the common "limit exceeded" code for eth_getLogs
            SourceError::Provider { code, .. } => *code == -32005 || *code == 429,
            SourceError::InvalidResponse(_) => false,
        }
    }
}

// =============================================================================
// SUBMISSION SINK ERRORS
// =============================================================================

/// Sink failures are always treated as transient; deterministic refusals are
/// reported as `SubmitOutcome::Rejected` instead.
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Submission transport failure: {0}")]
    Transport(String),

    #[error("Submission not confirmed: {0}")]
    Unconfirmed(String),
}

// =============================================================================
// DETECTOR ERRORS
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("{pattern} overflowed while computing {what}")]
    Overflow { pattern: Pattern, what: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_source_errors() {
        let timeout = SourceError::Timeout {
            endpoint: "http://localhost:8545".to_string(),
            timeout_ms: 1000,
        };
        assert!(timeout.is_transient());
        assert!(!SourceError::InvalidResponse("bad hex".to_string()).is_transient());
        assert!(SourceError::Provider { code: -32005, message: "limit".to_string() }.is_transient());
        assert!(!SourceError::Provider { code: -32602, message: "params".to_string() }.is_transient());
    }

    #[test]
    fn test_corruption_is_critical() {
        let err = GuardError::State(StateError::Corrupt {
            path: "state.json".to_string(),
            reason: "truncated".to_string(),
        });
        assert!(err.is_critical());
        assert!(!err.is_recoverable());

        let busy = GuardError::LockBusy { path: ".lock".to_string(), waited_ms: 5000 };
        assert!(busy.is_recoverable());
        assert!(!busy.is_critical());
    }
}
