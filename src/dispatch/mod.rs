//! Dispatch coordinator: drives blacklist submissions one at a time
//!
//! ```text
//! Flagged ──▶ BlacklistPending ──▶ Blacklisted
//!                 │      ▲
//!                 ▼      │ retry (bounded)
//!           SubmissionFailed ──▶ needs_review (rejected / budget exhausted)
//! ```
//!
//! Submissions are strictly sequential: the next one starts only after the
//! previous one confirmed, failed or timed out.

mod backoff;

pub use backoff::Backoff;

use crate::audit::{AuditEntry, AuditLog, AuditOutcome};
use crate::config::DispatchConfig;
use crate::decision::BlacklistDecision;
use crate::errors::GuardResult;
use crate::ledger::{AddressStatus, FailureKind, SubmissionFailure, TradeLedger};
use crate::logger::{self, LogTag};
use crate::sources::{SubmissionSink, SubmitOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Final result for one decision in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Blacklisted { tx_hash: Option<String> },
    /// Transient failure, retry-eligible on the next run
    Deferred { message: String },
    Rejected { reason: String },
    RetryExhausted { message: String },
    SkippedWhitelisted,
    /// Address was not in a dispatchable state
    Skipped { status: Option<AddressStatus> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub address: String,
    pub result: DispatchResult,
    /// Attempts made in this run
    pub attempts: u32,
}

enum AttemptError {
    Transient(String),
    Rejected(String),
}

pub struct DispatchCoordinator {
    config: DispatchConfig,
    sink: Arc<dyn SubmissionSink>,
}

impl DispatchCoordinator {
    pub fn new(config: DispatchConfig, sink: Arc<dyn SubmissionSink>) -> Self {
        Self { config, sink }
    }

    /// Total attempts allowed per address across all runs
    pub fn attempt_budget(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Decisions left over from earlier runs that failed transiently
    pub fn retry_candidates(&self, ledger: &TradeLedger) -> Vec<BlacklistDecision> {
        ledger.retryable().into_iter().map(|(_, decision)| decision).collect()
    }

    pub async fn dispatch(
        &self,
        ledger: &mut TradeLedger,
        decisions: Vec<BlacklistDecision>,
        audit: &mut AuditLog,
    ) -> GuardResult<Vec<DispatchOutcome>> {
        let mut outcomes = Vec::with_capacity(decisions.len());
        for decision in decisions {
            let outcome = self.dispatch_one(ledger, &decision).await;
            if let Some(entry) = audit_entry(&decision, &outcome) {
                audit.append(&entry)?;
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn dispatch_one(&self, ledger: &mut TradeLedger, decision: &BlacklistDecision) -> DispatchOutcome {
        let address = decision.address.as_str();
        let done = |result: DispatchResult, attempts: u32| DispatchOutcome {
            address: address.to_string(),
            result,
            attempts,
        };

        if ledger.is_whitelisted(address) {
            logger::info(
                LogTag::Dispatch,
                &format!("Dropping decision for {}, whitelisted since", address),
            );
            return done(DispatchResult::SkippedWhitelisted, 0);
        }

        let Some(stats) = ledger.stats(address) else {
            return done(DispatchResult::Skipped { status: None }, 0);
        };
        let status = stats.status;
        if !matches!(status, AddressStatus::Flagged | AddressStatus::SubmissionFailed) {
            logger::warning(
                LogTag::Dispatch,
                &format!("Not dispatching {} in status {}", address, status),
            );
            return done(DispatchResult::Skipped { status: Some(status) }, 0);
        }

        let budget = self.attempt_budget();
        if stats.submission_attempts >= budget {
            let message = format!("{} attempts used, budget is {}", stats.submission_attempts, budget);
            let attempts = stats.submission_attempts;
            let parked = ledger.close_for_review(
                address,
                SubmissionFailure {
                    kind: FailureKind::RetryExhausted,
                    message: message.clone(),
                    attempts,
                },
            );
            if !parked {
                return done(
                    DispatchResult::Skipped {
                        status: ledger.stats(address).map(|s| s.status),
                    },
                    0,
                );
            }
            return done(DispatchResult::RetryExhausted { message }, 0);
        }

        let mut backoff = Backoff::new(self.config.retry_backoff_ms, self.config.max_backoff_ms);
        let mut made = 0u32;

        loop {
            let Some(attempt) = ledger.begin_attempt(address) else {
                return done(
                    DispatchResult::Skipped {
                        status: ledger.stats(address).map(|s| s.status),
                    },
                    made,
                );
            };
            made += 1;

            logger::info(
                LogTag::Dispatch,
                &format!(
                    "Submitting blacklist for {} (attempt {}/{}) [{}]",
                    address,
                    attempt,
                    budget,
                    decision.reason_names().join(", ")
                ),
            );

            let error = match self.submit(decision).await {
                Ok(tx_hash) => {
                    ledger.mark_blacklisted(address);
                    logger::info(
                        LogTag::Dispatch,
                        &format!(
                            "Blacklisted {} tx {}",
                            address,
                            tx_hash.as_deref().unwrap_or("-")
                        ),
                    );
                    return done(DispatchResult::Blacklisted { tx_hash }, made);
                }
                Err(error) => error,
            };

            match error {
                AttemptError::Rejected(reason) => {
                    ledger.mark_failed(
                        address,
                        SubmissionFailure {
                            kind: FailureKind::Rejected,
                            message: reason.clone(),
                            attempts: attempt,
                        },
                    );
                    logger::warning(
                        LogTag::Dispatch,
                        &format!("Submission for {} rejected: {}", address, reason),
                    );
                    return done(DispatchResult::Rejected { reason }, made);
                }
                AttemptError::Transient(message) if attempt >= budget => {
                    ledger.mark_failed(
                        address,
                        SubmissionFailure {
                            kind: FailureKind::RetryExhausted,
                            message: message.clone(),
                            attempts: attempt,
                        },
                    );
                    logger::error(
                        LogTag::Dispatch,
                        &format!("Retry budget exhausted for {} after {} attempts: {}", address, attempt, message),
                    );
                    return done(DispatchResult::RetryExhausted { message }, made);
                }
                AttemptError::Transient(message) => {
                    ledger.mark_failed(
                        address,
                        SubmissionFailure {
                            kind: FailureKind::Transient,
                            message: message.clone(),
                            attempts: attempt,
                        },
                    );
                    if made >= self.config.attempts_per_run {
                        logger::warning(
                            LogTag::Dispatch,
                            &format!("Deferring {} to next run: {}", address, message),
                        );
                        return done(DispatchResult::Deferred { message }, made);
                    }

                    let delay = backoff.next_delay();
                    logger::debug(
                        LogTag::Dispatch,
                        &format!("Transient failure for {} ({}), retrying in {:?}", address, message, delay),
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn submit(&self, decision: &BlacklistDecision) -> Result<Option<String>, AttemptError> {
        let limit = Duration::from_millis(self.config.submission_timeout_ms);
        match tokio::time::timeout(limit, self.sink.submit_blacklist(&decision.address, &decision.reasons)).await {
            Ok(Ok(SubmitOutcome::Confirmed { tx_hash })) => Ok(tx_hash),
            Ok(Ok(SubmitOutcome::Rejected { reason })) => Err(AttemptError::Rejected(reason)),
            Ok(Err(e)) => Err(AttemptError::Transient(e.to_string())),
            Err(_) => Err(AttemptError::Transient(format!(
                "{} timed out after {}ms",
                self.sink.name(),
                self.config.submission_timeout_ms
            ))),
        }
    }
}

fn audit_entry(decision: &BlacklistDecision, outcome: &DispatchOutcome) -> Option<AuditEntry> {
    let (kind, tx_hash, message) = match &outcome.result {
        DispatchResult::Blacklisted { tx_hash } => (AuditOutcome::Confirmed, tx_hash.clone(), None),
        DispatchResult::Deferred { message } => (AuditOutcome::Deferred, None, Some(message.clone())),
        DispatchResult::Rejected { reason } => (AuditOutcome::Rejected, None, Some(reason.clone())),
        DispatchResult::RetryExhausted { message } => {
            (AuditOutcome::RetryExhausted, None, Some(message.clone()))
        }
        DispatchResult::SkippedWhitelisted => (AuditOutcome::SkippedWhitelisted, None, None),
        DispatchResult::Skipped { .. } => return None,
    };
    Some(AuditEntry::dispatch(decision, kind, outcome.attempts, tx_hash, message))
}
