//! One scan, end to end
//!
//! 1. take the run lock (bounded wait)
//! 2. load the snapshot (corruption aborts the run)
//! 3. apply the static whitelist
//! 4. fetch the next block range and whitelist changes
//! 5. ingest, evaluate touched addresses, dispatch decisions and retries
//! 6. persist the snapshot
//!
//! Steps 2 to 6 run under the run deadline. The snapshot is written only when
//! every step succeeded, so a cancelled or failed run leaves the previous
//! snapshot in place.

use crate::audit::{AuditEntry, AuditLog};
use crate::config::{Config, ScanConfig};
use crate::decision::DecisionEngine;
use crate::dispatch::{Backoff, DispatchCoordinator, DispatchResult};
use crate::errors::{GuardError, GuardResult, SourceError};
use crate::ledger::{LedgerCounts, LedgerSettings, TradeLedger};
use crate::logger::{self, LogTag};
use crate::paths;
use crate::persistence::SnapshotStore;
use crate::process_lock::ProcessLock;
use crate::sources::{EventSource, SubmissionSink};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Files touched by a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub snapshot: PathBuf,
    pub audit_log: PathBuf,
    pub lock: PathBuf,
}

impl RunPaths {
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self {
            snapshot: paths::snapshot_path_in(data_dir),
            audit_log: paths::audit_log_path_in(data_dir),
            lock: paths::process_lock_path_in(data_dir),
        }
    }

    pub fn default_locations() -> Self {
        Self::in_data_dir(&paths::get_data_directory())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Scanned range, `None` when already at head
    pub range: Option<(u64, u64)>,
    pub watermark: u64,
    pub events_accepted: usize,
    pub events_skipped: usize,
    pub malformed: usize,
    pub whitelist_changes: usize,
    pub evaluated: usize,
    pub decisions: usize,
    pub detector_faults: usize,
    pub retries: usize,
    pub blacklisted: usize,
    pub deferred: usize,
    pub rejected: usize,
    pub exhausted: usize,
    pub counts: LedgerCounts,
    pub duration_ms: u64,
}

/// Execute one complete scan
pub async fn run_scan(
    config: &Config,
    run_paths: &RunPaths,
    source: &dyn EventSource,
    sink: Arc<dyn SubmissionSink>,
) -> GuardResult<RunSummary> {
    let started = Instant::now();
    let _lock = ProcessLock::acquire(
        &run_paths.lock,
        Duration::from_millis(config.scan.lock_wait_ms),
        Duration::from_secs(config.scan.stale_lock_secs),
    )
    .await?;

    let deadline = Duration::from_secs(config.scan.run_deadline_secs);
    let mut summary = match tokio::time::timeout(deadline, scan_locked(config, run_paths, source, sink)).await {
        Ok(result) => result?,
        Err(_) => {
            logger::error(
                LogTag::System,
                &format!(
                    "Run cancelled after {}s, nothing persisted",
                    config.scan.run_deadline_secs
                ),
            );
            return Err(GuardError::DeadlineExceeded {
                seconds: config.scan.run_deadline_secs,
            });
        }
    };

    summary.duration_ms = started.elapsed().as_millis() as u64;
    log_summary(&summary);
    Ok(summary)
}

async fn scan_locked(
    config: &Config,
    run_paths: &RunPaths,
    source: &dyn EventSource,
    sink: Arc<dyn SubmissionSink>,
) -> GuardResult<RunSummary> {
    let store = SnapshotStore::new(&run_paths.snapshot);
    let mut audit = AuditLog::new(&run_paths.audit_log);
    let settings = LedgerSettings::from_config(config);

    let (mut ledger, fresh) = match store.load()? {
        Some(snapshot) => (TradeLedger::restore(snapshot, settings), false),
        None => (TradeLedger::new(settings), true),
    };

    for address in &config.whitelist {
        if ledger.apply_whitelist_change(address, true) {
            logger::info(LogTag::System, &format!("Static whitelist: {}", address));
        }
    }

    let mut summary = RunSummary::default();

    let head = with_retries("eth_blockNumber", &config.scan, move || source.latest_block()).await?;
    let range = scan_range(&config.scan, ledger.watermark(), fresh, head);
    summary.range = range;

    let mut touched = Default::default();
    if let Some((from, to)) = range {
        logger::info(
            LogTag::Source,
            &format!("Scanning blocks {}-{} (head {}) via {}", from, to, head, source.name()),
        );

        let batch = with_retries("transfer logs", &config.scan, move || {
            source.fetch_transfer_events(from, to)
        })
        .await?;
        let mut changes = with_retries("whitelist changes", &config.scan, move || {
            source.fetch_whitelist_changes(from, to)
        })
        .await?;

        changes.sort_by_key(|c| c.block_number);
        for change in &changes {
            if ledger.apply_whitelist_change(&change.address, change.is_whitelisted) {
                summary.whitelist_changes += 1;
            }
            audit.append(&AuditEntry::whitelist(change))?;
        }

        for malformed in &batch.malformed {
            logger::warning(
                LogTag::Source,
                &format!(
                    "Skipping malformed log {}:{}: {}",
                    malformed.tx_hash.as_deref().unwrap_or("?"),
                    malformed.log_index.map_or("?".to_string(), |i| i.to_string()),
                    malformed.reason
                ),
            );
            audit.append(&AuditEntry::malformed(malformed))?;
        }
        summary.malformed = batch.malformed.len();

        let ingest = ledger.ingest(batch.events);
        summary.events_accepted = ingest.accepted;
        summary.events_skipped = ingest.below_watermark + ingest.duplicates + ingest.invalid_address;
        touched = ingest.touched;

        ledger.advance_watermark(to);
    } else {
        logger::info(
            LogTag::Source,
            &format!("Up to date at block {} (head {})", ledger.watermark(), head),
        );
    }

    let engine = DecisionEngine::new(config.detection.clone());
    let report = engine.evaluate_all(&mut ledger, &touched, config.scan.parallel_evaluation);
    summary.evaluated = report.evaluated;
    summary.decisions = report.decisions.len();
    summary.detector_faults = report.faults.len();

    for decision in &report.decisions {
        audit.append(&AuditEntry::decision(decision))?;
    }

    let coordinator = DispatchCoordinator::new(config.dispatch.clone(), sink);
    let mut queue = coordinator.retry_candidates(&ledger);
    summary.retries = queue.len();
    queue.extend(report.decisions);

    for outcome in coordinator.dispatch(&mut ledger, queue, &mut audit).await? {
        match outcome.result {
            DispatchResult::Blacklisted { .. } => summary.blacklisted += 1,
            DispatchResult::Deferred { .. } => summary.deferred += 1,
            DispatchResult::Rejected { .. } => summary.rejected += 1,
            DispatchResult::RetryExhausted { .. } => summary.exhausted += 1,
            DispatchResult::SkippedWhitelisted | DispatchResult::Skipped { .. } => {}
        }
    }

    store.save(&ledger.snapshot())?;
    summary.watermark = ledger.watermark();
    summary.counts = ledger.counts();
    Ok(summary)
}

/// Block range for this run, `None` when there is nothing new
pub fn scan_range(scan: &ScanConfig, watermark: u64, fresh: bool, head: u64) -> Option<(u64, u64)> {
    let from = if fresh {
        scan.start_block
            .unwrap_or_else(|| head.saturating_sub(scan.initial_lookback_blocks))
            .max(1)
    } else {
        watermark.saturating_add(1)
    };
    if from > head {
        return None;
    }
    let span = scan.max_block_span.max(1);
    Some((from, head.min(from.saturating_add(span - 1))))
}

async fn with_retries<T, F, Fut>(what: &str, scan: &ScanConfig, mut op: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let attempts = scan.fetch_attempts.max(1);
    let mut backoff = Backoff::new(scan.fetch_backoff_ms, scan.fetch_backoff_ms.saturating_mul(8));
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = backoff.next_delay();
                logger::warning(
                    LogTag::Source,
                    &format!(
                        "Fetching {} failed (attempt {}/{}): {}, retrying in {:?}",
                        what, attempt, attempts, e, delay
                    ),
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                logger::error(LogTag::Source, &format!("Fetching {} failed: {}", what, e));
                return Err(e);
            }
        }
    }
}

fn log_summary(summary: &RunSummary) {
    let range = summary
        .range
        .map_or("none".to_string(), |(from, to)| format!("{}-{}", from, to));
    logger::info(
        LogTag::System,
        &format!(
            "Run complete in {}ms: blocks {}, watermark {}, {} events ({} skipped, {} malformed)",
            summary.duration_ms,
            range,
            summary.watermark,
            summary.events_accepted,
            summary.events_skipped,
            summary.malformed
        ),
    );
    logger::info(
        LogTag::System,
        &format!(
            "Evaluated {}, decisions {}, retries {}, blacklisted {}, deferred {}, rejected {}, exhausted {}",
            summary.evaluated,
            summary.decisions,
            summary.retries,
            summary.blacklisted,
            summary.deferred,
            summary.rejected,
            summary.exhausted
        ),
    );
    let counts = &summary.counts;
    logger::info(
        LogTag::System,
        &format!(
            "Ledger: {} tracked, {} flagged, {} blacklisted, {} failed ({} need review), {} whitelisted",
            counts.tracked,
            counts.flagged,
            counts.blacklisted,
            counts.failed,
            counts.needs_review,
            counts.whitelisted
        ),
    );
    if summary.detector_faults > 0 {
        logger::warning(
            LogTag::System,
            &format!("{} addresses hit detector faults", summary.detector_faults),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditOutcome;
    use crate::detectors::Pattern;
    use crate::errors::{SinkError, StateError};
    use crate::ledger::{AddressStatus, Direction, TradeEvent};
    use crate::sources::{FetchedBatch, MalformedEvent, MonitorSink, SubmitOutcome, WhitelistChange};
    use async_trait::async_trait;
    use num_bigint::BigUint;
    use parking_lot::Mutex;
    use std::fs;

    const BOT: &str = "0x00000000000000000000000000000000000000b0";
    const HOLDER: &str = "0x00000000000000000000000000000000000000c1";
    const POOL: &str = "0x00000000000000000000000000000000000000d2";

    struct FakeSource {
        head: u64,
        events: Vec<TradeEvent>,
        malformed: Vec<MalformedEvent>,
        whitelist: Vec<WhitelistChange>,
        transient_head_failures: Mutex<u32>,
        delay: Option<Duration>,
        ranges: Mutex<Vec<(u64, u64)>>,
    }

    impl FakeSource {
        fn new(head: u64, events: Vec<TradeEvent>) -> Self {
            Self {
                head,
                events,
                malformed: Vec::new(),
                whitelist: Vec::new(),
                transient_head_failures: Mutex::new(0),
                delay: None,
                ranges: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn latest_block(&self) -> Result<u64, SourceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut failures = self.transient_head_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SourceError::Timeout {
                    endpoint: "fake".into(),
                    timeout_ms: 1,
                });
            }
            Ok(self.head)
        }

        async fn fetch_transfer_events(&self, from: u64, to: u64) -> Result<FetchedBatch, SourceError> {
            self.ranges.lock().push((from, to));
            Ok(FetchedBatch {
                events: self
                    .events
                    .iter()
                    .filter(|e| e.block_number >= from && e.block_number <= to)
                    .cloned()
                    .collect(),
                malformed: self.malformed.clone(),
            })
        }

        async fn fetch_whitelist_changes(&self, from: u64, to: u64) -> Result<Vec<WhitelistChange>, SourceError> {
            Ok(self
                .whitelist
                .iter()
                .filter(|c| c.block_number >= from && c.block_number <= to)
                .cloned()
                .collect())
        }
    }

    struct ConfirmingSink {
        calls: Mutex<Vec<(String, Vec<Pattern>)>>,
    }

    #[async_trait]
    impl SubmissionSink for ConfirmingSink {
        fn name(&self) -> &str {
            "confirming"
        }

        async fn submit_blacklist(&self, address: &str, reasons: &[Pattern]) -> Result<SubmitOutcome, SinkError> {
            self.calls.lock().push((address.to_string(), reasons.to_vec()));
            Ok(SubmitOutcome::Confirmed {
                tx_hash: Some(format!("0xtx{}", self.calls.lock().len())),
            })
        }
    }

    fn confirming() -> Arc<ConfirmingSink> {
        Arc::new(ConfirmingSink {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn trade(address: &str, direction: Direction, block: u64, log_index: u64, amount: u32) -> TradeEvent {
        TradeEvent {
            address: address.to_string(),
            direction,
            amount: BigUint::from(amount),
            block_number: block,
            timestamp: 1_700_000_000 + block * 3,
            tx_hash: format!("0x{:060x}{:04x}", block, log_index),
            log_index,
        }
    }

    /// BOT round-trips inside single blocks; HOLDER buys and sells much later
    fn market() -> Vec<TradeEvent> {
        let mut events = Vec::new();
        for block in [105u64, 110, 115] {
            events.push(trade(BOT, Direction::Buy, block, 0, 1_000));
            events.push(trade(BOT, Direction::Sell, block, 1, 990));
        }
        events.push(trade(HOLDER, Direction::Buy, 101, 0, 5_000));
        events.push(trade(HOLDER, Direction::Sell, 180, 0, 1_000));
        events
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.scan.start_block = Some(101);
        config.scan.max_block_span = 100;
        config.scan.lock_wait_ms = 100;
        config.scan.fetch_backoff_ms = 1;
        config.dispatch.retry_backoff_ms = 1;
        config.dispatch.max_backoff_ms = 2;
        config.dispatch.submission_timeout_ms = 500;
        config
    }

    fn run_paths(dir: &Path) -> RunPaths {
        RunPaths::in_data_dir(dir)
    }

    #[tokio::test]
    async fn test_full_run_blacklists_bot_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let source = FakeSource::new(200, market());
        let sink = confirming();

        let summary = run_scan(&config(), &paths, &source, sink.clone()).await.unwrap();

        assert_eq!(summary.range, Some((101, 200)));
        assert_eq!(summary.watermark, 200);
        assert_eq!(summary.events_accepted, 8);
        assert_eq!(summary.decisions, 1);
        assert_eq!(summary.blacklisted, 1);
        assert_eq!(summary.counts.blacklisted, 1);
        assert_eq!(summary.counts.tracked, 1);

        let calls = sink.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, BOT);
        assert_eq!(
            calls[0].1,
            vec![Pattern::RapidTrading, Pattern::SameBlock, Pattern::WashTrading]
        );

        let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
        assert_eq!(snapshot.watermark_block, 200);
        assert!(snapshot.blacklisted.contains(BOT));

        let audit = AuditLog::read_entries(&paths.audit_log).unwrap();
        assert_eq!(audit.len(), 2);
        assert!(matches!(audit[0], AuditEntry::Decision { .. }));
        assert!(matches!(
            audit[1],
            AuditEntry::Dispatch {
                outcome: AuditOutcome::Confirmed,
                ..
            }
        ));
        assert!(!paths.lock.exists());
    }

    #[tokio::test]
    async fn test_rerun_without_new_blocks_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let source = FakeSource::new(200, market());
        let sink = confirming();

        run_scan(&config(), &paths, &source, sink.clone()).await.unwrap();
        let before = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();

        let second = run_scan(&config(), &paths, &source, sink.clone()).await.unwrap();
        assert_eq!(second.range, None);
        assert_eq!(second.decisions, 0);
        assert_eq!(sink.calls.lock().len(), 1);
        assert_eq!(SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_ranges_are_bounded_and_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let source = FakeSource::new(200, market());
        let mut config = config();
        config.scan.max_block_span = 50;

        for _ in 0..3 {
            run_scan(&config, &paths, &source, confirming()).await.unwrap();
        }
        assert_eq!(*source.ranges.lock(), vec![(101, 150), (151, 200)]);
    }

    #[tokio::test]
    async fn test_monitor_mode_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let mut source = FakeSource::new(150, market());

        let first = run_scan(&config(), &paths, &source, Arc::new(MonitorSink)).await.unwrap();
        assert_eq!(first.rejected, 1);
        assert_eq!(first.counts.needs_review, 1);

        // More bot activity later: still no second submission
        source.head = 200;
        source.events.push(trade(BOT, Direction::Buy, 160, 0, 1_000));
        source.events.push(trade(BOT, Direction::Sell, 160, 1, 1_000));
        let second = run_scan(&config(), &paths, &source, Arc::new(MonitorSink)).await.unwrap();
        assert_eq!(second.decisions, 0);
        assert_eq!(second.rejected, 0);

        let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
        let stats = &snapshot.address_stats[BOT];
        assert_eq!(stats.status, AddressStatus::SubmissionFailed);
        assert_eq!(stats.submission_attempts, 1);
        assert_eq!(stats.total_trades(), 8);
    }

    #[tokio::test]
    async fn test_static_whitelist_is_never_submitted() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let source = FakeSource::new(200, market());
        let sink = confirming();
        let mut config = config();
        config.whitelist = vec![BOT.to_uppercase().replace("0X", "0x")];

        let summary = run_scan(&config, &paths, &source, sink.clone()).await.unwrap();
        assert_eq!(summary.decisions, 0);
        assert!(sink.calls.lock().is_empty());
        assert_eq!(summary.counts.whitelisted, 1);
    }

    #[tokio::test]
    async fn test_whitelist_change_from_source_is_applied_and_audited() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let mut source = FakeSource::new(200, market());
        source.whitelist.push(WhitelistChange {
            address: BOT.to_string(),
            is_whitelisted: true,
            block_number: 150,
        });
        let sink = confirming();

        let summary = run_scan(&config(), &paths, &source, sink.clone()).await.unwrap();
        assert_eq!(summary.whitelist_changes, 1);
        assert!(sink.calls.lock().is_empty());

        let audit = AuditLog::read_entries(&paths.audit_log).unwrap();
        assert!(matches!(audit[0], AuditEntry::WhitelistChange { is_whitelisted: true, .. }));
    }

    #[tokio::test]
    async fn test_malformed_events_are_audited_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let mut source = FakeSource::new(200, market());
        source.malformed.push(MalformedEvent {
            tx_hash: Some("0xbad".to_string()),
            log_index: Some(0),
            block_number: None,
            reason: "missing or invalid blockNumber".to_string(),
        });

        let summary = run_scan(&config(), &paths, &source, confirming()).await.unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.events_accepted, 8);

        let audit = AuditLog::read_entries(&paths.audit_log).unwrap();
        assert!(audit.iter().any(|e| matches!(e, AuditEntry::MalformedEvent { .. })));
    }

    #[tokio::test]
    async fn test_busy_lock_aborts_without_touching_state() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let _other_run = ProcessLock::acquire(&paths.lock, Duration::ZERO, Duration::from_secs(3600))
            .await
            .unwrap();

        let source = FakeSource::new(200, market());
        let err = run_scan(&config(), &paths, &source, confirming()).await.unwrap_err();

        assert!(matches!(err, GuardError::LockBusy { .. }));
        assert!(!paths.snapshot.exists());
        assert!(source.ranges.lock().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_fatal_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        fs::write(&paths.snapshot, "{\"version\": 1, \"ledger\": ").unwrap();

        let source = FakeSource::new(200, market());
        let err = run_scan(&config(), &paths, &source, confirming()).await.unwrap_err();

        assert!(matches!(err, GuardError::State(StateError::Corrupt { .. })));
        assert_eq!(
            fs::read_to_string(&paths.snapshot).unwrap(),
            "{\"version\": 1, \"ledger\": "
        );
        assert!(!paths.lock.exists());
    }

    #[tokio::test]
    async fn test_deadline_discards_run() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let mut source = FakeSource::new(200, market());
        source.delay = Some(Duration::from_secs(3));
        let mut config = config();
        config.scan.run_deadline_secs = 1;

        let err = run_scan(&config, &paths, &source, confirming()).await.unwrap_err();
        assert!(matches!(err, GuardError::DeadlineExceeded { seconds: 1 }));
        assert!(!paths.snapshot.exists());
    }

    #[tokio::test]
    async fn test_transient_source_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let source = FakeSource::new(200, market());
        *source.transient_head_failures.lock() = 2;

        let summary = run_scan(&config(), &paths, &source, confirming()).await.unwrap();
        assert_eq!(summary.watermark, 200);
    }

    #[tokio::test]
    async fn test_source_outage_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let paths = run_paths(dir.path());
        let source = FakeSource::new(200, market());
        *source.transient_head_failures.lock() = 10;

        let err = run_scan(&config(), &paths, &source, confirming()).await.unwrap_err();
        assert!(matches!(err, GuardError::Source(SourceError::Timeout { .. })));
        assert!(err.is_recoverable());
        assert!(!paths.snapshot.exists());
    }

    #[test]
    fn test_scan_range_selection() {
        let mut scan = ScanConfig::default();
        scan.max_block_span = 50;
        scan.initial_lookback_blocks = 50;

        assert_eq!(scan_range(&scan, 0, true, 1_000), Some((950, 999)));
        assert_eq!(scan_range(&scan, 990, false, 1_000), Some((991, 1_000)));
        assert_eq!(scan_range(&scan, 1_000, false, 1_000), None);
        assert_eq!(scan_range(&scan, 0, true, 10), Some((1, 10)));

        scan.start_block = Some(500);
        assert_eq!(scan_range(&scan, 0, true, 1_000), Some((500, 549)));
    }
}
