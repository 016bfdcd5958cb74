use crate::config_struct;

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    /// Root configuration structure containing all sub-configurations
    pub struct Config {
        /// Overrides the platform data directory (snapshot, audit log, lock, logs)
        data_dir: Option<String> = None,

        /// Addresses that are never evaluated (pools, routers, treasury, ...)
        whitelist: Vec<String> = Vec::new(),

        detection: DetectionConfig = DetectionConfig::default(),
        ledger: LedgerConfig = LedgerConfig::default(),
        dispatch: DispatchConfig = DispatchConfig::default(),
        scan: ScanConfig = ScanConfig::default(),
        rpc: RpcConfig = RpcConfig::default(),
    }
}

// ============================================================================
// DETECTION POLICY
// ============================================================================

config_struct! {
    /// Detector thresholds and the blacklist policy
    pub struct DetectionConfig {
        /// Minimum buys + sells before wash trading is considered
        min_sample_size: u64 = 4,

        /// min(buy, sell) / max(buy, sell) volume ratio that must be exceeded
        wash_trading_ratio: f64 = 0.85,

        /// Mean hold time (blocks) below which trading counts as rapid
        rapid_trading_blocks: u64 = 100,

        /// Trades inside the window that must be exceeded
        high_frequency_count: usize = 20,

        /// Sliding window for trade frequency (seconds)
        high_frequency_window_secs: u64 = 3600,

        /// Same-block buy/sell occurrences needed to trigger
        same_block_min_hits: usize = 1,

        /// Independent patterns required for a blacklist decision
        flag_threshold: usize = 2,
    }
}

impl DetectionConfig {
    /// Wash trading ratio as parts per million, for integer comparisons.
    /// Exact because validation refuses ratios finer than one ppm.
    pub fn wash_ratio_ppm(&self) -> u64 {
        (self.wash_trading_ratio * 1_000_000.0).round() as u64
    }
}

// ============================================================================
// LEDGER LIMITS
// ============================================================================

config_struct! {
    /// Memory bounds for long-lived addresses
    pub struct LedgerConfig {
        /// Completed buy->sell pairs kept per address
        max_hold_history: usize = 256,

        /// Unmatched buys kept per address (oldest evicted)
        max_open_buys: usize = 256,

        /// Same-block hits kept per address (lowest block evicted)
        max_same_block_hits: usize = 256,

        /// `(tx_hash, log_index)` keys remembered for duplicate detection
        processed_event_capacity: usize = 100_000,
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

config_struct! {
    /// Blacklist submission retry policy
    pub struct DispatchConfig {
        /// Retries allowed after the first attempt, across runs
        max_retries: u32 = 3,

        /// Attempts made inside a single run before deferring to the next
        attempts_per_run: u32 = 2,

        submission_timeout_ms: u64 = 30_000,
        retry_backoff_ms: u64 = 1_000,
        max_backoff_ms: u64 = 10_000,
    }
}

// ============================================================================
// SCAN
// ============================================================================

config_struct! {
    /// Block range selection and run guards
    pub struct ScanConfig {
        /// Largest block range fetched in one run
        max_block_span: u64 = 50,

        /// Blocks behind head to start from when no snapshot exists
        initial_lookback_blocks: u64 = 50,

        /// Explicit first block for a fresh ledger (wins over lookback)
        start_block: Option<u64> = None,

        run_deadline_secs: u64 = 240,

        /// How long to wait for another run to release the lock
        lock_wait_ms: u64 = 5_000,

        /// Locks older than this were left by a crashed run
        stale_lock_secs: u64 = 900,

        fetch_attempts: u32 = 3,
        fetch_backoff_ms: u64 = 1_000,

        /// Evaluate addresses on the rayon pool
        parallel_evaluation: bool = true,
    }
}

// ============================================================================
// RPC
// ============================================================================

/// Which `Transfer` logs count as trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferClassification {
    /// Only transfers out of (buy) or into (sell) a configured pair
    Pairs,
    /// Every transfer: a sell by the sender and a buy by the receiver
    AllTransfers,
}

config_struct! {
    /// JSON-RPC endpoint and the monitored token
    pub struct RpcConfig {
        url: String = "https://bsc-dataseed.binance.org/".to_string(),
        token_contract: String = "0x654e38a4516f5476d723d770382a5eaf8bae0e0d".to_string(),

        classify: TransferClassification = TransferClassification::Pairs,

        /// Liquidity pairs: transfers out of a pair are buys, into a pair are sells.
        /// Unused with `classify = "all_transfers"`.
        pair_addresses: Vec<String> = vec!["0x90868821cb533f54b90bbdd5ff4128a13e0376ff".to_string()],

        request_timeout_ms: u64 = 15_000,
    }
}
