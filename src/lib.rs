pub mod arguments;
pub mod audit;
pub mod config;
pub mod decision;
pub mod detectors;
pub mod dispatch;
pub mod errors; // Structured error handling
pub mod ledger;
pub mod logger;
pub mod paths;
pub mod persistence;
pub mod process_lock;
pub mod run;
pub mod sources;
