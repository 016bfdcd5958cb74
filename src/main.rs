use anyhow::{Context, Result};
use clap::Parser;
use hyperion_guard::{
    arguments::Arguments,
    config::load_config_from_path,
    logger::{self, LogTag},
    paths,
    run::{run_scan, RunPaths},
    sources::{JsonRpcEventSource, MonitorSink},
};
use std::sync::Arc;

/// Single scan per invocation; scheduling is left to cron/systemd.
///
/// Exit codes: 0 success, 1 run failed (retry on next schedule),
/// 2 operator action required (bad config, corrupt snapshot).
#[tokio::main]
async fn main() {
    let args = Arguments::parse();

    match run(&args).await {
        Ok(()) => {
            logger::flush();
        }
        Err(e) => {
            let critical = e
                .downcast_ref::<hyperion_guard::errors::GuardError>()
                .map_or(false, |g| g.is_critical());
            logger::error(LogTag::System, &format!("{:#}", e));
            logger::flush();
            std::process::exit(if critical { 2 } else { 1 });
        }
    }
}

async fn run(args: &Arguments) -> Result<()> {
    let config = load_config_from_path(&args.config_path())?;

    if let Some(dir) = &config.data_dir {
        paths::set_base_directory(dir).map_err(anyhow::Error::msg)?;
    }
    paths::ensure_all_directories().map_err(anyhow::Error::msg)?;

    let logger_config = args.logger_config();
    let log_dir = logger_config.file_logging.then(paths::get_logs_directory);
    logger::init(logger_config, log_dir.as_deref());

    logger::info(
        LogTag::System,
        &format!(
            "Hyperion Guard v{} watching {} ({} pairs)",
            env!("CARGO_PKG_VERSION"),
            config.rpc.token_contract,
            config.rpc.pair_addresses.len()
        ),
    );

    let source = JsonRpcEventSource::new(&config.rpc).context("Failed to create RPC client")?;
    let summary = run_scan(&config, &RunPaths::default_locations(), &source, Arc::new(MonitorSink)).await?;

    if summary.counts.needs_review > 0 {
        logger::warning(
            LogTag::System,
            &format!(
                "{} addresses await manual review, see {}",
                summary.counts.needs_review,
                paths::get_audit_log_path().display()
            ),
        );
    }
    Ok(())
}
