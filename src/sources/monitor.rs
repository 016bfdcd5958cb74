/// Sink for monitor-only deployments: nothing is sent on chain
///
/// Every decision is refused with a fixed reason, which parks the address in
/// terminal `SubmissionFailed` with `needs_review` set. Each bot is therefore
/// reported once and then waits for an operator.
use super::{SubmissionSink, SubmitOutcome};
use crate::detectors::Pattern;
use crate::errors::SinkError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;

pub const MONITOR_MODE_REASON: &str = "monitor mode: logged for manual review";

#[derive(Debug, Default, Clone)]
pub struct MonitorSink;

#[async_trait]
impl SubmissionSink for MonitorSink {
    fn name(&self) -> &str {
        "monitor"
    }

    async fn submit_blacklist(
        &self,
        address: &str,
        reasons: &[Pattern],
    ) -> Result<SubmitOutcome, SinkError> {
        let names: Vec<&str> = reasons.iter().map(|p| p.as_str()).collect();
        logger::info(
            LogTag::Dispatch,
            &format!("Monitor mode, not submitting {} [{}]", address, names.join(", ")),
        );
        Ok(SubmitOutcome::Rejected {
            reason: MONITOR_MODE_REASON.to_string(),
        })
    }
}
