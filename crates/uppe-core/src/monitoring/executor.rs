use chrono::Utc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::debug;

use super::checker::CheckerRegistry;
use crate::model::{HeartbeatRecord, Monitor};

/// Monitoring executor - runs a single check attempt and records its outcome
pub struct MonitoringExecutor {
    registry: CheckerRegistry,
}

impl MonitoringExecutor {
    pub fn new(registry: CheckerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CheckerRegistry {
        &self.registry
    }

    /// Execute one attempt
    ///
    /// Never fails: probe errors, timeouts and missing checkers all become
    /// failing heartbeats. `will_retry` marks a failure as non-authoritative.
    pub async fn execute_check(&self, monitor: &Monitor, will_retry: bool) -> HeartbeatRecord {
        let started = Utc::now();
        let mut beat = HeartbeatRecord::new(monitor.id).at(started);

        let Some(checker) = self.registry.get(monitor.kind()) else {
            return beat
                .failure(format!("no checker registered for {} monitors", monitor.kind()))
                .retrying(will_retry);
        };

        let start = Instant::now();
        let outcome = match timeout(monitor.timeout(), checker.check(&monitor.target, monitor.timeout())).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("timed out after {}s", monitor.timeout_secs)),
        };

        let passed = outcome.is_ok() != monitor.upside_down;
        beat = match (outcome, passed) {
            (Ok(probe), true) => {
                let mut beat = beat.success(probe.latency_ms, probe.status_code);
                beat.message = probe.message;
                beat
            }
            (Ok(probe), false) => {
                let mut beat = beat.failure("check passed but monitor is upside down");
                beat.status_code = probe.status_code;
                beat.latency_ms = Some(probe.latency_ms);
                beat
            }
            (Err(e), true) => {
                // Upside down: the failure is the expected outcome
                beat.success(start.elapsed().as_millis() as u64, None).with_message(e.to_string())
            }
            (Err(e), false) => beat.failure(e.to_string()),
        };

        debug!(
            monitor_id = %monitor.id,
            kind = %monitor.kind(),
            success = beat.success,
            latency_ms = ?beat.latency_ms,
            "check completed"
        );

        if beat.success { beat } else { beat.retrying(will_retry) }
    }
}
