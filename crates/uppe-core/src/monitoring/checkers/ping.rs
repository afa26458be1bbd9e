use anyhow::{Context, Result, bail};
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::model::MonitorTarget;
use crate::monitoring::checker::{Checker, Probe};

/// ICMP checker shelling out to the system `ping`
///
/// Raw ICMP sockets need elevated privileges; the setuid `ping` binary does not.
pub struct PingChecker;

/// Average of the `time=` values reported per reply
pub fn parse_ping_latency(output: &str) -> Option<f64> {
    let samples: Vec<f64> = output
        .lines()
        .filter_map(|line| {
            let rest = &line[line.find("time=")? + 5..];
            let value: String = rest.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            value.parse().ok()
        })
        .collect();
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

#[async_trait::async_trait]
impl Checker for PingChecker {
    async fn check(&self, target: &MonitorTarget, timeout: Duration) -> Result<Probe> {
        let MonitorTarget::Ping(ping) = target else {
            bail!("ping checker cannot probe {} targets", target.kind());
        };
        if ping.host.starts_with('-') {
            bail!("invalid ping host {:?}", ping.host);
        }

        let wait_secs = timeout.as_secs().max(1).to_string();
        let count = ping.packet_count.max(1).to_string();
        let start = Instant::now();
        let output = Command::new("ping")
            .args(["-c", count.as_str(), "-W", wait_secs.as_str(), ping.host.as_str()])
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to run ping")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            if detail.is_empty() {
                bail!("host {} unreachable", ping.host);
            }
            bail!("ping failed: {}", detail);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let latency = parse_ping_latency(&stdout)
            .map(|ms| ms.round() as u64)
            .unwrap_or_else(|| start.elapsed().as_millis() as u64);
        Ok(Probe::new(latency))
    }
}
