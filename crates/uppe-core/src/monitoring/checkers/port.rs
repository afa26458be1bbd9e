use anyhow::{Result, anyhow, bail};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::model::MonitorTarget;
use crate::monitoring::checker::{Checker, Probe};

/// TCP port checker
pub struct PortChecker;

#[async_trait::async_trait]
impl Checker for PortChecker {
    async fn check(&self, target: &MonitorTarget, limit: Duration) -> Result<Probe> {
        let MonitorTarget::Port(port) = target else {
            bail!("port checker cannot probe {} targets", target.kind());
        };

        let start = Instant::now();
        let connect = tokio::net::TcpStream::connect((port.host.as_str(), port.port));

        timeout(limit, connect)
            .await
            .map_err(|_| anyhow!("TCP connection timeout"))?
            .map_err(|e| anyhow!("TCP connection failed: {}", e))?;

        Ok(Probe::new(start.elapsed().as_millis() as u64))
    }
}
