use anyhow::{Result, bail};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::HttpChecker;
use crate::model::MonitorTarget;
use crate::monitoring::checker::{Checker, Probe};

/// Container health through the Docker Engine HTTP API
pub struct DockerChecker {
    http: Arc<HttpChecker>,
}

impl DockerChecker {
    pub fn new(http: Arc<HttpChecker>) -> Self {
        Self { http }
    }
}

/// Running and not reported unhealthy; returns the container status string
pub fn container_health(inspect: &Value) -> Result<String> {
    let state = &inspect["State"];
    let status = state["Status"].as_str().unwrap_or("unknown").to_string();
    if !state["Running"].as_bool().unwrap_or(false) {
        bail!("container is {}", status);
    }
    match state["Health"]["Status"].as_str() {
        Some("unhealthy") => bail!("container is running but unhealthy"),
        Some(health) => Ok(format!("{status} ({health})")),
        None => Ok(status),
    }
}

#[async_trait::async_trait]
impl Checker for DockerChecker {
    async fn check(&self, target: &MonitorTarget, timeout: Duration) -> Result<Probe> {
        let MonitorTarget::Docker(docker) = target else {
            bail!("docker checker cannot probe {} targets", target.kind());
        };

        let url = format!("{}/containers/{}/json", docker.engine_url.trim_end_matches('/'), docker.container);
        let (inspect, latency) = self.http.get_json(&url, timeout).await?;
        let status = container_health(&inspect)?;
        Ok(Probe::new(latency).with_message(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn container_states() {
        let running = json!({"State": {"Status": "running", "Running": true}});
        assert_eq!(container_health(&running).unwrap(), "running");

        let healthy = json!({"State": {"Status": "running", "Running": true, "Health": {"Status": "healthy"}}});
        assert_eq!(container_health(&healthy).unwrap(), "running (healthy)");

        let unhealthy = json!({"State": {"Status": "running", "Running": true, "Health": {"Status": "unhealthy"}}});
        assert!(container_health(&unhealthy).is_err());

        let exited = json!({"State": {"Status": "exited", "Running": false}});
        assert_eq!(container_health(&exited).unwrap_err().to_string(), "container is exited");
    }
}
