use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::model::{MonitorKind, MonitorTarget};

use super::checkers;

/// Outcome of a passing probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Probe {
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

impl Probe {
    pub fn new(latency_ms: u64) -> Self {
        Self { latency_ms, ..Default::default() }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Checker trait for the different kinds of monitoring checks
///
/// An `Err` is a regular "down" result; its message becomes the heartbeat's
/// diagnostic. `timeout` bounds the whole probe; checkers may also use it
/// for their own socket-level deadlines.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, target: &MonitorTarget, timeout: Duration) -> Result<Probe>;
}

/// Maps each monitor kind to the checker probing it
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: HashMap<MonitorKind, Arc<dyn Checker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a checker for every built-in kind
    pub fn with_defaults() -> Self {
        let http = Arc::new(checkers::HttpChecker::new());
        let mut registry = Self::new();
        registry.register(MonitorKind::Http, http.clone());
        registry.register(MonitorKind::Keyword, http.clone());
        registry.register(MonitorKind::JsonQuery, http.clone());
        registry.register(MonitorKind::Docker, Arc::new(checkers::DockerChecker::new(http)));
        registry.register(MonitorKind::Port, Arc::new(checkers::PortChecker));
        registry.register(MonitorKind::Ping, Arc::new(checkers::PingChecker));
        registry.register(MonitorKind::Dns, Arc::new(checkers::DnsChecker));
        registry.register(MonitorKind::Redis, Arc::new(checkers::RedisChecker));
        registry.register(MonitorKind::Sql, Arc::new(checkers::SqlChecker));
        registry.register(MonitorKind::Mqtt, Arc::new(checkers::MqttChecker));
        registry.register(MonitorKind::Smtp, Arc::new(checkers::SmtpChecker));
        registry.register(MonitorKind::GameServer, Arc::new(checkers::GameServerChecker));
        registry.register(MonitorKind::Radius, Arc::new(checkers::RadiusChecker));
        registry
    }

    /// Replace the checker for a kind
    pub fn register(&mut self, kind: MonitorKind, checker: Arc<dyn Checker>) {
        self.checkers.insert(kind, checker);
    }

    pub fn get(&self, kind: MonitorKind) -> Option<Arc<dyn Checker>> {
        self.checkers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<MonitorKind> {
        let mut kinds: Vec<_> = self.checkers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_kind() {
        let registry = CheckerRegistry::with_defaults();
        assert_eq!(registry.kinds(), MonitorKind::ALL.to_vec());
    }
}
