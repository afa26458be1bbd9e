#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uppe_core::Config;
use uppe_core::model::{
    AlertMessage, HeartbeatRecord, Monitor, MonitorKind, MonitorTarget, NotificationProvider, ProviderConfig,
    TicketPriority,
};
use uppe_core::monitoring::{CheckReport, Checker, CheckerRegistry, Probe};
use uppe_core::notify::{DispatchError, NotificationSender, SenderFactory, SenderRegistry};
use uppe_core::storage::MemoryStorage;
use uppe_core::workflow::TicketGateway;
use uppe_core::{Orchestrator, OrchestratorBuilder};

/// Alerts accepted by "recorder" providers, in delivery order
#[derive(Clone, Default)]
pub struct Outbox(Arc<Mutex<Vec<(String, AlertMessage)>>>);

impl Outbox {
    pub fn alerts(&self) -> Vec<AlertMessage> {
        self.0.lock().unwrap().iter().map(|(_, alert)| alert.clone()).collect()
    }

    pub fn for_provider(&self, name: &str) -> Vec<AlertMessage> {
        self.0.lock().unwrap().iter().filter(|(p, _)| p == name).map(|(_, a)| a.clone()).collect()
    }
}

struct Recorder {
    name: String,
    fail: bool,
    outbox: Outbox,
}

#[async_trait]
impl NotificationSender for Recorder {
    async fn send(&self, alert: &AlertMessage) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError::Api { service: "recorder", status: 500, body: "boom".into() });
        }
        self.outbox.0.lock().unwrap().push((self.name.clone(), alert.clone()));
        Ok(())
    }
}

struct RecorderFactory(Outbox);

impl SenderFactory for RecorderFactory {
    fn kind(&self) -> &str {
        "recorder"
    }

    fn create(
        &self,
        provider: &NotificationProvider,
        _client: &reqwest::Client,
    ) -> Result<Arc<dyn NotificationSender>, DispatchError> {
        let fail = match &provider.config {
            ProviderConfig::Custom { settings, .. } => settings["fail"].as_bool().unwrap_or(false),
            _ => false,
        };
        Ok(Arc::new(Recorder { name: provider.name.clone(), fail, outbox: self.0.clone() }))
    }
}

pub fn recorder(name: &str, fail: bool) -> NotificationProvider {
    NotificationProvider::new(
        name,
        ProviderConfig::Custom { kind: "recorder".into(), settings: serde_json::json!({ "fail": fail }) },
    )
}

struct AlwaysUp;

#[async_trait]
impl Checker for AlwaysUp {
    async fn check(&self, _target: &MonitorTarget, _timeout: Duration) -> anyhow::Result<Probe> {
        Ok(Probe::new(1))
    }
}

struct AlwaysDown;

#[async_trait]
impl Checker for AlwaysDown {
    async fn check(&self, _target: &MonitorTarget, _timeout: Duration) -> anyhow::Result<Probe> {
        anyhow::bail!("connection refused")
    }
}

/// Ticket write-backs, rendered as `"<op> <ticket> <arg>"`
#[derive(Clone, Default)]
pub struct GatewayLog(Arc<Mutex<Vec<String>>>);

impl GatewayLog {
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl TicketGateway for GatewayLog {
    async fn change_priority(&self, ticket_id: &str, priority: TicketPriority) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(format!("priority {ticket_id} {priority}"));
        Ok(())
    }

    async fn escalate(&self, ticket_id: &str, to: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(format!("escalate {ticket_id} {to}"));
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub outbox: Outbox,
    pub gateway: GatewayLog,
}

fn builder(checker: Arc<dyn Checker>, outbox: &Outbox, gateway: &GatewayLog) -> OrchestratorBuilder {
    let mut config = Config::default();
    config.scheduler.jitter_ms = 0;

    let mut checkers = CheckerRegistry::new();
    checkers.register(MonitorKind::Http, checker);

    let mut senders = SenderRegistry::with_builtins().unwrap();
    senders.register(Arc::new(RecorderFactory(outbox.clone())));

    Orchestrator::builder(config)
        .storage(Arc::new(MemoryStorage::new()))
        .checkers(checkers)
        .senders(senders)
        .ticket_gateway(Arc::new(gateway.clone()))
}

/// Orchestrator whose http checks always pass, with a default recorder provider
pub async fn harness() -> Harness {
    harness_with(Arc::new(AlwaysUp)).await
}

pub async fn failing_harness() -> Harness {
    harness_with(Arc::new(AlwaysDown)).await
}

async fn harness_with(checker: Arc<dyn Checker>) -> Harness {
    let outbox = Outbox::default();
    let gateway = GatewayLog::default();
    let orchestrator = builder(checker, &outbox, &gateway).build().unwrap();
    orchestrator.save_provider(&recorder("default", false).as_default()).await.unwrap();
    Harness { orchestrator, outbox, gateway }
}

pub fn monitor(name: &str) -> Monitor {
    Monitor::new(name, MonitorTarget::http(format!("https://{name}.example.com")))
        .with_interval(60, 10)
        .with_retries(2, 10)
}

pub fn report(monitor: &Monitor, beat: HeartbeatRecord) -> CheckReport {
    CheckReport { monitor: Arc::new(monitor.clone()), heartbeat: beat }
}

pub fn down(monitor: &Monitor, retrying: bool) -> CheckReport {
    report(monitor, HeartbeatRecord::new(monitor.id).at(Utc::now()).failure("connection refused").retrying(retrying))
}

pub fn up(monitor: &Monitor) -> CheckReport {
    report(monitor, HeartbeatRecord::new(monitor.id).at(Utc::now()).success(12, Some(200)))
}
