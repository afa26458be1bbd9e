use async_trait::async_trait;
use serde_json::{Value, json};

use super::expect_success;
use crate::model::{AlertKind, AlertMessage, Severity};
use crate::notify::error::DispatchError;
use crate::notify::registry::NotificationSender;

/// Key that ties trigger and resolve events of one incident together
fn dedup_key(alert: &AlertMessage) -> String {
    alert
        .incident_id
        .or(alert.monitor_id)
        .map(|id| format!("uppe-{id}"))
        .unwrap_or_else(|| format!("uppe-{}", alert.id))
}

/// PagerDuty Events API v2
pub struct PagerDutySender {
    client: reqwest::Client,
    events_url: String,
    routing_key: String,
}

impl PagerDutySender {
    pub fn new(client: reqwest::Client, events_url: String, routing_key: String) -> Self {
        Self { client, events_url, routing_key }
    }
}

pub fn pagerduty_event(routing_key: &str, alert: &AlertMessage) -> Value {
    let action = match alert.kind {
        AlertKind::Resolved => "resolve",
        AlertKind::Trigger | AlertKind::Test => "trigger",
    };
    let severity = match alert.severity {
        Severity::Critical => "critical",
        Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low => "info",
    };
    json!({
        "routing_key": routing_key,
        "event_action": action,
        "dedup_key": dedup_key(alert),
        "payload": {
            "summary": alert.title,
            "source": "uppe",
            "severity": severity,
            "timestamp": alert.timestamp.to_rfc3339(),
            "custom_details": {
                "body": alert.body,
                "on_call": alert.recipients,
            },
        },
    })
}

#[async_trait]
impl NotificationSender for PagerDutySender {
    async fn send(&self, alert: &AlertMessage) -> Result<(), DispatchError> {
        let event = pagerduty_event(&self.routing_key, alert);
        let response = self.client.post(&self.events_url).json(&event).send().await?;
        expect_success("pagerduty", response).await
    }
}

/// Opsgenie Alert API
pub struct OpsgenieSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl OpsgenieSender {
    pub fn new(client: reqwest::Client, api_url: String, api_key: String) -> Self {
        Self { client, api_url: api_url.trim_end_matches('/').to_string(), api_key }
    }
}

fn opsgenie_priority(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "P1",
        Severity::High => "P2",
        Severity::Medium => "P3",
        Severity::Low => "P4",
    }
}

#[async_trait]
impl NotificationSender for OpsgenieSender {
    async fn send(&self, alert: &AlertMessage) -> Result<(), DispatchError> {
        let alias = dedup_key(alert);
        let request = match alert.kind {
            AlertKind::Resolved => self
                .client
                .post(format!("{}/{}/close", self.api_url, alias))
                .query(&[("identifierType", "alias")])
                .json(&json!({ "source": "uppe", "note": alert.body })),
            AlertKind::Trigger | AlertKind::Test => {
                let responders: Vec<Value> =
                    alert.recipients.iter().map(|user| json!({ "username": user, "type": "user" })).collect();
                self.client.post(&self.api_url).json(&json!({
                    "message": alert.title,
                    "alias": alias,
                    "description": alert.body,
                    "priority": opsgenie_priority(alert.severity),
                    "responders": responders,
                    "source": "uppe",
                }))
            }
        };

        let response = request.header("Authorization", format!("GenieKey {}", self.api_key)).send().await?;
        expect_success("opsgenie", response).await
    }
}
