use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::incident::Severity;

/// A configured notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationProvider {
    pub id: Uuid,
    pub name: String,
    pub config: ProviderConfig,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Used when a monitor names no providers
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub last_test: Option<ProviderTestResult>,
}

fn default_true() -> bool {
    true
}

impl NotificationProvider {
    pub fn new(name: impl Into<String>, config: ProviderConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            config,
            active: true,
            is_default: false,
            last_test: None,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn kind(&self) -> &str {
        self.config.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTestResult {
    pub success: bool,
    pub message: String,
    pub tested_at: DateTime<Utc>,
}

fn default_pagerduty_url() -> String {
    "https://events.pagerduty.com/v2/enqueue".to_string()
}

fn default_opsgenie_url() -> String {
    "https://api.opsgenie.com/v2/alerts".to_string()
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_pushover_url() -> String {
    "https://api.pushover.net/1/messages.json".to_string()
}

fn default_ntfy_url() -> String {
    "https://ntfy.sh".to_string()
}

fn default_gotify_priority() -> u8 {
    8
}

fn default_smtp_port() -> u16 {
    587
}

/// Provider settings, one variant per built-in channel type
///
/// `Custom` carries free-form settings for kinds registered at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Webhook {
        url: String,
        /// Signs the body with HMAC-SHA256 when set
        #[serde(default)]
        secret: Option<String>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Slack {
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
    },
    Mattermost {
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
    },
    RocketChat {
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
    },
    Discord {
        webhook_url: String,
    },
    Teams {
        webhook_url: String,
    },
    GoogleChat {
        webhook_url: String,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
        #[serde(default = "default_telegram_url")]
        api_url: String,
    },
    PagerDuty {
        routing_key: String,
        #[serde(default = "default_pagerduty_url")]
        events_url: String,
    },
    Opsgenie {
        api_key: String,
        #[serde(default = "default_opsgenie_url")]
        api_url: String,
    },
    Ntfy {
        #[serde(default = "default_ntfy_url")]
        server_url: String,
        topic: String,
        #[serde(default)]
        token: Option<String>,
    },
    Gotify {
        server_url: String,
        app_token: String,
        #[serde(default = "default_gotify_priority")]
        priority: u8,
    },
    Pushover {
        user_key: String,
        app_token: String,
        #[serde(default = "default_pushover_url")]
        api_url: String,
    },
    Email {
        smtp_host: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        from: String,
        to: Vec<String>,
        #[serde(default = "default_true")]
        starttls: bool,
    },
    Custom {
        kind: String,
        #[serde(default)]
        settings: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Kind tag used to look up a sender factory
    pub fn kind(&self) -> &str {
        match self {
            ProviderConfig::Webhook { .. } => "webhook",
            ProviderConfig::Slack { .. } => "slack",
            ProviderConfig::Mattermost { .. } => "mattermost",
            ProviderConfig::RocketChat { .. } => "rocket_chat",
            ProviderConfig::Discord { .. } => "discord",
            ProviderConfig::Teams { .. } => "teams",
            ProviderConfig::GoogleChat { .. } => "google_chat",
            ProviderConfig::Telegram { .. } => "telegram",
            ProviderConfig::PagerDuty { .. } => "pager_duty",
            ProviderConfig::Opsgenie { .. } => "opsgenie",
            ProviderConfig::Ntfy { .. } => "ntfy",
            ProviderConfig::Gotify { .. } => "gotify",
            ProviderConfig::Pushover { .. } => "pushover",
            ProviderConfig::Email { .. } => "email",
            ProviderConfig::Custom { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Trigger,
    Resolved,
    Test,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Trigger => write!(f, "trigger"),
            AlertKind::Resolved => write!(f, "resolved"),
            AlertKind::Test => write!(f, "test"),
        }
    }
}

/// Rendered alert handed to every sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub id: Uuid,
    pub kind: AlertKind,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    #[serde(default)]
    pub monitor_id: Option<Uuid>,
    #[serde(default)]
    pub incident_id: Option<Uuid>,
    /// Users resolved from an on-call schedule or named directly by a rule
    #[serde(default)]
    pub recipients: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertMessage {
    pub fn new(kind: AlertKind, severity: Severity, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            body: body.into(),
            severity,
            monitor_id: None,
            incident_id: None,
            recipients: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn test(provider_name: &str) -> Self {
        Self::new(
            AlertKind::Test,
            Severity::Low,
            format!("Test notification for {provider_name}"),
            "If you can read this, the provider is configured correctly.",
        )
    }

    /// Single-line rendering shared by plain-text channels
    pub fn headline(&self) -> String {
        let marker = match self.kind {
            AlertKind::Trigger => "[DOWN]",
            AlertKind::Resolved => "[RESOLVED]",
            AlertKind::Test => "[TEST]",
        };
        format!("{marker} [{}] {}", self.severity, self.title)
    }
}
