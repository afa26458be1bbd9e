use async_trait::async_trait;
use serde_json::{Value, json};

use super::{expect_success, render_text};
use crate::model::{AlertKind, AlertMessage};
use crate::notify::error::DispatchError;
use crate::notify::registry::NotificationSender;

/// Incoming-webhook dialects of the supported chat products
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFlavor {
    Slack,
    Mattermost,
    RocketChat,
    Discord,
    Teams,
    GoogleChat,
}

impl ChatFlavor {
    fn service(self) -> &'static str {
        match self {
            ChatFlavor::Slack => "slack",
            ChatFlavor::Mattermost => "mattermost",
            ChatFlavor::RocketChat => "rocket_chat",
            ChatFlavor::Discord => "discord",
            ChatFlavor::Teams => "teams",
            ChatFlavor::GoogleChat => "google_chat",
        }
    }
}

fn color(alert: &AlertMessage) -> &'static str {
    match alert.kind {
        AlertKind::Trigger => "#d9534f",
        AlertKind::Resolved => "#5cb85c",
        AlertKind::Test => "#5bc0de",
    }
}

/// Request body for a chat webhook
pub fn chat_payload(flavor: ChatFlavor, alert: &AlertMessage, channel: Option<&str>) -> Value {
    let text = render_text(alert);
    let mut payload = match flavor {
        ChatFlavor::Slack | ChatFlavor::Mattermost | ChatFlavor::RocketChat => json!({
            "text": alert.headline(),
            "attachments": [{
                "color": color(alert),
                "title": alert.title,
                "text": text,
            }],
        }),
        ChatFlavor::Discord => json!({
            "content": alert.headline(),
            "embeds": [{
                "title": alert.title,
                "description": text,
                "color": u32::from_str_radix(color(alert).trim_start_matches('#'), 16).unwrap_or(0),
            }],
        }),
        ChatFlavor::Teams => json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": color(alert).trim_start_matches('#'),
            "summary": alert.headline(),
            "title": alert.headline(),
            "text": text.replace('\n', "<br>"),
        }),
        ChatFlavor::GoogleChat => json!({ "text": text }),
    };
    if let (Some(channel), Value::Object(map)) = (channel, &mut payload) {
        map.insert("channel".to_string(), Value::String(channel.to_string()));
    }
    payload
}

pub struct ChatSender {
    client: reqwest::Client,
    flavor: ChatFlavor,
    webhook_url: String,
    channel: Option<String>,
}

impl ChatSender {
    pub fn new(client: reqwest::Client, flavor: ChatFlavor, webhook_url: String, channel: Option<String>) -> Self {
        Self { client, flavor, webhook_url, channel }
    }
}

#[async_trait]
impl NotificationSender for ChatSender {
    async fn send(&self, alert: &AlertMessage) -> Result<(), DispatchError> {
        let payload = chat_payload(self.flavor, alert, self.channel.as_deref());
        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
        expect_success(self.flavor.service(), response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    fn alert() -> AlertMessage {
        AlertMessage::new(AlertKind::Resolved, Severity::Medium, "api recovered", "up after 4m")
    }

    #[test]
    fn slack_payload_carries_channel() {
        let payload = chat_payload(ChatFlavor::Slack, &alert(), Some("#ops"));
        assert_eq!(payload["channel"], "#ops");
        assert_eq!(payload["text"], "[RESOLVED] [medium] api recovered");
        assert_eq!(payload["attachments"][0]["color"], "#5cb85c");
    }

    #[test]
    fn discord_color_is_numeric() {
        let payload = chat_payload(ChatFlavor::Discord, &alert(), None);
        assert_eq!(payload["embeds"][0]["color"], 0x5cb85c);
        assert!(payload.get("channel").is_none());
    }
}
