use async_trait::async_trait;
use serde_json::json;

use super::{expect_success, render_text};
use crate::model::{AlertKind, AlertMessage, Severity};
use crate::notify::error::DispatchError;
use crate::notify::registry::NotificationSender;

enum PushTarget {
    Telegram { url: String, chat_id: String },
    Ntfy { url: String, token: Option<String> },
    Gotify { url: String, app_token: String, priority: u8 },
    Pushover { url: String, user_key: String, app_token: String },
}

/// Mobile push and messenger bots
pub struct PushSender {
    client: reqwest::Client,
    target: PushTarget,
}

/// ntfy priority, 1 (min) to 5 (urgent)
fn ntfy_priority(alert: &AlertMessage) -> u8 {
    match (alert.kind, alert.severity) {
        (AlertKind::Trigger, Severity::Critical) => 5,
        (AlertKind::Trigger, Severity::High) => 4,
        (AlertKind::Trigger, _) => 3,
        _ => 2,
    }
}

/// Pushover priority, -2 (silent) to 1 (bypass quiet hours)
fn pushover_priority(alert: &AlertMessage) -> i8 {
    match (alert.kind, alert.severity) {
        (AlertKind::Trigger, Severity::Critical | Severity::High) => 1,
        (AlertKind::Trigger, _) => 0,
        _ => -1,
    }
}

impl PushSender {
    pub fn telegram(client: reqwest::Client, api_url: &str, bot_token: &str, chat_id: String) -> Self {
        let url = format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), bot_token);
        Self { client, target: PushTarget::Telegram { url, chat_id } }
    }

    pub fn ntfy(client: reqwest::Client, server_url: &str, topic: &str, token: Option<String>) -> Self {
        let url = format!("{}/{}", server_url.trim_end_matches('/'), topic);
        Self { client, target: PushTarget::Ntfy { url, token } }
    }

    pub fn gotify(client: reqwest::Client, server_url: &str, app_token: String, priority: u8) -> Self {
        let url = format!("{}/message", server_url.trim_end_matches('/'));
        Self { client, target: PushTarget::Gotify { url, app_token, priority } }
    }

    pub fn pushover(client: reqwest::Client, api_url: String, user_key: String, app_token: String) -> Self {
        Self { client, target: PushTarget::Pushover { url: api_url, user_key, app_token } }
    }

    fn service(&self) -> &'static str {
        match self.target {
            PushTarget::Telegram { .. } => "telegram",
            PushTarget::Ntfy { .. } => "ntfy",
            PushTarget::Gotify { .. } => "gotify",
            PushTarget::Pushover { .. } => "pushover",
        }
    }
}

#[async_trait]
impl NotificationSender for PushSender {
    async fn send(&self, alert: &AlertMessage) -> Result<(), DispatchError> {
        let request = match &self.target {
            PushTarget::Telegram { url, chat_id } => self.client.post(url).json(&json!({
                "chat_id": chat_id,
                "text": render_text(alert),
                "disable_web_page_preview": true,
            })),
            PushTarget::Ntfy { url, token } => {
                let mut request = self
                    .client
                    .post(url)
                    .header("Title", alert.headline())
                    .header("Priority", ntfy_priority(alert).to_string())
                    .header("Tags", alert.kind.to_string())
                    .body(alert.body.clone());
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                request
            }
            PushTarget::Gotify { url, app_token, priority } => self
                .client
                .post(url)
                .header("X-Gotify-Key", app_token)
                .json(&json!({
                    "title": alert.headline(),
                    "message": render_text(alert),
                    "priority": priority,
                })),
            PushTarget::Pushover { url, user_key, app_token } => self.client.post(url).form(&[
                ("token", app_token.as_str()),
                ("user", user_key.as_str()),
                ("title", alert.headline().as_str()),
                ("message", render_text(alert).as_str()),
                ("priority", pushover_priority(alert).to_string().as_str()),
            ]),
        };

        let response = request.send().await?;
        expect_success(self.service(), response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let sender = PushSender::ntfy(reqwest::Client::new(), "https://ntfy.sh/", "uppe-alerts", None);
        match sender.target {
            PushTarget::Ntfy { url, .. } => assert_eq!(url, "https://ntfy.sh/uppe-alerts"),
            _ => unreachable!(),
        }

        let sender = PushSender::telegram(reqwest::Client::new(), "https://api.telegram.org", "123:abc", "42".into());
        match sender.target {
            PushTarget::Telegram { url, .. } => assert_eq!(url, "https://api.telegram.org/bot123:abc/sendMessage"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn priorities_follow_severity() {
        let critical = AlertMessage::new(AlertKind::Trigger, Severity::Critical, "db down", "");
        let resolved = AlertMessage::new(AlertKind::Resolved, Severity::Critical, "db up", "");
        assert_eq!(ntfy_priority(&critical), 5);
        assert_eq!(ntfy_priority(&resolved), 2);
        assert_eq!(pushover_priority(&critical), 1);
        assert_eq!(pushover_priority(&resolved), -1);
    }
}
