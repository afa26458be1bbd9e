use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::error::DispatchError;
use super::providers::{ChatFlavor, ChatSender, EmailSender, OpsgenieSender, PagerDutySender, PushSender, WebhookSender};
use crate::model::{AlertMessage, NotificationProvider, ProviderConfig};

/// Delivers alerts through one configured provider
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, alert: &AlertMessage) -> Result<(), DispatchError>;
}

/// Builds senders for one provider kind
///
/// Custom kinds are added by registering a factory under the kind tag used
/// in [`ProviderConfig::Custom`].
pub trait SenderFactory: Send + Sync {
    fn kind(&self) -> &str;

    fn create(&self, provider: &NotificationProvider, client: &reqwest::Client)
    -> Result<Arc<dyn NotificationSender>, DispatchError>;
}

/// Factory for the channel types built into [`ProviderConfig`]
struct BuiltinFactory(&'static str);

impl SenderFactory for BuiltinFactory {
    fn kind(&self) -> &str {
        self.0
    }

    fn create(
        &self,
        provider: &NotificationProvider,
        client: &reqwest::Client,
    ) -> Result<Arc<dyn NotificationSender>, DispatchError> {
        let client = client.clone();
        let sender: Arc<dyn NotificationSender> = match &provider.config {
            ProviderConfig::Webhook { url, secret, headers } => {
                Arc::new(WebhookSender::new(client, url.clone(), secret.clone(), headers.clone())?)
            }
            ProviderConfig::Slack { webhook_url, channel } => {
                Arc::new(ChatSender::new(client, ChatFlavor::Slack, webhook_url.clone(), channel.clone()))
            }
            ProviderConfig::Mattermost { webhook_url, channel } => {
                Arc::new(ChatSender::new(client, ChatFlavor::Mattermost, webhook_url.clone(), channel.clone()))
            }
            ProviderConfig::RocketChat { webhook_url, channel } => {
                Arc::new(ChatSender::new(client, ChatFlavor::RocketChat, webhook_url.clone(), channel.clone()))
            }
            ProviderConfig::Discord { webhook_url } => {
                Arc::new(ChatSender::new(client, ChatFlavor::Discord, webhook_url.clone(), None))
            }
            ProviderConfig::Teams { webhook_url } => {
                Arc::new(ChatSender::new(client, ChatFlavor::Teams, webhook_url.clone(), None))
            }
            ProviderConfig::GoogleChat { webhook_url } => {
                Arc::new(ChatSender::new(client, ChatFlavor::GoogleChat, webhook_url.clone(), None))
            }
            ProviderConfig::Telegram { bot_token, chat_id, api_url } => Arc::new(PushSender::telegram(
                client,
                api_url,
                bot_token,
                chat_id.clone(),
            )),
            ProviderConfig::Ntfy { server_url, topic, token } => {
                Arc::new(PushSender::ntfy(client, server_url, topic, token.clone()))
            }
            ProviderConfig::Gotify { server_url, app_token, priority } => {
                Arc::new(PushSender::gotify(client, server_url, app_token.clone(), *priority))
            }
            ProviderConfig::Pushover { user_key, app_token, api_url } => {
                Arc::new(PushSender::pushover(client, api_url.clone(), user_key.clone(), app_token.clone()))
            }
            ProviderConfig::PagerDuty { routing_key, events_url } => {
                Arc::new(PagerDutySender::new(client, events_url.clone(), routing_key.clone()))
            }
            ProviderConfig::Opsgenie { api_key, api_url } => {
                Arc::new(OpsgenieSender::new(client, api_url.clone(), api_key.clone()))
            }
            ProviderConfig::Email { smtp_host, smtp_port, username, password, from, to, starttls } => Arc::new(
                EmailSender::new(smtp_host, *smtp_port, username.as_deref(), password.as_deref(), from, to, *starttls)?,
            ),
            ProviderConfig::Custom { kind, .. } => return Err(DispatchError::UnknownKind(kind.clone())),
        };
        Ok(sender)
    }
}

const BUILTIN_KINDS: [&str; 14] = [
    "webhook",
    "slack",
    "mattermost",
    "rocket_chat",
    "discord",
    "teams",
    "google_chat",
    "telegram",
    "pager_duty",
    "opsgenie",
    "ntfy",
    "gotify",
    "pushover",
    "email",
];

/// Provider kind tag → sender factory
pub struct SenderRegistry {
    factories: HashMap<String, Arc<dyn SenderFactory>>,
    client: reqwest::Client,
}

impl SenderRegistry {
    /// Empty registry sharing one HTTP client between its senders
    pub fn new() -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("uppe/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { factories: HashMap::new(), client })
    }

    /// Registry with every built-in channel type
    pub fn with_builtins() -> Result<Self, DispatchError> {
        let mut registry = Self::new()?;
        for kind in BUILTIN_KINDS {
            registry.register(Arc::new(BuiltinFactory(kind)));
        }
        Ok(registry)
    }

    pub fn register(&mut self, factory: Arc<dyn SenderFactory>) {
        self.factories.insert(factory.kind().to_string(), factory);
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create(&self, provider: &NotificationProvider) -> Result<Arc<dyn NotificationSender>, DispatchError> {
        let kind = provider.kind();
        let factory = self.factories.get(kind).ok_or_else(|| DispatchError::UnknownKind(kind.to_string()))?;
        factory.create(provider, &self.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl NotificationSender for Noop {
        async fn send(&self, _alert: &AlertMessage) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    struct SmsFactory;

    impl SenderFactory for SmsFactory {
        fn kind(&self) -> &str {
            "sms"
        }

        fn create(
            &self,
            _provider: &NotificationProvider,
            _client: &reqwest::Client,
        ) -> Result<Arc<dyn NotificationSender>, DispatchError> {
            Ok(Arc::new(Noop))
        }
    }

    #[test]
    fn builtins_cover_every_config_variant() {
        let registry = SenderRegistry::with_builtins().unwrap();
        assert_eq!(registry.kinds().len(), 14);
        assert!(registry.has_kind("pager_duty"));

        let slack = NotificationProvider::new(
            "ops",
            ProviderConfig::Slack { webhook_url: "https://hooks.slack.com/services/x".into(), channel: None },
        );
        assert!(registry.create(&slack).is_ok());
    }

    #[test]
    fn custom_kinds_need_a_factory() {
        let mut registry = SenderRegistry::with_builtins().unwrap();
        let sms = NotificationProvider::new(
            "sms",
            ProviderConfig::Custom { kind: "sms".into(), settings: serde_json::json!({"to": "+100"}) },
        );
        assert!(matches!(registry.create(&sms), Err(DispatchError::UnknownKind(kind)) if kind == "sms"));

        registry.register(Arc::new(SmsFactory));
        assert!(registry.create(&sms).is_ok());
    }
}
