use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::DispatchError;
use super::registry::{NotificationSender, SenderRegistry};
use crate::config::DispatchConfig;
use crate::model::{AlertMessage, NotificationProvider, ProviderTestResult};
use crate::storage::{Filter, Repository, Storage};

/// Result of delivering one alert through one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOutcome {
    pub provider_id: Uuid,
    pub provider_name: String,
    pub kind: String,
    pub delivered: bool,
    pub attempts: u32,
    /// Delivery was abandoned because the alert became obsolete
    pub cancelled: bool,
    pub error: Option<String>,
}

impl ProviderOutcome {
    fn failed(provider: &NotificationProvider, attempts: u32, error: impl ToString) -> Self {
        Self {
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            kind: provider.kind().to_string(),
            delivered: false,
            attempts,
            cancelled: false,
            error: Some(error.to_string()),
        }
    }

    fn cancelled(provider: &NotificationProvider, attempts: u32) -> Self {
        Self { cancelled: true, ..Self::failed(provider, attempts, DispatchError::Cancelled) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub alert_id: Uuid,
    pub outcomes: Vec<ProviderOutcome>,
}

impl DispatchReport {
    /// At least one provider accepted the alert
    pub fn delivered(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.delivered)
    }

    /// Nothing was delivered and at least one provider genuinely failed
    ///
    /// Cancelled deliveries are not failures.
    pub fn all_failed(&self) -> bool {
        !self.delivered() && self.failures().next().is_some()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProviderOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.delivered && !outcome.cancelled)
    }

    pub fn cancelled(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|outcome| outcome.cancelled)
    }
}

/// Fans alerts out to notification providers
pub struct Dispatcher {
    providers: Repository<NotificationProvider>,
    registry: Arc<SenderRegistry>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<SenderRegistry>, config: DispatchConfig) -> Self {
        Self { providers: Repository::new(storage), registry, config }
    }

    pub fn registry(&self) -> &SenderRegistry {
        &self.registry
    }

    /// Store a provider after checking that a sender can be built for it
    pub async fn save_provider(&self, provider: &NotificationProvider) -> Result<(), DispatchError> {
        self.registry.create(provider)?;
        self.providers.save(provider).await?;
        info!(provider_id = %provider.id, kind = provider.kind(), "Saved notification provider");
        Ok(())
    }

    pub async fn get_provider(&self, id: Uuid) -> Result<NotificationProvider, DispatchError> {
        self.providers.get(id).await?.ok_or(DispatchError::ProviderNotFound(id))
    }

    pub async fn list_providers(&self) -> Result<Vec<NotificationProvider>, DispatchError> {
        Ok(self.providers.list().await?)
    }

    pub async fn delete_provider(&self, id: Uuid) -> Result<bool, DispatchError> {
        Ok(self.providers.delete(id).await?)
    }

    /// Explicit provider ids, or every active default provider when none are given
    pub async fn resolve_providers(&self, ids: &[Uuid]) -> Result<Vec<NotificationProvider>, DispatchError> {
        if ids.is_empty() {
            let defaults = self.providers.find(&Filter::all().eq("is_default", true).eq("active", true)).await?;
            return Ok(defaults);
        }

        let mut providers = Vec::with_capacity(ids.len());
        for id in ids {
            match self.providers.get(*id).await? {
                Some(provider) if provider.active => {
                    if !providers.iter().any(|p: &NotificationProvider| p.id == provider.id) {
                        providers.push(provider);
                    }
                }
                Some(provider) => debug!(provider_id = %provider.id, "Skipping inactive provider"),
                None => warn!(provider_id = %id, "Alert references unknown notification provider"),
            }
        }
        Ok(providers)
    }

    /// Deliver `alert` to every resolved provider in parallel
    ///
    /// Each provider runs in its own task; a failure, timeout or panic in one
    /// never affects the others. Cancelling `token` aborts pending retries.
    pub async fn dispatch(
        &self,
        alert: &AlertMessage,
        provider_ids: &[Uuid],
        token: CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        let providers = self.resolve_providers(provider_ids).await?;
        let report = self.dispatch_to(alert, providers, token).await;

        if report.outcomes.is_empty() {
            debug!(alert_id = %alert.id, "No notification providers for alert");
        } else if report.cancelled() {
            debug!(alert_id = %alert.id, "Alert delivery cancelled");
        } else if report.all_failed() {
            error!(alert_id = %alert.id, providers = report.outcomes.len(), "Alert delivery failed on every provider");
        } else {
            info!(
                alert_id = %alert.id,
                delivered = report.outcomes.iter().filter(|o| o.delivered).count(),
                failed = report.failures().count(),
                "Alert dispatched"
            );
        }
        Ok(report)
    }

    async fn dispatch_to(
        &self,
        alert: &AlertMessage,
        providers: Vec<NotificationProvider>,
        token: CancellationToken,
    ) -> DispatchReport {
        let alert_shared = Arc::new(alert.clone());
        let mut pending = Vec::with_capacity(providers.len());
        let mut outcomes = Vec::with_capacity(providers.len());

        for provider in providers {
            let sender = match self.registry.create(&provider) {
                Ok(sender) => sender,
                Err(e) => {
                    warn!(provider_id = %provider.id, error = %e, "Cannot build sender for provider");
                    outcomes.push(ProviderOutcome::failed(&provider, 0, e));
                    continue;
                }
            };

            let alert = Arc::clone(&alert_shared);
            let config = self.config.clone();
            let token = token.clone();
            let handle = tokio::spawn(async move { deliver(sender.as_ref(), &alert, &config, &token).await });
            pending.push((provider, handle));
        }

        let (providers, handles): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        for (provider, joined) in providers.iter().zip(join_all(handles).await) {
            let outcome = match joined {
                Ok((attempts, Ok(()))) => ProviderOutcome {
                    provider_id: provider.id,
                    provider_name: provider.name.clone(),
                    kind: provider.kind().to_string(),
                    delivered: true,
                    attempts,
                    cancelled: false,
                    error: None,
                },
                Ok((attempts, Err(DispatchError::Cancelled))) => ProviderOutcome::cancelled(provider, attempts),
                Ok((attempts, Err(e))) => ProviderOutcome::failed(provider, attempts, e),
                Err(e) => {
                    error!(provider_id = %provider.id, error = %e, "Provider task panicked");
                    ProviderOutcome::failed(provider, 0, format!("sender task failed: {e}"))
                }
            };
            outcomes.push(outcome);
        }

        DispatchReport { alert_id: alert_shared.id, outcomes }
    }

    /// Send a test alert through one provider and remember the result
    pub async fn test_provider(&self, id: Uuid) -> Result<ProviderTestResult, DispatchError> {
        let mut provider = self.get_provider(id).await?;
        let alert = AlertMessage::test(&provider.name);

        let result = match self.registry.create(&provider) {
            Ok(sender) => {
                let single = DispatchConfig { max_attempts: 1, ..self.config.clone() };
                deliver(sender.as_ref(), &alert, &single, &CancellationToken::new()).await.1
            }
            Err(e) => Err(e),
        };

        let test = match result {
            Ok(()) => ProviderTestResult {
                success: true,
                message: "Test notification delivered".to_string(),
                tested_at: Utc::now(),
            },
            Err(e) => ProviderTestResult { success: false, message: e.to_string(), tested_at: Utc::now() },
        };
        info!(provider_id = %id, success = test.success, "Tested notification provider");

        provider.last_test = Some(test.clone());
        self.providers.save(&provider).await?;
        Ok(test)
    }
}

/// Send with per-attempt timeout and exponential backoff
///
/// Returns the number of attempts made with the final result.
async fn deliver(
    sender: &dyn NotificationSender,
    alert: &AlertMessage,
    config: &DispatchConfig,
    token: &CancellationToken,
) -> (u32, Result<(), DispatchError>) {
    let max_attempts = config.max_attempts.max(1);
    let timeout = Duration::from_secs(config.attempt_timeout_secs.max(1));
    let mut last_error = DispatchError::Cancelled;

    for attempt in 0..max_attempts {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return (attempt, Err(DispatchError::Cancelled)),
            sent = tokio::time::timeout(timeout, sender.send(alert)) => match sent {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(timeout.as_secs())),
            },
        };

        match result {
            Ok(()) => return (attempt + 1, Ok(())),
            Err(e) => {
                warn!(alert_id = %alert.id, attempt = attempt + 1, error = %e, "Notification attempt failed");
                last_error = e;
            }
        }

        if attempt + 1 < max_attempts {
            let backoff = Duration::from_millis(config.base_backoff_ms.saturating_mul(2u64.saturating_pow(attempt)));
            tokio::select! {
                biased;
                _ = token.cancelled() => return (attempt + 1, Err(DispatchError::Cancelled)),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    (max_attempts, Err(last_error))
}
