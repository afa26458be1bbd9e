//! Automatic retention of heartbeat history.
//!
//! Heartbeats older than the configured number of days are deleted.
//! Cleanup runs periodically (every hour by default) as a background task.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetentionPolicy;
use crate::error::StorageError;
use crate::storage::Storage;

/// Cleanup manager for expired heartbeats
pub struct RetentionCleanup {
    storage: Arc<dyn Storage>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(storage: Arc<dyn Storage>, policy: RetentionPolicy) -> Self {
        Self { storage, policy }
    }

    /// Delete heartbeats past the retention period
    pub async fn cleanup_expired_heartbeats(&self) -> Result<u64, StorageError> {
        let cutoff = Utc::now() - self.policy.heartbeat_retention();
        debug!(
            "Cleaning up heartbeats (older than {} days, cutoff: {})",
            self.policy.heartbeat_days, cutoff
        );

        let removed = self.storage.prune_heartbeats(cutoff).await?;
        info!("Retention cleanup completed: {} heartbeats deleted", removed);
        Ok(removed)
    }

    /// Start background cleanup task, stopped by `shutdown`
    pub fn start_periodic_cleanup(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let storage = Arc::clone(&self.storage);
        let policy = self.policy.clone();

        tokio::spawn(async move {
            let every = Duration::from_secs(policy.cleanup_interval_secs.max(60));
            let cleanup = RetentionCleanup::new(storage, policy);
            let mut interval = tokio::time::interval(every);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match cleanup.cleanup_expired_heartbeats().await {
                    Ok(count) => debug!("Periodic heartbeat cleanup completed: {} deleted", count),
                    Err(e) => warn!("Periodic heartbeat cleanup failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HeartbeatRecord;
    use crate::storage::MemoryStorage;
    use uuid::Uuid;

    #[test]
    fn test_retention_policy_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.heartbeat_days, 90);
        assert_eq!(policy.heartbeat_retention(), chrono::Duration::days(90));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let monitor = Uuid::new_v4();
        let now = Utc::now();
        storage
            .append_heartbeat(&HeartbeatRecord::new(monitor).at(now - chrono::Duration::days(10)))
            .await
            .unwrap();
        storage.append_heartbeat(&HeartbeatRecord::new(monitor).at(now)).await.unwrap();

        let policy = RetentionPolicy { heartbeat_days: 7, ..Default::default() };
        let cleanup = RetentionCleanup::new(Arc::clone(&storage), policy);
        assert_eq!(cleanup.cleanup_expired_heartbeats().await.unwrap(), 1);
        assert_eq!(cleanup.cleanup_expired_heartbeats().await.unwrap(), 0);
    }
}
