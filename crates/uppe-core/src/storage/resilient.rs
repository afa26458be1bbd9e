//! Durable storage with an in-memory safety net.
//!
//! Every write goes to the volatile store first and then to the durable one.
//! When the durable write fails the record stays in memory, is queued as
//! unpersisted and the store reports itself degraded. The queue is replayed
//! in order before the next operation (or on [`ResilientStorage::flush`]);
//! once it drains the store is healthy again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Filter, MemoryStorage, Storage};
use crate::error::StorageError;
use crate::model::HeartbeatRecord;

#[derive(Debug, Clone, PartialEq)]
enum PendingWrite {
    Put { collection: String, id: Uuid },
    Delete { collection: String, id: Uuid },
    Heartbeat(HeartbeatRecord),
}

impl PendingWrite {
    fn key(&self) -> Option<(&str, Uuid)> {
        match self {
            PendingWrite::Put { collection, id } | PendingWrite::Delete { collection, id } => {
                Some((collection.as_str(), *id))
            }
            PendingWrite::Heartbeat(_) => None,
        }
    }
}

pub struct ResilientStorage {
    durable: Arc<dyn Storage>,
    volatile: MemoryStorage,
    pending: Mutex<Vec<PendingWrite>>,
    degraded: AtomicBool,
}

impl ResilientStorage {
    pub fn new(durable: Arc<dyn Storage>) -> Self {
        Self {
            durable,
            volatile: MemoryStorage::new(),
            pending: Mutex::new(Vec::new()),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub async fn unpersisted_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether the latest write to this document only exists in memory
    pub async fn is_unpersisted(&self, collection: &str, id: Uuid) -> bool {
        self.pending.lock().await.iter().any(|write| write.key() == Some((collection, id)))
    }

    /// Replay queued writes against the durable store
    ///
    /// Stops at the first failure, keeping it and everything after it queued.
    pub async fn flush(&self) -> Result<usize, StorageError> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            self.degraded.store(false, Ordering::Release);
            return Ok(0);
        }

        let mut flushed = 0;
        let mut failure = None;
        for write in pending.iter() {
            if let Err(e) = self.replay(write).await {
                failure = Some(e);
                break;
            }
            flushed += 1;
        }
        pending.drain(..flushed);

        match failure {
            Some(e) => {
                debug!(flushed, remaining = pending.len(), "storage still degraded: {}", e);
                Err(e)
            }
            None => {
                self.degraded.store(false, Ordering::Release);
                info!(flushed, "durable storage recovered, unpersisted writes flushed");
                Ok(flushed)
            }
        }
    }

    async fn replay(&self, write: &PendingWrite) -> Result<(), StorageError> {
        match write {
            PendingWrite::Put { collection, id } => {
                // Latest body wins; a later delete is queued after this put
                match self.volatile.get(collection, *id).await? {
                    Some(body) => self.durable.put(collection, *id, &body).await,
                    None => Ok(()),
                }
            }
            PendingWrite::Delete { collection, id } => {
                self.durable.delete(collection, *id).await.map(|_| ())
            }
            PendingWrite::Heartbeat(beat) => self.durable.append_heartbeat(beat).await,
        }
    }

    async fn recover(&self) {
        if self.is_degraded() {
            let _ = self.flush().await;
        }
    }

    async fn enqueue(&self, write: PendingWrite, error: StorageError) {
        warn!("durable write failed, holding record in memory: {}", error);
        let mut pending = self.pending.lock().await;
        // Only the latest write per document needs replaying
        if let Some(key) = write.key() {
            pending.retain(|queued| queued.key() != Some(key));
        }
        pending.push(write);
        self.degraded.store(true, Ordering::Release);
    }

    async fn pending_keys(&self, collection: &str) -> Vec<(Uuid, bool)> {
        self.pending
            .lock()
            .await
            .iter()
            .filter_map(|write| match write {
                PendingWrite::Put { collection: c, id } if c == collection => Some((*id, true)),
                PendingWrite::Delete { collection: c, id } if c == collection => Some((*id, false)),
                _ => None,
            })
            .collect()
    }

    async fn pending_heartbeats(&self, monitor_id: Uuid) -> Vec<HeartbeatRecord> {
        self.pending
            .lock()
            .await
            .iter()
            .filter_map(|write| match write {
                PendingWrite::Heartbeat(beat) if beat.monitor_id == monitor_id => Some(beat.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Storage for ResilientStorage {
    async fn put(&self, collection: &str, id: Uuid, body: &Value) -> Result<(), StorageError> {
        self.recover().await;
        self.volatile.put(collection, id, body).await?;
        if let Err(e) = self.durable.put(collection, id, body).await {
            self.enqueue(PendingWrite::Put { collection: collection.to_string(), id }, e).await;
        }
        Ok(())
    }

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>, StorageError> {
        self.recover().await;
        if self.is_unpersisted(collection, id).await {
            return self.volatile.get(collection, id).await;
        }
        match self.durable.get(collection, id).await {
            Ok(Some(body)) => {
                self.volatile.put(collection, id, &body).await?;
                Ok(Some(body))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("durable read failed, serving from memory: {}", e);
                self.degraded.store(true, Ordering::Release);
                self.volatile.get(collection, id).await
            }
        }
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, StorageError> {
        self.recover().await;
        let cached = self.volatile.delete(collection, id).await?;
        match self.durable.delete(collection, id).await {
            Ok(removed) => Ok(removed || cached),
            Err(e) => {
                self.enqueue(PendingWrite::Delete { collection: collection.to_string(), id }, e).await;
                Ok(cached)
            }
        }
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StorageError> {
        self.recover().await;
        let durable = match self.durable.query(collection, filter).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!("durable query failed, serving from memory: {}", e);
                self.degraded.store(true, Ordering::Release);
                return self.volatile.query(collection, filter).await;
            }
        };

        let pending = self.pending_keys(collection).await;
        if pending.is_empty() {
            return Ok(durable);
        }

        // Overlay writes the durable side has not seen yet
        let shadowed = |doc: &Value| {
            doc.get("id")
                .and_then(Value::as_str)
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .is_some_and(|id| pending.iter().any(|(pending_id, _)| *pending_id == id))
        };
        let mut documents: Vec<Value> = durable.into_iter().filter(|doc| !shadowed(doc)).collect();
        for (id, is_put) in &pending {
            if !is_put {
                continue;
            }
            if let Some(body) = self.volatile.get(collection, *id).await? {
                if filter.matches(&body) && !documents.contains(&body) {
                    documents.push(body);
                }
            }
        }
        Ok(documents)
    }

    async fn append_heartbeat(&self, beat: &HeartbeatRecord) -> Result<(), StorageError> {
        self.recover().await;
        self.volatile.append_heartbeat(beat).await?;
        if let Err(e) = self.durable.append_heartbeat(beat).await {
            self.enqueue(PendingWrite::Heartbeat(beat.clone()), e).await;
        }
        Ok(())
    }

    async fn heartbeats(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<HeartbeatRecord>, StorageError> {
        self.recover().await;
        let mut beats = match self.durable.heartbeats(monitor_id, since, limit).await {
            Ok(beats) => beats,
            Err(e) => {
                warn!("durable heartbeat read failed, serving from memory: {}", e);
                self.degraded.store(true, Ordering::Release);
                return self.volatile.heartbeats(monitor_id, since, limit).await;
            }
        };

        let unpersisted = self.pending_heartbeats(monitor_id).await;
        if !unpersisted.is_empty() {
            beats.extend(unpersisted.into_iter().filter(|beat| beat.timestamp >= since));
            beats.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            if let Some(limit) = limit {
                beats.truncate(limit);
            }
        }
        Ok(beats)
    }

    async fn prune_heartbeats(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        self.recover().await;
        let cached = self.volatile.prune_heartbeats(before).await?;
        match self.durable.prune_heartbeats(before).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                warn!("durable heartbeat prune failed: {}", e);
                Ok(cached)
            }
        }
    }
}
