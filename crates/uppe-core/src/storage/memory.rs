use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Filter, Storage};
use crate::error::StorageError;
use crate::model::HeartbeatRecord;

/// Volatile store, also the fallback side of [`super::ResilientStorage`]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    documents: RwLock<HashMap<String, BTreeMap<Uuid, Value>>>,
    /// Oldest first per monitor
    heartbeats: RwLock<HashMap<Uuid, Vec<HeartbeatRecord>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, collection: &str, id: Uuid, body: &Value) -> Result<(), StorageError> {
        self.documents
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id, body.clone());
        Ok(())
    }

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>, StorageError> {
        Ok(self.documents.read().await.get(collection).and_then(|docs| docs.get(&id)).cloned())
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, StorageError> {
        Ok(self
            .documents
            .write()
            .await
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(&id).is_some()))
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StorageError> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(collection)
            .map(|docs| docs.values().filter(|doc| filter.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }

    async fn append_heartbeat(&self, beat: &HeartbeatRecord) -> Result<(), StorageError> {
        let mut heartbeats = self.heartbeats.write().await;
        let beats = heartbeats.entry(beat.monitor_id).or_default();
        // Keep time order even if a late beat arrives
        let position = beats.partition_point(|existing| existing.timestamp <= beat.timestamp);
        beats.insert(position, beat.clone());
        Ok(())
    }

    async fn heartbeats(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<HeartbeatRecord>, StorageError> {
        let heartbeats = self.heartbeats.read().await;
        let Some(beats) = heartbeats.get(&monitor_id) else {
            return Ok(Vec::new());
        };
        Ok(beats
            .iter()
            .rev()
            .take_while(|beat| beat.timestamp >= since)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn prune_heartbeats(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut heartbeats = self.heartbeats.write().await;
        let mut removed = 0u64;
        for beats in heartbeats.values_mut() {
            let cut = beats.partition_point(|beat| beat.timestamp < before);
            beats.drain(..cut);
            removed += cut as u64;
        }
        heartbeats.retain(|_, beats| !beats.is_empty());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn documents_round_trip_and_query() {
        let storage = MemoryStorage::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        storage.put("monitors", a, &json!({"name": "a", "paused": false})).await.unwrap();
        storage.put("monitors", b, &json!({"name": "b", "paused": true})).await.unwrap();

        let active = storage.query("monitors", &Filter::all().eq("paused", false)).await.unwrap();
        assert_eq!(active, vec![json!({"name": "a", "paused": false})]);

        assert!(storage.delete("monitors", a).await.unwrap());
        assert!(!storage.delete("monitors", a).await.unwrap());
        assert!(storage.get("monitors", a).await.unwrap().is_none());
        assert!(storage.get("incidents", b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heartbeats_newest_first_and_prunable() {
        let storage = MemoryStorage::new();
        let monitor = Uuid::new_v4();
        let now = Utc::now();
        for minutes in [30, 10, 20] {
            let beat = HeartbeatRecord::new(monitor).at(now - Duration::minutes(minutes));
            storage.append_heartbeat(&beat).await.unwrap();
        }

        let beats = storage.heartbeats(monitor, now - Duration::minutes(25), None).await.unwrap();
        assert_eq!(beats.len(), 2);
        assert!(beats[0].timestamp > beats[1].timestamp);

        let limited = storage.heartbeats(monitor, now - Duration::hours(1), Some(1)).await.unwrap();
        assert_eq!(limited[0].timestamp, now - Duration::minutes(10));

        let removed = storage.prune_heartbeats(now - Duration::minutes(15)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(storage.heartbeats(monitor, now - Duration::hours(1), None).await.unwrap().len(), 1);
    }
}
