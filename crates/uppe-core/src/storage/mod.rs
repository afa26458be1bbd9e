//! Persistence abstraction.
//!
//! Records are stored as JSON documents keyed by `(collection, id)`;
//! heartbeats get their own append-only, time-indexed path. Three backends
//! share the [`Storage`] contract: an in-memory store, a libsql store and a
//! [`ResilientStorage`] that pairs the two and keeps working while the
//! durable side is down.

pub mod memory;
pub mod migrations;
pub mod pool;
pub mod resilient;
pub mod sql;

pub use memory::MemoryStorage;
pub use pool::{LibsqlManager, LibsqlPool};
pub use resilient::ResilientStorage;
pub use sql::LibsqlStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::{
    AlertWorkflowRule, HeartbeatRecord, Incident, MaintenanceWindow, Monitor, NotificationProvider,
    OnCallSchedule, ScheduleOverride, Tag,
};

/// Storage trait for abstracting persistence operations
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace a document
    async fn put(&self, collection: &str, id: Uuid, body: &Value) -> Result<(), StorageError>;

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>, StorageError>;

    /// Returns whether a document was removed
    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, StorageError>;

    /// Documents of a collection matching every clause of `filter`, ordered by id
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StorageError>;

    async fn append_heartbeat(&self, beat: &HeartbeatRecord) -> Result<(), StorageError>;

    /// Heartbeats with `timestamp >= since`, newest first
    async fn heartbeats(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<HeartbeatRecord>, StorageError>;

    /// Delete heartbeats older than `before`, returning how many were removed
    async fn prune_heartbeats(&self, before: DateTime<Utc>) -> Result<u64, StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    /// Field is an array holding the value
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Dotted path into the document, e.g. `target.type`
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Conjunction of field clauses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(field, FilterOp::Eq, value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(field, FilterOp::Ne, value)
    }

    pub fn contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(field, FilterOp::Contains, value)
    }

    fn clause(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause { field: field.into(), op, value: value.into() });
        self
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.clauses.iter().all(|clause| {
            let found = lookup(document, &clause.field).unwrap_or(&Value::Null);
            match clause.op {
                FilterOp::Eq => found == &clause.value,
                FilterOp::Ne => found != &clause.value,
                FilterOp::Contains => {
                    found.as_array().is_some_and(|items| items.contains(&clause.value))
                }
            }
        })
    }
}

fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |current, key| current.get(key))
}

/// A type persisted as a document in its own collection
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn record_id(&self) -> Uuid;
}

macro_rules! record {
    ($ty:ty, $collection:literal) => {
        impl Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn record_id(&self) -> Uuid {
                self.id
            }
        }
    };
}

record!(Monitor, "monitors");
record!(Incident, "incidents");
record!(MaintenanceWindow, "maintenance_windows");
record!(NotificationProvider, "notification_providers");
record!(AlertWorkflowRule, "workflow_rules");
record!(OnCallSchedule, "oncall_schedules");
record!(ScheduleOverride, "schedule_overrides");
record!(Tag, "tags");

/// Typed view of one collection
pub struct Repository<T> {
    storage: Arc<dyn Storage>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self { storage: Arc::clone(&self.storage), _record: PhantomData }
    }
}

impl<T: Record> Repository<T> {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, _record: PhantomData }
    }

    pub async fn save(&self, record: &T) -> Result<(), StorageError> {
        let body = serde_json::to_value(record)?;
        self.storage.put(T::COLLECTION, record.record_id(), &body).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<T>, StorageError> {
        match self.storage.get(T::COLLECTION, id).await? {
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        self.storage.delete(T::COLLECTION, id).await
    }

    pub async fn list(&self) -> Result<Vec<T>, StorageError> {
        self.find(&Filter::all()).await
    }

    pub async fn find(&self, filter: &Filter) -> Result<Vec<T>, StorageError> {
        self.storage
            .query(T::COLLECTION, filter)
            .await?
            .into_iter()
            .map(|body| serde_json::from_value(body).map_err(StorageError::from))
            .collect()
    }
}
