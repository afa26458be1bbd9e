use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool::managed::{Object, Pool};
use libsql::params::Params;
use libsql::{Row, params};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use super::migrations::run_migrations;
use super::pool::{LibsqlManager, LibsqlPool};
use super::{Filter, FilterOp, Storage};
use crate::error::StorageError;
use crate::model::HeartbeatRecord;

/// LibSQL storage implementation
pub struct LibsqlStorage {
    pool: LibsqlPool,
}

impl LibsqlStorage {
    /// Open (or create) a local database file and bring its schema up to date
    pub async fn open(path: impl AsRef<Path>, pool_size: usize) -> Result<Self, StorageError> {
        let database = libsql::Builder::new_local(path.as_ref()).build().await?;
        let pool = Pool::builder(LibsqlManager::new(database))
            .max_size(pool_size.max(1))
            .build()
            .map_err(|e| StorageError::Pool(e.to_string()))?;

        let storage = Self::new_from_pool(pool);
        let conn = storage.get_conn().await?;
        run_migrations(&conn).await?;
        Ok(storage)
    }

    /// Create a storage instance from an already migrated pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<Object<LibsqlManager>, StorageError> {
        self.pool.get().await.map_err(|e| StorageError::Pool(e.to_string()))
    }
}

/// Map a JSON value onto what `json_extract` yields for it
fn sql_value(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => libsql::Value::Integer(i),
            None => libsql::Value::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => libsql::Value::Text(s.clone()),
        other => libsql::Value::Text(other.to_string()),
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt(format!("bad uuid {raw}: {e}")))
}

fn heartbeat_from_row(row: &Row) -> Result<HeartbeatRecord, StorageError> {
    let id: String = row.get(0)?;
    let monitor_id: String = row.get(1)?;
    let millis: i64 = row.get(2)?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Corrupt(format!("bad heartbeat timestamp {millis}")))?;

    Ok(HeartbeatRecord {
        id: parse_uuid(&id)?,
        monitor_id: parse_uuid(&monitor_id)?,
        timestamp,
        success: row.get::<i64>(3)? != 0,
        latency_ms: row.get::<Option<i64>>(4)?.map(|ms| ms.max(0) as u64),
        status_code: row.get::<Option<i64>>(5)?.and_then(|code| u16::try_from(code).ok()),
        message: row.get::<Option<String>>(6)?,
        retrying: row.get::<i64>(7)? != 0,
    })
}

#[async_trait]
impl Storage for LibsqlStorage {
    async fn put(&self, collection: &str, id: Uuid, body: &Value) -> Result<(), StorageError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO documents (collection, id, body, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![collection, id.to_string(), body.to_string(), Utc::now().timestamp()],
        )
        .await?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>, StorageError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let body: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, StorageError> {
        let conn = self.get_conn().await?;
        let affected = conn
            .execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id.to_string()],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StorageError> {
        let mut sql = String::from("SELECT body FROM documents WHERE collection = ?");
        let mut values = vec![libsql::Value::Text(collection.to_string())];

        for clause in &filter.clauses {
            let path = format!("$.{}", clause.field);
            match clause.op {
                FilterOp::Eq => sql.push_str(" AND json_extract(body, ?) IS ?"),
                FilterOp::Ne => sql.push_str(" AND json_extract(body, ?) IS NOT ?"),
                FilterOp::Contains => sql.push_str(
                    " AND EXISTS (SELECT 1 FROM json_each(documents.body, ?) WHERE json_each.value IS ?)",
                ),
            }
            values.push(libsql::Value::Text(path));
            values.push(sql_value(&clause.value));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.get_conn().await?;
        let mut rows = conn.query(&sql, Params::Positional(values)).await?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            let body: String = row.get(0)?;
            documents.push(serde_json::from_str(&body)?);
        }
        Ok(documents)
    }

    async fn append_heartbeat(&self, beat: &HeartbeatRecord) -> Result<(), StorageError> {
        let conn = self.get_conn().await?;
        // Replays of a queued beat are no-ops
        conn.execute(
            "INSERT OR IGNORE INTO heartbeats
                (id, monitor_id, timestamp, success, latency_ms, status_code, message, retrying)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                beat.id.to_string(),
                beat.monitor_id.to_string(),
                beat.timestamp.timestamp_millis(),
                i64::from(beat.success),
                beat.latency_ms.map(|ms| ms as i64),
                beat.status_code.map(i64::from),
                beat.message.clone(),
                i64::from(beat.retrying),
            ],
        )
        .await?;
        Ok(())
    }

    async fn heartbeats(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<HeartbeatRecord>, StorageError> {
        let conn = self.get_conn().await?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut rows = conn
            .query(
                "SELECT id, monitor_id, timestamp, success, latency_ms, status_code, message, retrying
                 FROM heartbeats
                 WHERE monitor_id = ?1 AND timestamp >= ?2
                 ORDER BY timestamp DESC
                 LIMIT ?3",
                params![monitor_id.to_string(), since.timestamp_millis(), limit],
            )
            .await?;

        let mut beats = Vec::new();
        while let Some(row) = rows.next().await? {
            beats.push(heartbeat_from_row(&row)?);
        }
        Ok(beats)
    }

    async fn prune_heartbeats(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let conn = self.get_conn().await?;
        let removed = conn
            .execute("DELETE FROM heartbeats WHERE timestamp < ?1", params![before.timestamp_millis()])
            .await?;
        Ok(removed)
    }
}
