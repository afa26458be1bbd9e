use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of a single check attempt
///
/// Immutable once recorded. A failed attempt that will still be retried is stored
/// with `retrying = true` and never changes monitor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
    pub status_code: Option<u16>,
    #[serde(default)]
    pub retrying: bool,
}

impl HeartbeatRecord {
    /// Create a new (failed, authoritative) heartbeat for a monitor
    pub fn new(monitor_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            monitor_id,
            timestamp: Utc::now(),
            success: false,
            latency_ms: None,
            message: None,
            status_code: None,
            retrying: false,
        }
    }

    /// Mark the check as successful with latency
    pub fn success(mut self, latency_ms: u64, status_code: Option<u16>) -> Self {
        self.success = true;
        self.latency_ms = Some(latency_ms);
        self.status_code = status_code;
        self
    }

    /// Mark the check as failed with a diagnostic
    pub fn failure(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.message = Some(message.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn retrying(mut self, retrying: bool) -> Self {
        self.retrying = retrying;
        self
    }

    /// Only non-retrying beats may change monitor state or count towards uptime
    pub fn is_authoritative(&self) -> bool {
        !self.retrying
    }
}
