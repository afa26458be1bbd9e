//! Heartbeat history, derived monitor state and uptime.
//!
//! State is a pure function of the most recent authoritative heartbeat and
//! whether a maintenance window is active; retrying beats are stored but
//! never move state or count towards uptime.

pub mod retention;

pub use retention::RetentionCleanup;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::{HeartbeatRecord, Monitor};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Pending,
    Up,
    Down,
    Maintenance,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Pending => write!(f, "pending"),
            MonitorState::Up => write!(f, "up"),
            MonitorState::Down => write!(f, "down"),
            MonitorState::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Derive state from heartbeats ordered newest first
pub fn derive_state(beats: &[HeartbeatRecord], maintenance_active: bool) -> MonitorState {
    if maintenance_active {
        return MonitorState::Maintenance;
    }
    match beats.iter().find(|beat| beat.is_authoritative()) {
        Some(beat) if beat.success => MonitorState::Up,
        Some(_) => MonitorState::Down,
        None => MonitorState::Pending,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UptimeStats {
    /// Percentage in `[0, 100]`; 100 when there are no beats
    pub uptime_percent: f64,
    pub avg_latency_ms: Option<f64>,
    pub total: usize,
    pub up: usize,
}

/// Uptime over authoritative beats with `timestamp >= since`
pub fn compute_uptime(beats: &[HeartbeatRecord], since: DateTime<Utc>) -> UptimeStats {
    let mut total = 0usize;
    let mut up = 0usize;
    let mut latency_sum = 0u64;
    let mut latency_count = 0u64;

    for beat in beats.iter().filter(|b| b.is_authoritative() && b.timestamp >= since) {
        total += 1;
        if beat.success {
            up += 1;
            if let Some(latency) = beat.latency_ms {
                latency_sum += latency;
                latency_count += 1;
            }
        }
    }

    let uptime_percent = if total == 0 { 100.0 } else { up as f64 / total as f64 * 100.0 };
    let avg_latency_ms = (latency_count > 0).then(|| latency_sum as f64 / latency_count as f64);

    UptimeStats { uptime_percent, avg_latency_ms, total, up }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UptimeWindows {
    pub day: UptimeStats,
    pub week: UptimeStats,
    pub month: UptimeStats,
}

impl UptimeWindows {
    pub fn compute(beats: &[HeartbeatRecord], now: DateTime<Utc>) -> Self {
        Self {
            day: compute_uptime(beats, now - Duration::hours(24)),
            week: compute_uptime(beats, now - Duration::days(7)),
            month: compute_uptime(beats, now - Duration::days(30)),
        }
    }
}

/// Dashboard view of one monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStateView {
    pub monitor_id: Uuid,
    pub name: String,
    pub state: MonitorState,
    pub last_heartbeat: Option<HeartbeatRecord>,
    pub uptime: UptimeWindows,
    pub paused: bool,
    /// Some of this monitor's data only lives in memory
    pub unpersisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub previous: MonitorState,
    pub current: MonitorState,
}

impl StateTransition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Heartbeat persistence plus the per-monitor state used to detect transitions
pub struct HeartbeatStore {
    storage: Arc<dyn Storage>,
    /// Newest first, bounded by `recent_limit`
    recent: DashMap<Uuid, VecDeque<HeartbeatRecord>>,
    states: DashMap<Uuid, MonitorState>,
    recent_limit: usize,
}

impl HeartbeatStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_recent_limit(storage, 100)
    }

    pub fn with_recent_limit(storage: Arc<dyn Storage>, recent_limit: usize) -> Self {
        Self { storage, recent: DashMap::new(), states: DashMap::new(), recent_limit: recent_limit.max(1) }
    }

    /// Seed the cache from storage so the first beat after a restart sees the real previous state
    pub async fn load(&self, monitor_id: Uuid, maintenance_active: bool) -> Result<MonitorState, StorageError> {
        let beats = self
            .storage
            .heartbeats(monitor_id, DateTime::<Utc>::MIN_UTC, Some(self.recent_limit))
            .await?;
        let state = derive_state(&beats, maintenance_active);
        self.recent.insert(monitor_id, beats.into());
        self.states.insert(monitor_id, state);
        Ok(state)
    }

    /// Append a beat and report the state change it caused
    ///
    /// A persistence failure is logged; the beat still counts for state.
    pub async fn record(&self, beat: &HeartbeatRecord, maintenance_active: bool) -> StateTransition {
        if let Err(e) = self.storage.append_heartbeat(beat).await {
            warn!(monitor_id = %beat.monitor_id, "failed to persist heartbeat: {}", e);
        }

        let current = {
            let mut recent = self.recent.entry(beat.monitor_id).or_default();
            let position = recent.iter().position(|b| b.timestamp <= beat.timestamp).unwrap_or(recent.len());
            recent.insert(position, beat.clone());
            recent.truncate(self.recent_limit);
            derive_state(recent.make_contiguous(), maintenance_active)
        };

        let previous = self.states.insert(beat.monitor_id, current).unwrap_or(MonitorState::Pending);
        StateTransition { previous, current }
    }

    /// Last state derived for a monitor, if any beat was seen
    pub fn last_state(&self, monitor_id: Uuid) -> Option<MonitorState> {
        self.states.get(&monitor_id).map(|state| *state)
    }

    /// Recent beats newest first
    pub fn recent(&self, monitor_id: Uuid) -> Vec<HeartbeatRecord> {
        self.recent.get(&monitor_id).map(|beats| beats.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn forget(&self, monitor_id: Uuid) {
        self.recent.remove(&monitor_id);
        self.states.remove(&monitor_id);
    }

    pub async fn uptime(&self, monitor_id: Uuid, now: DateTime<Utc>) -> Result<UptimeWindows, StorageError> {
        let beats = self.storage.heartbeats(monitor_id, now - Duration::days(30), None).await?;
        Ok(UptimeWindows::compute(&beats, now))
    }

    pub async fn state_view(
        &self,
        monitor: &Monitor,
        maintenance_active: bool,
        now: DateTime<Utc>,
    ) -> Result<MonitorStateView, StorageError> {
        let beats = self.storage.heartbeats(monitor.id, now - Duration::days(30), None).await?;
        let recent = self.recent(monitor.id);
        // Beats older than 30 days still decide state when nothing newer exists
        let state = if recent.is_empty() {
            derive_state(&beats, maintenance_active)
        } else {
            derive_state(&recent, maintenance_active)
        };

        Ok(MonitorStateView {
            monitor_id: monitor.id,
            name: monitor.name.clone(),
            state,
            last_heartbeat: recent.first().cloned().or_else(|| beats.first().cloned()),
            uptime: UptimeWindows::compute(&beats, now),
            paused: monitor.paused,
            unpersisted: false,
        })
    }

    pub async fn prune(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        self.storage.prune_heartbeats(before).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn beat(monitor: Uuid, success: bool, minutes_ago: i64, now: DateTime<Utc>) -> HeartbeatRecord {
        let beat = HeartbeatRecord::new(monitor).at(now - Duration::minutes(minutes_ago));
        if success { beat.success(20, Some(200)) } else { beat.failure("refused") }
    }

    #[test]
    fn state_is_pure_function_of_history() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let beats = vec![
            beat(id, false, 1, now).retrying(true),
            beat(id, true, 2, now),
            beat(id, false, 3, now),
        ];

        assert_eq!(derive_state(&beats, false), MonitorState::Up);
        assert_eq!(derive_state(&beats, false), derive_state(&beats.clone(), false));
        assert_eq!(derive_state(&beats, true), MonitorState::Maintenance);
        assert_eq!(derive_state(&[], false), MonitorState::Pending);
        assert_eq!(derive_state(&beats[..1], false), MonitorState::Pending);
        assert_eq!(derive_state(&beats[2..], false), MonitorState::Down);
    }

    #[test]
    fn uptime_conventions() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let since = now - Duration::hours(1);

        let all_up: Vec<_> = (0..5).map(|m| beat(id, true, m, now)).collect();
        assert_eq!(compute_uptime(&all_up, since).uptime_percent, 100.0);
        assert_eq!(compute_uptime(&all_up, since).avg_latency_ms, Some(20.0));

        let all_down: Vec<_> = (0..5).map(|m| beat(id, false, m, now)).collect();
        let stats = compute_uptime(&all_down, since);
        assert_eq!(stats.uptime_percent, 0.0);
        assert_eq!(stats.avg_latency_ms, None);

        assert_eq!(compute_uptime(&[], since).uptime_percent, 100.0);

        let mixed = vec![
            beat(id, true, 1, now),
            beat(id, false, 2, now).retrying(true),
            beat(id, false, 3, now),
            beat(id, false, 120, now),
        ];
        let stats = compute_uptime(&mixed, since);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.uptime_percent, 50.0);
    }

    #[tokio::test]
    async fn record_reports_transitions() {
        let store = HeartbeatStore::new(Arc::new(MemoryStorage::new()));
        let now = Utc::now();
        let id = Uuid::new_v4();

        let t = store.record(&beat(id, true, 3, now), false).await;
        assert_eq!((t.previous, t.current), (MonitorState::Pending, MonitorState::Up));

        let t = store.record(&beat(id, false, 2, now).retrying(true), false).await;
        assert!(!t.changed());

        let t = store.record(&beat(id, false, 1, now), false).await;
        assert_eq!((t.previous, t.current), (MonitorState::Up, MonitorState::Down));

        let t = store.record(&beat(id, false, 0, now), true).await;
        assert_eq!(t.current, MonitorState::Maintenance);
        assert_eq!(store.recent(id).len(), 4);
    }

    #[tokio::test]
    async fn load_restores_previous_state() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        let id = Uuid::new_v4();
        storage.append_heartbeat(&beat(id, false, 5, now)).await.unwrap();

        let store = HeartbeatStore::new(storage);
        assert_eq!(store.load(id, false).await.unwrap(), MonitorState::Down);
        let t = store.record(&beat(id, false, 1, now), false).await;
        assert!(!t.changed());
    }

    #[tokio::test]
    async fn state_view_reports_windows() {
        let store = HeartbeatStore::new(Arc::new(MemoryStorage::new()));
        let now = Utc::now();
        let monitor = Monitor::new("api", crate::model::MonitorTarget::http("https://api.example.com"));

        store.record(&beat(monitor.id, false, 60 * 24 * 3, now), false).await;
        store.record(&beat(monitor.id, true, 5, now), false).await;

        let view = store.state_view(&monitor, false, now).await.unwrap();
        assert_eq!(view.state, MonitorState::Up);
        assert_eq!(view.uptime.day.uptime_percent, 100.0);
        assert_eq!(view.uptime.week.uptime_percent, 50.0);
        assert!(view.last_heartbeat.unwrap().success);
    }
}
