//! Maintenance window gate.
//!
//! Windows are persisted through storage and mirrored in memory, since the
//! gate is consulted for every authoritative heartbeat.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, ValidationError};
use crate::events::{EventBus, MonitorEvent};
use crate::model::{MaintenanceStatus, MaintenanceWindow, Monitor};
use crate::storage::{Repository, Storage};

#[derive(Debug, Clone)]
struct Tracked {
    window: MaintenanceWindow,
    /// Status as of the last tick, used to detect start and end
    last_status: MaintenanceStatus,
}

/// A window whose derived status changed during a tick
#[derive(Debug, Clone)]
pub struct MaintenanceChange {
    pub window: MaintenanceWindow,
    pub status: MaintenanceStatus,
}

pub struct MaintenanceRegistry {
    windows: Repository<MaintenanceWindow>,
    cache: RwLock<HashMap<Uuid, Tracked>>,
    events: EventBus,
}

impl MaintenanceRegistry {
    pub fn new(storage: Arc<dyn Storage>, events: EventBus) -> Self {
        Self { windows: Repository::new(storage), cache: RwLock::new(HashMap::new()), events }
    }

    /// Populate the in-memory mirror from storage
    pub async fn load(&self, now: DateTime<Utc>) -> crate::Result<usize> {
        let windows = self.windows.list().await?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for window in windows {
            let last_status = window.status(now);
            cache.insert(window.id, Tracked { window, last_status });
        }
        debug!(count = cache.len(), "maintenance windows loaded");
        Ok(cache.len())
    }

    pub async fn schedule(&self, window: MaintenanceWindow) -> crate::Result<MaintenanceWindow> {
        if window.end_time <= window.start_time {
            return Err(ValidationError::field("end_time", "must be after start_time").into());
        }
        if window.title.trim().is_empty() {
            return Err(ValidationError::field("title", "must not be empty").into());
        }

        self.windows.save(&window).await?;
        self.cache.write().await.insert(
            window.id,
            // Started is announced by the next tick, even if the window is already running
            Tracked { window: window.clone(), last_status: MaintenanceStatus::Scheduled },
        );
        info!(
            window_id = %window.id,
            start = %window.start_time,
            end = %window.end_time,
            monitors = window.monitor_ids.len(),
            "maintenance scheduled"
        );
        self.events.publish(MonitorEvent::MaintenanceScheduled(window.clone()));
        Ok(window)
    }

    /// Stop a window immediately
    pub async fn cancel(&self, id: Uuid) -> crate::Result<MaintenanceWindow> {
        let mut window = self.get(id).await?.ok_or_else(|| CoreError::not_found("maintenance window", id))?;
        if window.cancelled {
            return Ok(window);
        }
        window.cancelled = true;
        self.windows.save(&window).await?;
        self.cache.write().await.insert(
            id,
            Tracked { window: window.clone(), last_status: MaintenanceStatus::Cancelled },
        );
        info!(window_id = %id, "maintenance cancelled");
        self.events.publish(MonitorEvent::MaintenanceCompleted(window.clone()));
        Ok(window)
    }

    pub async fn get(&self, id: Uuid) -> crate::Result<Option<MaintenanceWindow>> {
        if let Some(tracked) = self.cache.read().await.get(&id) {
            return Ok(Some(tracked.window.clone()));
        }
        Ok(self.windows.get(id).await?)
    }

    /// All windows ordered by start time
    pub async fn list(&self) -> Vec<MaintenanceWindow> {
        let mut windows: Vec<MaintenanceWindow> =
            self.cache.read().await.values().map(|t| t.window.clone()).collect();
        windows.sort_by_key(|w| w.start_time);
        windows
    }

    /// Active windows covering the monitor
    ///
    /// A window covers a monitor when it lists the monitor or the monitor
    /// references the window.
    pub async fn active_for(&self, monitor: &Monitor, now: DateTime<Utc>) -> Vec<MaintenanceWindow> {
        self.cache
            .read()
            .await
            .values()
            .map(|t| &t.window)
            .filter(|w| w.is_active(now) && covers(w, monitor))
            .cloned()
            .collect()
    }

    pub async fn is_under_maintenance(&self, monitor: &Monitor, now: DateTime<Utc>) -> bool {
        self.cache
            .read()
            .await
            .values()
            .any(|t| t.window.is_active(now) && covers(&t.window, monitor))
    }

    /// Detect windows that started or ended since the last tick and announce them
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<MaintenanceChange> {
        let mut changes = Vec::new();
        {
            let mut cache = self.cache.write().await;
            for tracked in cache.values_mut() {
                let status = tracked.window.status(now);
                if status == tracked.last_status {
                    continue;
                }
                tracked.last_status = status;
                if matches!(status, MaintenanceStatus::Active | MaintenanceStatus::Completed) {
                    changes.push(MaintenanceChange { window: tracked.window.clone(), status });
                }
            }
        }

        changes.sort_by_key(|c| c.window.start_time);
        for change in &changes {
            let event = match change.status {
                MaintenanceStatus::Active => {
                    info!(window_id = %change.window.id, "maintenance started");
                    MonitorEvent::MaintenanceStarted(change.window.clone())
                }
                _ => {
                    info!(window_id = %change.window.id, "maintenance completed");
                    MonitorEvent::MaintenanceCompleted(change.window.clone())
                }
            };
            self.events.publish(event);
        }
        changes
    }
}

fn covers(window: &MaintenanceWindow, monitor: &Monitor) -> bool {
    window.monitor_ids.contains(&monitor.id) || monitor.maintenance_window_ids.contains(&window.id)
}
