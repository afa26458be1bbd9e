use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::model::{HeartbeatRecord, Incident, MaintenanceWindow, Monitor};

/// Push events for dashboards
///
/// Delivery is at-least-once: subscribers must tolerate duplicates, gaps
/// (`RecvError::Lagged`) and out-of-order events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    Heartbeat(HeartbeatRecord),
    MonitorCreated(Monitor),
    MonitorUpdated(Monitor),
    MonitorDeleted { id: Uuid },
    MaintenanceScheduled(MaintenanceWindow),
    MaintenanceStarted(MaintenanceWindow),
    MaintenanceCompleted(MaintenanceWindow),
    IncidentOpened(Incident),
    IncidentUpdated(Incident),
    IncidentResolved(Incident),
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Heartbeat(_) => "heartbeat",
            MonitorEvent::MonitorCreated(_) => "monitor_created",
            MonitorEvent::MonitorUpdated(_) => "monitor_updated",
            MonitorEvent::MonitorDeleted { .. } => "monitor_deleted",
            MonitorEvent::MaintenanceScheduled(_) => "maintenance_scheduled",
            MonitorEvent::MaintenanceStarted(_) => "maintenance_started",
            MonitorEvent::MaintenanceCompleted(_) => "maintenance_completed",
            MonitorEvent::IncidentOpened(_) => "incident_opened",
            MonitorEvent::IncidentUpdated(_) => "incident_updated",
            MonitorEvent::IncidentResolved(_) => "incident_resolved",
        }
    }
}

/// Broadcast bus shared by the orchestrator and its consumers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MonitorEvent) {
        trace!(kind = event.name(), "event bus: publishing");
        // Ignore errors if there are no receivers
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
