//! Incident engine.
//!
//! Turns monitor state changes and ticket signals into incidents, at most one
//! unresolved incident per monitor (or per ticket). Every read-modify-write
//! on an incident happens under the async mutex of its dedup key, so two
//! failing heartbeats racing for the same monitor cannot both create one.

use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StorageError;
use crate::events::{EventBus, MonitorEvent};
use crate::model::{HeartbeatRecord, Incident, IncidentStatus, Monitor, Severity, TimelineKind};
use crate::storage::{Filter, Repository, Storage};

#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("Incident {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: IncidentStatus, to: IncidentStatus },

    #[error("Incident {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("Incident {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

type Result<T> = std::result::Result<T, IncidentError>;

/// Result of a down signal
#[derive(Debug, Clone)]
pub enum IncidentOutcome {
    Created(Incident),
    /// Deduplicated into the incident already open for the same key
    Updated(Incident),
}

impl IncidentOutcome {
    pub fn incident(&self) -> &Incident {
        match self {
            IncidentOutcome::Created(incident) | IncidentOutcome::Updated(incident) => incident,
        }
    }

    pub fn into_incident(self) -> Incident {
        match self {
            IncidentOutcome::Created(incident) | IncidentOutcome::Updated(incident) => incident,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, IncidentOutcome::Created(_))
    }
}

/// Result of a monitor recovering while an incident is open
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    Resolved(Incident),
    /// Escalated incidents stay open until a human resolves them
    PinnedOpen(Incident),
}

/// Incident raised from a ticket rather than a monitor
#[derive(Debug, Clone)]
pub struct TicketSignal {
    pub ticket_id: String,
    pub severity: Severity,
    pub summary: String,
    pub description: String,
}

/// Query for [`IncidentEngine::list`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub monitor_id: Option<Uuid>,
    /// Only unresolved incidents
    #[serde(default)]
    pub active: bool,
}

impl IncidentFilter {
    fn to_storage_filter(&self) -> Filter {
        let mut filter = Filter::all();
        if let Some(status) = self.status {
            filter = filter.eq("status", status.to_string());
        }
        if let Some(severity) = self.severity {
            filter = filter.eq("severity", severity.to_string());
        }
        if let Some(monitor_id) = self.monitor_id {
            filter = filter.eq("monitor_id", monitor_id.to_string());
        }
        if self.active {
            filter = filter.ne("status", IncidentStatus::Resolved.to_string());
        }
        filter
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Monitor(Uuid),
    Ticket(String),
    Standalone(Uuid),
}

impl DedupKey {
    fn of(incident: &Incident) -> Self {
        match (&incident.monitor_id, &incident.ticket_id) {
            (Some(monitor_id), _) => DedupKey::Monitor(*monitor_id),
            (None, Some(ticket_id)) => DedupKey::Ticket(ticket_id.clone()),
            (None, None) => DedupKey::Standalone(incident.id),
        }
    }
}

pub struct IncidentEngine {
    incidents: Repository<Incident>,
    events: EventBus,
    locks: DashMap<DedupKey, Arc<Mutex<()>>>,
}

impl IncidentEngine {
    pub fn new(storage: Arc<dyn Storage>, events: EventBus) -> Self {
        Self { incidents: Repository::new(storage), events, locks: DashMap::new() }
    }

    fn lock_for(&self, key: DedupKey) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(key).or_default().value())
    }

    async fn find_active(&self, filter: Filter) -> Result<Option<Incident>> {
        let filter = filter.ne("status", IncidentStatus::Resolved.to_string());
        let mut found = self.incidents.find(&filter).await?;
        // Oldest first if an earlier crash ever left two behind
        found.sort_by_key(|incident| incident.created_at);
        Ok(found.into_iter().next())
    }

    /// Unresolved incident for a monitor
    pub async fn active_for_monitor(&self, monitor_id: Uuid) -> Result<Option<Incident>> {
        self.find_active(Filter::all().eq("monitor_id", monitor_id.to_string())).await
    }

    /// Unresolved incident for a ticket
    pub async fn active_for_ticket(&self, ticket_id: &str) -> Result<Option<Incident>> {
        self.find_active(Filter::all().eq("ticket_id", ticket_id)).await
    }

    /// Open an incident for a monitor that went down, or fold the signal into the open one
    pub async fn on_monitor_down(&self, monitor: &Monitor, beat: &HeartbeatRecord) -> Result<IncidentOutcome> {
        let lock = self.lock_for(DedupKey::Monitor(monitor.id));
        let _guard = lock.lock().await;

        let detail = beat.message.clone().unwrap_or_else(|| "check failed".to_string());
        if let Some(mut incident) = self.active_for_monitor(monitor.id).await? {
            incident.push_timeline(TimelineKind::Signal, format!("still down: {detail}"));
            self.incidents.save(&incident).await?;
            debug!(incident_id = %incident.id, monitor_id = %monitor.id, "down signal deduplicated");
            self.events.publish(MonitorEvent::IncidentUpdated(incident.clone()));
            return Ok(IncidentOutcome::Updated(incident));
        }

        let mut incident = Incident::new(monitor.incident_severity(), format!("{} is down", monitor.name));
        incident.monitor_id = Some(monitor.id);
        incident.description = format!("{}: {}", monitor.target.describe(), detail);
        self.incidents.save(&incident).await?;

        info!(
            incident_id = %incident.id,
            monitor_id = %monitor.id,
            severity = %incident.severity,
            "incident opened"
        );
        self.events.publish(MonitorEvent::IncidentOpened(incident.clone()));
        Ok(IncidentOutcome::Created(incident))
    }

    /// Resolve the monitor's open incident unless it has been escalated
    pub async fn on_monitor_up(&self, monitor: &Monitor, beat: &HeartbeatRecord) -> Result<Option<RecoveryOutcome>> {
        let lock = self.lock_for(DedupKey::Monitor(monitor.id));
        let _guard = lock.lock().await;

        let Some(mut incident) = self.active_for_monitor(monitor.id).await? else {
            return Ok(None);
        };

        let latency = beat.latency_ms.map(|ms| format!(" ({ms} ms)")).unwrap_or_default();
        if incident.escalated {
            incident.push_timeline(
                TimelineKind::Recovered,
                format!("monitor recovered{latency}, awaiting confirmation"),
            );
            self.incidents.save(&incident).await?;
            info!(incident_id = %incident.id, "monitor recovered, escalated incident stays open");
            self.events.publish(MonitorEvent::IncidentUpdated(incident.clone()));
            return Ok(Some(RecoveryOutcome::PinnedOpen(incident)));
        }

        incident.push_timeline(TimelineKind::Recovered, format!("monitor recovered{latency}"));
        close(&mut incident);
        self.incidents.save(&incident).await?;
        info!(incident_id = %incident.id, monitor_id = %monitor.id, "incident auto-resolved");
        self.events.publish(MonitorEvent::IncidentResolved(incident.clone()));
        Ok(Some(RecoveryOutcome::Resolved(incident)))
    }

    /// Open an incident from a ticket, deduplicated per ticket id
    pub async fn open_from_signal(&self, signal: TicketSignal) -> Result<IncidentOutcome> {
        let lock = self.lock_for(DedupKey::Ticket(signal.ticket_id.clone()));
        let _guard = lock.lock().await;

        if let Some(mut incident) = self.active_for_ticket(&signal.ticket_id).await? {
            incident.push_timeline(TimelineKind::Signal, signal.summary);
            self.incidents.save(&incident).await?;
            self.events.publish(MonitorEvent::IncidentUpdated(incident.clone()));
            return Ok(IncidentOutcome::Updated(incident));
        }

        let mut incident = Incident::new(signal.severity, signal.summary);
        incident.ticket_id = Some(signal.ticket_id);
        incident.description = signal.description;
        incident.alert_id = Some(Uuid::new_v4());
        self.incidents.save(&incident).await?;
        info!(incident_id = %incident.id, ticket_id = ?incident.ticket_id, "incident opened from ticket");
        self.events.publish(MonitorEvent::IncidentOpened(incident.clone()));
        Ok(IncidentOutcome::Created(incident))
    }

    /// Load, lock by dedup key, reload and apply `change`
    async fn modify<F>(&self, id: Uuid, change: F) -> Result<Incident>
    where
        F: FnOnce(&mut Incident) -> Result<()>,
    {
        let current = self.get(id).await?;
        let lock = self.lock_for(DedupKey::of(&current));
        let _guard = lock.lock().await;

        let mut incident = self.get(id).await?;
        let was_active = incident.is_active();
        change(&mut incident)?;
        self.incidents.save(&incident).await?;

        let event = if was_active && !incident.is_active() {
            MonitorEvent::IncidentResolved(incident.clone())
        } else {
            MonitorEvent::IncidentUpdated(incident.clone())
        };
        self.events.publish(event);
        Ok(incident)
    }

    async fn transition(&self, id: Uuid, next: IncidentStatus) -> Result<Incident> {
        let incident = self
            .modify(id, |incident| {
                if !incident.status.can_transition_to(next) {
                    return Err(IncidentError::InvalidTransition { id, from: incident.status, to: next });
                }
                let from = incident.status;
                incident.push_timeline(TimelineKind::StatusChange, format!("{from} -> {next}"));
                if next.is_resolved() {
                    close(incident);
                } else {
                    incident.status = next;
                }
                Ok(())
            })
            .await?;
        info!(incident_id = %id, status = %next, "incident status changed");
        Ok(incident)
    }

    pub async fn acknowledge(&self, id: Uuid) -> Result<Incident> {
        self.transition(id, IncidentStatus::Acknowledged).await
    }

    pub async fn investigate(&self, id: Uuid) -> Result<Incident> {
        self.transition(id, IncidentStatus::Investigating).await
    }

    pub async fn resolve(&self, id: Uuid) -> Result<Incident> {
        self.transition(id, IncidentStatus::Resolved).await
    }

    /// Escalate to a responder or team; pins the incident open across recoveries
    pub async fn escalate(&self, id: Uuid, to: impl Into<String>) -> Result<Incident> {
        let to = to.into();
        let incident = self
            .modify(id, |incident| {
                if !incident.is_active() {
                    return Err(IncidentError::AlreadyResolved(id));
                }
                incident.escalated = true;
                incident.escalated_to = Some(to.clone());
                incident.push_timeline(TimelineKind::Escalated, format!("escalated to {to}"));
                Ok(())
            })
            .await?;
        info!(incident_id = %id, to = %to, "incident escalated");
        Ok(incident)
    }

    pub async fn set_severity(&self, id: Uuid, severity: Severity) -> Result<Incident> {
        self.modify(id, |incident| {
            if !incident.is_active() {
                return Err(IncidentError::AlreadyResolved(id));
            }
            if incident.severity != severity {
                let from = incident.severity;
                incident.severity = severity;
                incident.push_timeline(TimelineKind::Note, format!("severity {from} -> {severity}"));
            }
            Ok(())
        })
        .await
    }

    pub async fn add_note(&self, id: Uuid, note: impl Into<String>) -> Result<Incident> {
        let note = note.into();
        self.modify(id, |incident| {
            incident.push_timeline(TimelineKind::Note, note);
            Ok(())
        })
        .await
    }

    /// Flag that no provider could deliver an alert for this incident
    ///
    /// Resolved incidents are returned unchanged.
    pub async fn mark_notification_degraded(&self, id: Uuid, detail: impl Into<String>) -> Result<Incident> {
        let current = self.get(id).await?;
        if !current.is_active() {
            debug!(incident_id = %id, "incident already resolved, not flagging notification failure");
            return Ok(current);
        }
        let detail = detail.into();
        self.modify(id, |incident| {
            if !incident.is_active() {
                return Ok(());
            }
            incident.notification_degraded = true;
            incident.push_timeline(TimelineKind::NotificationFailed, detail);
            Ok(())
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Incident> {
        self.incidents.get(id).await?.ok_or(IncidentError::NotFound(id))
    }

    /// Unresolved incidents, most severe first
    pub async fn active(&self) -> Result<Vec<Incident>> {
        let mut incidents = self.list(&IncidentFilter { active: true, ..Default::default() }).await?;
        incidents.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.created_at.cmp(&b.created_at)));
        Ok(incidents)
    }

    /// Incidents matching the filter, newest first
    pub async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let mut incidents = self.incidents.find(&filter.to_storage_filter()).await?;
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(incidents)
    }
}

fn close(incident: &mut Incident) {
    incident.status = IncidentStatus::Resolved;
    incident.resolved_at = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MonitorTarget;
    use crate::storage::MemoryStorage;

    fn engine() -> IncidentEngine {
        IncidentEngine::new(Arc::new(MemoryStorage::new()), EventBus::default())
    }

    fn monitor() -> Monitor {
        Monitor::new("checkout", MonitorTarget::http("https://shop.example.com"))
    }

    fn down(monitor: &Monitor) -> HeartbeatRecord {
        HeartbeatRecord::new(monitor.id).failure("503 Service Unavailable")
    }

    fn up(monitor: &Monitor) -> HeartbeatRecord {
        HeartbeatRecord::new(monitor.id).success(42, Some(200))
    }

    #[tokio::test]
    async fn down_signals_deduplicate_per_monitor() {
        let engine = engine();
        let monitor = monitor();

        let first = engine.on_monitor_down(&monitor, &down(&monitor)).await.unwrap();
        assert!(first.is_created());
        assert_eq!(first.incident().severity, Severity::Medium);
        assert_eq!(first.incident().monitor_id, Some(monitor.id));

        let second = engine.on_monitor_down(&monitor, &down(&monitor)).await.unwrap();
        assert!(!second.is_created());
        assert_eq!(second.incident().id, first.incident().id);
        assert_eq!(engine.active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_down_signals_create_one_incident() {
        let engine = Arc::new(engine());
        let monitor = Arc::new(monitor());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            let monitor = Arc::clone(&monitor);
            handles.push(tokio::spawn(async move {
                engine.on_monitor_down(&monitor, &down(&monitor)).await.unwrap().is_created()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(engine.active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovery_resolves_unless_escalated() {
        let engine = engine();
        let monitor = monitor();

        let opened = engine.on_monitor_down(&monitor, &down(&monitor)).await.unwrap().into_incident();
        match engine.on_monitor_up(&monitor, &up(&monitor)).await.unwrap() {
            Some(RecoveryOutcome::Resolved(incident)) => {
                assert_eq!(incident.id, opened.id);
                assert!(incident.resolved_at.is_some());
            }
            other => panic!("unexpected recovery {other:?}"),
        }
        assert!(engine.on_monitor_up(&monitor, &up(&monitor)).await.unwrap().is_none());

        // A resolved incident is never reopened
        let reopened = engine.on_monitor_down(&monitor, &down(&monitor)).await.unwrap();
        assert!(reopened.is_created());
        assert_ne!(reopened.incident().id, opened.id);

        engine.escalate(reopened.incident().id, "sre-lead").await.unwrap();
        match engine.on_monitor_up(&monitor, &up(&monitor)).await.unwrap() {
            Some(RecoveryOutcome::PinnedOpen(incident)) => {
                assert!(incident.is_active());
                assert_eq!(incident.timeline.last().unwrap().kind, TimelineKind::Recovered);
            }
            other => panic!("unexpected recovery {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_lifecycle_is_forward_only() {
        let engine = engine();
        let monitor = monitor();
        let id = engine.on_monitor_down(&monitor, &down(&monitor)).await.unwrap().incident().id;

        // Skipping ahead is allowed
        let incident = engine.investigate(id).await.unwrap();
        assert_eq!(incident.status, IncidentStatus::Investigating);

        let err = engine.acknowledge(id).await.unwrap_err();
        assert!(matches!(
            err,
            IncidentError::InvalidTransition { from: IncidentStatus::Investigating, to: IncidentStatus::Acknowledged, .. }
        ));

        engine.resolve(id).await.unwrap();
        assert!(engine.resolve(id).await.is_err());
        assert!(matches!(engine.escalate(id, "x").await, Err(IncidentError::AlreadyResolved(_))));
        assert!(matches!(engine.get(Uuid::new_v4()).await, Err(IncidentError::NotFound(_))));
    }

    #[tokio::test]
    async fn ticket_incidents_deduplicate_per_ticket() {
        let engine = engine();
        let signal = |summary: &str| TicketSignal {
            ticket_id: "INC-1001".into(),
            severity: Severity::Critical,
            summary: summary.into(),
            description: String::new(),
        };

        let first = engine.open_from_signal(signal("payments failing")).await.unwrap();
        let second = engine.open_from_signal(signal("payments still failing")).await.unwrap();
        assert!(first.is_created());
        assert_eq!(second.incident().id, first.incident().id);
        assert_eq!(first.incident().monitor_id, None);
    }

    #[tokio::test]
    async fn admin_updates_publish_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let engine = IncidentEngine::new(Arc::new(MemoryStorage::new()), bus);
        let monitor = monitor();

        let id = engine.on_monitor_down(&monitor, &down(&monitor)).await.unwrap().incident().id;
        engine.add_note(id, "rolled back deploy").await.unwrap();
        engine.mark_notification_degraded(id, "all providers failed").await.unwrap();
        engine.resolve(id).await.unwrap();

        let names: Vec<&str> = (0..4).map(|_| rx.try_recv().unwrap().name()).collect();
        assert_eq!(names, vec!["incident_opened", "incident_updated", "incident_updated", "incident_resolved"]);
        assert!(engine.get(id).await.unwrap().notification_degraded);
    }

    #[tokio::test]
    async fn resolved_incidents_are_never_flagged_degraded() {
        let engine = engine();
        let monitor = monitor();

        let id = engine.on_monitor_down(&monitor, &down(&monitor)).await.unwrap().incident().id;
        engine.resolve(id).await.unwrap();
        let incident = engine.mark_notification_degraded(id, "trigger alert not delivered").await.unwrap();

        assert!(!incident.notification_degraded);
        assert!(!engine.get(id).await.unwrap().notification_degraded);
        assert!(incident.timeline.iter().all(|entry| entry.kind != TimelineKind::NotificationFailed));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_monitor() {
        let engine = engine();
        let a = monitor();
        let b = Monitor::new("search", MonitorTarget::http("https://search.example.com"));
        let id_a = engine.on_monitor_down(&a, &down(&a)).await.unwrap().incident().id;
        engine.on_monitor_down(&b, &down(&b)).await.unwrap();
        engine.resolve(id_a).await.unwrap();

        let resolved = engine
            .list(&IncidentFilter { status: Some(IncidentStatus::Resolved), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, id_a);

        let for_b = engine.list(&IncidentFilter { monitor_id: Some(b.id), ..Default::default() }).await.unwrap();
        assert_eq!(for_b.len(), 1);
        assert_eq!(engine.active().await.unwrap().len(), 1);
    }
}
