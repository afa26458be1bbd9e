mod common;

use chrono::{Duration, Utc};
use common::{down, harness, monitor, recorder, up};
use uppe_core::model::{AlertKind, IncidentStatus, MaintenanceWindow};
use uppe_core::orchestrator::{IncidentChange, MonitorRemoval};
use uppe_core::status::MonitorState;

#[tokio::test]
async fn retried_failures_open_exactly_one_incident() {
    let h = harness().await;
    let api = monitor("api");

    for retrying in [true, true] {
        let (outcome, delivery) = h.orchestrator.process_report(down(&api, retrying)).await.unwrap();
        assert!(!outcome.transition.changed());
        assert!(outcome.incident.is_none());
        assert!(delivery.is_none());
    }

    let (outcome, delivery) = h.orchestrator.process_report(down(&api, false)).await.unwrap();
    assert_eq!(outcome.transition.current, MonitorState::Down);
    let Some(IncidentChange::Opened(incident)) = outcome.incident else {
        panic!("expected a new incident, got {:?}", outcome.incident);
    };
    assert!(delivery.unwrap().delivered());

    // Still down: no second incident, no second page
    let (outcome, _) = h.orchestrator.process_report(down(&api, false)).await.unwrap();
    assert!(outcome.incident.is_none());

    let active = h.orchestrator.active_incidents().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, incident.id);
    assert_eq!(active[0].monitor_id, Some(api.id));

    let alerts = h.outbox.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Trigger);
    assert_eq!(alerts[0].incident_id, Some(incident.id));
}

#[tokio::test]
async fn recovery_resolves_and_sends_recovery_alert() {
    let h = harness().await;
    let api = monitor("api");

    h.orchestrator.process_report(down(&api, false)).await.unwrap();
    let (outcome, delivery) = h.orchestrator.process_report(up(&api)).await.unwrap();

    let Some(IncidentChange::Resolved(incident)) = outcome.incident else {
        panic!("expected resolution, got {:?}", outcome.incident);
    };
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert!(incident.resolved_at.is_some());
    assert!(delivery.unwrap().delivered());

    let kinds: Vec<AlertKind> = h.outbox.alerts().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AlertKind::Trigger, AlertKind::Resolved]);
    assert!(h.orchestrator.active_incidents().await.unwrap().is_empty());
}

#[tokio::test]
async fn escalated_incident_survives_recovery() {
    let h = harness().await;
    let api = monitor("api");

    let (outcome, _) = h.orchestrator.process_report(down(&api, false)).await.unwrap();
    let Some(IncidentChange::Opened(incident)) = outcome.incident else {
        panic!("expected a new incident");
    };
    h.orchestrator.escalate_incident(incident.id, "sre-lead").await.unwrap();

    let (outcome, delivery) = h.orchestrator.process_report(up(&api)).await.unwrap();
    assert!(matches!(outcome.incident, Some(IncidentChange::PinnedOpen(_))));
    assert!(delivery.is_none());

    let stored = h.orchestrator.incident(incident.id).await.unwrap();
    assert!(stored.is_active());
    assert_eq!(stored.escalated_to.as_deref(), Some("sre-lead"));

    // Only an explicit resolve closes it
    let resolved = h.orchestrator.resolve_incident(incident.id).await.unwrap();
    assert_eq!(resolved.status, IncidentStatus::Resolved);
}

#[tokio::test]
async fn resolved_incident_is_never_reopened() {
    let h = harness().await;
    let api = monitor("api");

    let (first, _) = h.orchestrator.process_report(down(&api, false)).await.unwrap();
    h.orchestrator.process_report(up(&api)).await.unwrap();
    let (second, _) = h.orchestrator.process_report(down(&api, false)).await.unwrap();

    let (Some(IncidentChange::Opened(a)), Some(IncidentChange::Opened(b))) = (first.incident, second.incident) else {
        panic!("each outage should open its own incident");
    };
    assert_ne!(a.id, b.id);
    assert_eq!(h.orchestrator.incident(a.id).await.unwrap().status, IncidentStatus::Resolved);
    assert!(h.orchestrator.acknowledge_incident(a.id).await.is_err());
}

#[tokio::test]
async fn maintenance_suppresses_incidents_until_cancelled() {
    let h = harness().await;
    let api = h.orchestrator.create_monitor(monitor("api")).await.unwrap();

    let now = Utc::now();
    let window = h
        .orchestrator
        .schedule_maintenance(MaintenanceWindow::new("db upgrade", now - Duration::hours(1), now + Duration::hours(1), vec![api.id]))
        .await
        .unwrap();

    let (outcome, delivery) = h.orchestrator.process_report(down(&api, false)).await.unwrap();
    assert_eq!(outcome.transition.current, MonitorState::Maintenance);
    assert!(outcome.incident.is_none());
    assert!(delivery.is_none());
    assert_eq!(h.orchestrator.monitor_state(api.id).await.unwrap().state, MonitorState::Maintenance);
    assert!(h.orchestrator.active_incidents().await.unwrap().is_empty());

    h.orchestrator.cancel_maintenance(window.id).await.unwrap();
    let (outcome, _) = h.orchestrator.process_report(down(&api, false)).await.unwrap();
    assert_eq!(outcome.transition.current, MonitorState::Down);
    assert!(matches!(outcome.incident, Some(IncidentChange::Opened(_))));
}

#[tokio::test]
async fn total_delivery_failure_flags_the_incident() {
    let h = harness().await;
    let broken = recorder("broken", true);
    h.orchestrator.save_provider(&broken).await.unwrap();
    let api = monitor("api").with_providers(vec![broken.id]);

    let (outcome, delivery) = h.orchestrator.process_report(down(&api, false)).await.unwrap();
    let delivery = delivery.unwrap();
    assert!(delivery.all_failed());
    assert_eq!(delivery.outcomes[0].attempts, 3);

    let Some(IncidentChange::Opened(incident)) = outcome.incident else {
        panic!("expected a new incident");
    };
    let stored = h.orchestrator.incident(incident.id).await.unwrap();
    assert!(stored.notification_degraded);
    assert!(stored.is_active());
}

#[tokio::test]
async fn deleting_a_monitor_with_history_pauses_it() {
    let h = harness().await;
    let api = h.orchestrator.create_monitor(monitor("api")).await.unwrap();
    let idle = h.orchestrator.create_monitor(monitor("idle")).await.unwrap();

    h.orchestrator.process_report(down(&api, false)).await.unwrap();

    assert_eq!(h.orchestrator.delete_monitor(api.id).await.unwrap(), MonitorRemoval::Paused);
    assert!(h.orchestrator.monitor(api.id).await.unwrap().paused);

    assert_eq!(h.orchestrator.delete_monitor(idle.id).await.unwrap(), MonitorRemoval::Deleted);
    assert!(h.orchestrator.monitor(idle.id).await.is_err());
}

#[tokio::test]
async fn invalid_monitors_are_rejected() {
    let h = harness().await;
    let too_fast = monitor("api").with_interval(1, 1);
    assert!(h.orchestrator.create_monitor(too_fast).await.is_err());
    assert!(h.orchestrator.monitors().await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_a_tag_detaches_it_from_monitors() {
    let h = harness().await;
    let tag = uppe_core::model::Tag::new("payments");
    h.orchestrator.save_tag(&tag).await.unwrap();

    let mut tagged = monitor("checkout");
    tagged.tags = vec![tag.id];
    let tagged = h.orchestrator.create_monitor(tagged).await.unwrap();
    h.orchestrator.create_monitor(monitor("blog")).await.unwrap();

    let found = h.orchestrator.monitors_tagged(tag.id).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, tagged.id);

    assert!(h.orchestrator.delete_tag(tag.id).await.unwrap());
    assert!(h.orchestrator.monitors_tagged(tag.id).await.unwrap().is_empty());
    assert!(h.orchestrator.monitor(tagged.id).await.unwrap().tags.is_empty());
    assert!(h.orchestrator.tags().await.unwrap().is_empty());
}
