//! Orchestrator - wires every component together.
//!
//! The orchestrator owns the scheduler and consumes its check reports:
//! each heartbeat is recorded, the resulting state transition is gated by
//! maintenance windows, turned into incident changes and finally into
//! alerts for the notification dispatcher. It also exposes the query and
//! administrative operations used by the binaries.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::config::Config;
use crate::error::CoreError;
use crate::events::{EventBus, MonitorEvent};
use crate::incident::{IncidentEngine, IncidentFilter, IncidentOutcome, RecoveryOutcome, TicketSignal};
use crate::maintenance::MaintenanceRegistry;
use crate::model::{
    AlertKind, AlertMessage, AlertWorkflowRule, HeartbeatRecord, Incident, MaintenanceWindow, Monitor,
    NotificationProvider, NotifyTarget, OnCallSchedule, ProviderTestResult, Recommendation, ScheduleOverride, Tag,
    Ticket,
};
use crate::monitoring::{CheckReport, CheckerRegistry, MonitoringExecutor, MonitoringScheduler, validate_monitor};
use crate::notify::{DispatchReport, Dispatcher, SenderRegistry};
use crate::oncall::{Handoff, OnCallResolution, OnCallService};
use crate::status::{HeartbeatStore, MonitorState, MonitorStateView, RetentionCleanup, StateTransition, UptimeWindows};
use crate::storage::{Filter, MemoryStorage, Record, Repository, ResilientStorage, Storage};
use crate::workflow::{
    ExecutionMode, LoggingTicketGateway, PendingRecommendation, PlannedAction, RecommendationQueue, TicketGateway,
    WorkflowAction, WorkflowEvaluator, recommended_action, rule_actions,
};

const FLUSH_INTERVAL: Duration = Duration::from_secs(30);
const LEDGER_PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// What a check report changed
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "change", content = "incident", rename_all = "snake_case")]
pub enum IncidentChange {
    Opened(Incident),
    Updated(Incident),
    Resolved(Incident),
    /// Monitor recovered but the incident is escalated
    PinnedOpen(Incident),
}

/// An alert ready to be handed to the dispatcher
#[derive(Debug, Clone)]
pub struct OutgoingAlert {
    pub message: AlertMessage,
    /// Empty means the default providers
    pub provider_ids: Vec<Uuid>,
    pub token: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub monitor_id: Uuid,
    pub transition: StateTransition,
    pub incident: Option<IncidentChange>,
    pub alert: Option<OutgoingAlert>,
}

/// Result of deleting a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorRemoval {
    Deleted,
    /// Incidents still reference the monitor, so it was paused instead
    Paused,
}

/// One workflow action as applied by the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct AppliedAction {
    pub rule_id: Option<Uuid>,
    pub action: WorkflowAction,
    pub success: bool,
    pub detail: String,
}

/// A stored definition that would be rejected today
#[derive(Debug, Clone, Serialize)]
pub struct InvalidDefinition {
    pub kind: &'static str,
    pub id: Uuid,
    pub name: String,
    pub reason: String,
}

/// Stored definitions as seen by `check-config`
#[derive(Debug, Clone, Default, Serialize)]
pub struct DefinitionReport {
    pub monitors: usize,
    pub providers: usize,
    pub rules: usize,
    pub invalid: Vec<InvalidDefinition>,
}

pub struct OrchestratorBuilder {
    config: Config,
    storage: Option<Arc<dyn Storage>>,
    checkers: Option<CheckerRegistry>,
    senders: Option<SenderRegistry>,
    gateway: Option<Arc<dyn TicketGateway>>,
    events: Option<EventBus>,
}

impl OrchestratorBuilder {
    pub fn new(config: Config) -> Self {
        Self { config, storage: None, checkers: None, senders: None, gateway: None, events: None }
    }

    /// Durable store; wrapped so the orchestrator keeps running while it is down
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn checkers(mut self, checkers: CheckerRegistry) -> Self {
        self.checkers = Some(checkers);
        self
    }

    pub fn senders(mut self, senders: SenderRegistry) -> Self {
        self.senders = Some(senders);
        self
    }

    pub fn ticket_gateway(mut self, gateway: Arc<dyn TicketGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        let durable = self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let resilient = Arc::new(ResilientStorage::new(durable));
        let storage: Arc<dyn Storage> = resilient.clone();
        let events = self.events.unwrap_or_default();

        let senders = match self.senders {
            Some(senders) => senders,
            None => SenderRegistry::with_builtins()?,
        };
        let executor = Arc::new(MonitoringExecutor::new(self.checkers.unwrap_or_else(CheckerRegistry::with_defaults)));
        let (report_tx, report_rx) = mpsc::channel(config.scheduler.result_buffer.max(1));
        let scheduler = MonitoringScheduler::new(executor, report_tx, config.scheduler.clone());

        let inner = Inner {
            monitors: Repository::new(Arc::clone(&storage)),
            rules: Repository::new(Arc::clone(&storage)),
            tags: Repository::new(Arc::clone(&storage)),
            heartbeats: HeartbeatStore::new(Arc::clone(&storage)),
            incidents: IncidentEngine::new(Arc::clone(&storage), events.clone()),
            maintenance: MaintenanceRegistry::new(Arc::clone(&storage), events.clone()),
            workflow: WorkflowEvaluator::new(Duration::from_secs(config.workflow.idempotency_window_secs)),
            recommendations: RecommendationQueue::new(config.recommendation.clone()),
            oncall: OnCallService::new(Arc::clone(&storage), config.oncall.horizon_days),
            dispatcher: Dispatcher::new(Arc::clone(&storage), Arc::new(senders), config.dispatch.clone()),
            gateway: self.gateway.unwrap_or_else(|| Arc::new(LoggingTicketGateway)),
            scheduler,
            report_rx: Mutex::new(Some(report_rx)),
            trigger_tokens: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            resilient,
            storage,
            events,
            config,
        };
        Ok(Orchestrator { inner: Arc::new(inner) })
    }
}

struct Inner {
    config: Config,
    storage: Arc<dyn Storage>,
    resilient: Arc<ResilientStorage>,
    monitors: Repository<Monitor>,
    rules: Repository<AlertWorkflowRule>,
    tags: Repository<Tag>,
    scheduler: MonitoringScheduler,
    report_rx: Mutex<Option<mpsc::Receiver<CheckReport>>>,
    heartbeats: HeartbeatStore,
    incidents: IncidentEngine,
    maintenance: MaintenanceRegistry,
    workflow: WorkflowEvaluator,
    recommendations: RecommendationQueue,
    oncall: OnCallService,
    dispatcher: Dispatcher,
    gateway: Arc<dyn TicketGateway>,
    events: EventBus,
    /// Dispatch tokens of trigger alerts, by incident
    trigger_tokens: DashMap<Uuid, CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Main orchestrator, cheap to clone
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    /// Load state from storage, schedule monitors and start background tasks
    pub async fn start(&self) -> Result<()> {
        let Some(mut report_rx) = self.inner.report_rx.lock().await.take() else {
            warn!("Orchestrator already started");
            return Ok(());
        };
        let now = Utc::now();

        let windows = self.inner.maintenance.load(now).await?;
        let rules = self.inner.rules.list().await?;
        info!(windows, rules = rules.len(), "Loaded maintenance windows and workflow rules");
        self.inner.workflow.set_rules(rules).await;

        let monitors = self.inner.monitors.list().await?;
        info!("Found {} monitors", monitors.len());
        for monitor in monitors {
            let under_maintenance = self.inner.maintenance.is_under_maintenance(&monitor, now).await;
            if let Err(e) = self.inner.heartbeats.load(monitor.id, under_maintenance).await {
                warn!(monitor_id = %monitor.id, "Failed to load heartbeat history: {}", e);
            }
            if let Err(e) = validate_monitor(&monitor) {
                warn!(monitor_id = %monitor.id, "Not scheduling invalid monitor: {}", e);
                continue;
            }
            self.inner.scheduler.schedule(monitor);
        }

        let mut tasks = self.inner.tasks.lock().await;

        let this = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let report = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    report = report_rx.recv() => match report {
                        Some(report) => report,
                        None => break,
                    },
                };
                match this.handle_report(report).await {
                    Ok(outcome) => {
                        if let Some(alert) = outcome.alert {
                            let this = this.clone();
                            tokio::spawn(async move {
                                if let Err(e) = this.deliver(alert).await {
                                    error!("Alert delivery failed: {}", e);
                                }
                            });
                        }
                    }
                    Err(e) => error!("Failed to process check report: {}", e),
                }
            }
            debug!("Report loop stopped");
        }));

        let this = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let every = Duration::from_secs(self.inner.config.scheduler.maintenance_tick_secs.max(1));
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let changes = this.inner.maintenance.tick(Utc::now()).await;
                if !changes.is_empty() {
                    debug!(changes = changes.len(), "Maintenance windows changed status");
                }
            }
        }));

        let retention = RetentionCleanup::new(Arc::clone(&self.inner.storage), self.inner.config.retention.clone());
        tasks.push(retention.start_periodic_cleanup(self.inner.shutdown.child_token()));

        let resilient = Arc::clone(&self.inner.resilient);
        let shutdown = self.inner.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !resilient.is_degraded() {
                    continue;
                }
                match resilient.flush().await {
                    Ok(flushed) => info!(flushed, "Replayed unpersisted writes"),
                    Err(e) => warn!("Storage still unavailable: {}", e),
                }
            }
        }));

        let this = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(LEDGER_PURGE_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let purged = this.inner.workflow.purge_expired(Utc::now());
                if purged > 0 {
                    debug!(purged, "Purged expired workflow executions");
                }
            }
        }));

        info!(
            scheduled = self.inner.scheduler.scheduled_count(),
            concurrency = self.inner.scheduler.concurrency_limit(),
            "Orchestrator started"
        );
        Ok(())
    }

    /// Stop scheduling, cancel pending work and wait for background tasks
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.inner.scheduler.shutdown();
        self.inner.recommendations.shutdown();
        self.inner.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        if self.inner.resilient.is_degraded() {
            match self.inner.resilient.flush().await {
                Ok(flushed) => info!(flushed, "Flushed unpersisted writes"),
                Err(e) => error!(
                    unpersisted = self.inner.resilient.unpersisted_count().await,
                    "Writes lost on shutdown: {}", e
                ),
            }
        }
    }

    /// Record a heartbeat and act on the state change it causes
    ///
    /// The returned alert, if any, still has to be delivered.
    pub async fn handle_report(&self, report: CheckReport) -> Result<TransitionOutcome> {
        let CheckReport { monitor, heartbeat } = report;
        let now = Utc::now();

        let under_maintenance = self.inner.maintenance.is_under_maintenance(&monitor, now).await;
        let transition = self.inner.heartbeats.record(&heartbeat, under_maintenance).await;
        self.inner.events.publish(MonitorEvent::Heartbeat(heartbeat.clone()));

        let mut outcome = TransitionOutcome { monitor_id: monitor.id, transition, incident: None, alert: None };
        if !transition.changed() {
            return Ok(outcome);
        }
        info!(
            monitor_id = %monitor.id,
            from = %transition.previous,
            to = %transition.current,
            "Monitor state changed"
        );

        match transition.current {
            MonitorState::Down => {
                outcome.incident = Some(match self.inner.incidents.on_monitor_down(&monitor, &heartbeat).await? {
                    IncidentOutcome::Created(incident) => {
                        let detail = heartbeat.message.clone().unwrap_or_else(|| "check failed".to_string());
                        let incident = self.apply_incident_rules(&monitor, incident, &detail).await?;

                        let mut message =
                            AlertMessage::new(AlertKind::Trigger, incident.severity, incident.summary.clone(), detail);
                        message.monitor_id = Some(monitor.id);
                        message.incident_id = Some(incident.id);
                        message.recipients = self.monitor_recipients(&monitor, now).await;

                        let token = self.inner.shutdown.child_token();
                        self.inner.trigger_tokens.insert(incident.id, token.clone());
                        outcome.alert = Some(OutgoingAlert {
                            message,
                            provider_ids: monitor.notification_provider_ids.clone(),
                            token,
                        });
                        IncidentChange::Opened(incident)
                    }
                    IncidentOutcome::Updated(incident) => IncidentChange::Updated(incident),
                });
            }
            MonitorState::Up => match self.inner.incidents.on_monitor_up(&monitor, &heartbeat).await? {
                Some(RecoveryOutcome::Resolved(incident)) => {
                    self.cancel_trigger(incident.id);
                    let mut message = AlertMessage::new(
                        AlertKind::Resolved,
                        incident.severity,
                        format!("{} is up", monitor.name),
                        recovery_body(&incident, &heartbeat),
                    );
                    message.monitor_id = Some(monitor.id);
                    message.incident_id = Some(incident.id);
                    outcome.alert = Some(OutgoingAlert {
                        message,
                        provider_ids: monitor.notification_provider_ids.clone(),
                        token: self.inner.shutdown.child_token(),
                    });
                    outcome.incident = Some(IncidentChange::Resolved(incident));
                }
                Some(RecoveryOutcome::PinnedOpen(incident)) => {
                    outcome.incident = Some(IncidentChange::PinnedOpen(incident));
                }
                None => {}
            },
            MonitorState::Pending | MonitorState::Maintenance => {}
        }
        Ok(outcome)
    }

    /// Dispatch an alert, flagging its incident when no provider took it
    pub async fn deliver(&self, alert: OutgoingAlert) -> Result<DispatchReport> {
        let OutgoingAlert { message, provider_ids, token } = alert;
        let result = self.inner.dispatcher.dispatch(&message, &provider_ids, token).await;

        if let (AlertKind::Trigger, Some(incident_id)) = (message.kind, message.incident_id) {
            self.inner.trigger_tokens.remove(&incident_id);
        }
        let report = result?;

        if let (true, Some(incident_id)) = (report.all_failed(), message.incident_id) {
            let detail = format!(
                "{} alert not delivered: {}",
                message.kind,
                report
                    .failures()
                    .map(|o| format!("{} ({})", o.provider_name, o.error.as_deref().unwrap_or("failed")))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.inner.incidents.mark_notification_degraded(incident_id, detail).await?;
        }
        Ok(report)
    }

    /// Handle a report and deliver its alert before returning
    pub async fn process_report(&self, report: CheckReport) -> Result<(TransitionOutcome, Option<DispatchReport>)> {
        let mut outcome = self.handle_report(report).await?;
        let delivery = match outcome.alert.take() {
            Some(alert) => Some(self.deliver(alert).await?),
            None => None,
        };
        Ok((outcome, delivery))
    }

    fn cancel_trigger(&self, incident_id: Uuid) {
        if let Some((_, token)) = self.inner.trigger_tokens.remove(&incident_id) {
            token.cancel();
            debug!(incident_id = %incident_id, "Cancelled pending trigger alert");
        }
    }

    async fn monitor_recipients(&self, monitor: &Monitor, at: DateTime<Utc>) -> Vec<String> {
        let Some(schedule_id) = monitor.oncall_schedule_id else {
            return Vec::new();
        };
        self.schedule_recipients(schedule_id, at).await
    }

    async fn schedule_recipients(&self, schedule_id: Uuid, at: DateTime<Utc>) -> Vec<String> {
        match self.inner.oncall.on_call(schedule_id, at, &[]).await {
            Ok(resolution) => match resolution.primary {
                Some(primary) => vec![primary],
                None => resolution.backups,
            },
            Err(e) => {
                warn!(schedule_id = %schedule_id, "Cannot resolve on-call responder: {}", e);
                Vec::new()
            }
        }
    }

    // Monitors

    pub async fn create_monitor(&self, mut monitor: Monitor) -> Result<Monitor> {
        validate_monitor(&monitor)?;
        let now = Utc::now();
        monitor.created_at = now;
        monitor.updated_at = now;
        self.inner.monitors.save(&monitor).await?;
        info!(monitor_id = %monitor.id, name = %monitor.name, "Monitor created");

        self.inner.events.publish(MonitorEvent::MonitorCreated(monitor.clone()));
        self.inner.scheduler.schedule(monitor.clone());
        Ok(monitor)
    }

    pub async fn update_monitor(&self, mut monitor: Monitor) -> Result<Monitor> {
        let existing = self.monitor(monitor.id).await?;
        validate_monitor(&monitor)?;
        monitor.created_at = existing.created_at;
        monitor.updated_at = Utc::now();
        self.save_and_reschedule(monitor).await
    }

    async fn save_and_reschedule(&self, monitor: Monitor) -> Result<Monitor> {
        self.inner.monitors.save(&monitor).await?;
        self.inner.events.publish(MonitorEvent::MonitorUpdated(monitor.clone()));
        self.inner.scheduler.reschedule(monitor.clone());
        debug!(monitor_id = %monitor.id, paused = monitor.paused, "Monitor updated");
        Ok(monitor)
    }

    pub async fn pause_monitor(&self, id: Uuid) -> Result<Monitor> {
        let mut monitor = self.monitor(id).await?;
        monitor.paused = true;
        monitor.updated_at = Utc::now();
        self.save_and_reschedule(monitor).await
    }

    pub async fn resume_monitor(&self, id: Uuid) -> Result<Monitor> {
        let mut monitor = self.monitor(id).await?;
        monitor.paused = false;
        monitor.updated_at = Utc::now();
        self.save_and_reschedule(monitor).await
    }

    /// Delete a monitor, or pause it while incidents still reference it
    pub async fn delete_monitor(&self, id: Uuid) -> Result<MonitorRemoval> {
        let monitor = self.monitor(id).await?;
        let referenced = !self
            .inner
            .incidents
            .list(&IncidentFilter { monitor_id: Some(id), ..Default::default() })
            .await?
            .is_empty();

        if referenced {
            if !monitor.paused {
                self.pause_monitor(id).await?;
            }
            info!(monitor_id = %id, "Monitor has incidents, paused instead of deleted");
            return Ok(MonitorRemoval::Paused);
        }

        self.inner.scheduler.unschedule(id);
        self.inner.monitors.delete(id).await?;
        self.inner.heartbeats.forget(id);
        self.inner.events.publish(MonitorEvent::MonitorDeleted { id });
        info!(monitor_id = %id, "Monitor deleted");
        Ok(MonitorRemoval::Deleted)
    }

    /// Run a check right away
    pub async fn check_now(&self, id: Uuid) -> Result<bool> {
        self.monitor(id).await?;
        Ok(self.inner.scheduler.trigger(id))
    }

    pub async fn monitor(&self, id: Uuid) -> Result<Monitor> {
        self.inner.monitors.get(id).await?.ok_or_else(|| CoreError::not_found("monitor", id))
    }

    pub async fn monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.inner.monitors.list().await?)
    }

    /// Re-validate every stored monitor, provider and workflow rule
    pub async fn check_definitions(&self) -> Result<DefinitionReport> {
        let monitors = self.inner.monitors.list().await?;
        let providers = self.inner.dispatcher.list_providers().await?;
        let rules = self.inner.rules.list().await?;

        let mut invalid = Vec::new();
        for monitor in &monitors {
            if let Err(e) = validate_monitor(monitor) {
                invalid.push(InvalidDefinition {
                    kind: "monitor",
                    id: monitor.id,
                    name: monitor.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
        for provider in &providers {
            if let Err(e) = self.inner.dispatcher.registry().create(provider) {
                invalid.push(InvalidDefinition {
                    kind: "provider",
                    id: provider.id,
                    name: provider.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
        for rule in rules.iter().filter(|rule| rule.enabled && rule_actions(rule).is_empty()) {
            invalid.push(InvalidDefinition {
                kind: "rule",
                id: rule.id,
                name: rule.name.clone(),
                reason: "enabled rule has no actions".to_string(),
            });
        }

        Ok(DefinitionReport { monitors: monitors.len(), providers: providers.len(), rules: rules.len(), invalid })
    }

    /// Monitors carrying a tag
    pub async fn monitors_tagged(&self, tag_id: Uuid) -> Result<Vec<Monitor>> {
        Ok(self.inner.monitors.find(&Filter::all().contains("tags", tag_id.to_string())).await?)
    }

    // Tags

    pub async fn save_tag(&self, tag: &Tag) -> Result<()> {
        Ok(self.inner.tags.save(tag).await?)
    }

    pub async fn tags(&self) -> Result<Vec<Tag>> {
        Ok(self.inner.tags.list().await?)
    }

    /// Delete a tag and detach it from every monitor
    pub async fn delete_tag(&self, id: Uuid) -> Result<bool> {
        for mut monitor in self.monitors_tagged(id).await? {
            monitor.tags.retain(|tag| *tag != id);
            monitor.updated_at = Utc::now();
            self.save_and_reschedule(monitor).await?;
        }
        Ok(self.inner.tags.delete(id).await?)
    }

    // Queries

    pub async fn monitor_states(&self) -> Result<Vec<MonitorStateView>> {
        let monitors = self.inner.monitors.list().await?;
        let mut views = Vec::with_capacity(monitors.len());
        for monitor in &monitors {
            views.push(self.state_view(monitor).await?);
        }
        Ok(views)
    }

    pub async fn monitor_state(&self, id: Uuid) -> Result<MonitorStateView> {
        let monitor = self.monitor(id).await?;
        self.state_view(&monitor).await
    }

    async fn state_view(&self, monitor: &Monitor) -> Result<MonitorStateView> {
        let now = Utc::now();
        let under_maintenance = self.inner.maintenance.is_under_maintenance(monitor, now).await;
        let mut view = self.inner.heartbeats.state_view(monitor, under_maintenance, now).await?;
        view.unpersisted = self.inner.resilient.is_unpersisted(Monitor::COLLECTION, monitor.id).await;
        Ok(view)
    }

    pub async fn uptime(&self, id: Uuid) -> Result<UptimeWindows> {
        self.monitor(id).await?;
        Ok(self.inner.heartbeats.uptime(id, Utc::now()).await?)
    }

    pub fn storage_degraded(&self) -> bool {
        self.inner.resilient.is_degraded()
    }

    pub async fn unpersisted_count(&self) -> usize {
        self.inner.resilient.unpersisted_count().await
    }

    /// Delete heartbeats older than `before`
    pub async fn prune_heartbeats(&self, before: DateTime<Utc>) -> Result<u64> {
        Ok(self.inner.heartbeats.prune(before).await?)
    }

    // Incidents

    pub async fn active_incidents(&self) -> Result<Vec<Incident>> {
        Ok(self.inner.incidents.active().await?)
    }

    pub async fn incident(&self, id: Uuid) -> Result<Incident> {
        Ok(self.inner.incidents.get(id).await?)
    }

    pub async fn incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        Ok(self.inner.incidents.list(filter).await?)
    }

    pub async fn acknowledge_incident(&self, id: Uuid) -> Result<Incident> {
        Ok(self.inner.incidents.acknowledge(id).await?)
    }

    pub async fn investigate_incident(&self, id: Uuid) -> Result<Incident> {
        Ok(self.inner.incidents.investigate(id).await?)
    }

    pub async fn resolve_incident(&self, id: Uuid) -> Result<Incident> {
        let incident = self.inner.incidents.resolve(id).await?;
        self.cancel_trigger(id);
        Ok(incident)
    }

    pub async fn escalate_incident(&self, id: Uuid, to: &str) -> Result<Incident> {
        Ok(self.inner.incidents.escalate(id, to).await?)
    }

    pub async fn add_incident_note(&self, id: Uuid, note: &str) -> Result<Incident> {
        Ok(self.inner.incidents.add_note(id, note).await?)
    }

    // On-call

    pub async fn on_call(&self, schedule_id: Uuid, at: DateTime<Utc>) -> Result<OnCallResolution> {
        Ok(self.inner.oncall.on_call(schedule_id, at, &[]).await?)
    }

    pub async fn next_on_call(&self, schedule_id: Uuid, at: DateTime<Utc>) -> Result<Option<Handoff>> {
        Ok(self.inner.oncall.next_on_call(schedule_id, at).await?)
    }

    pub async fn save_schedule(&self, schedule: &OnCallSchedule) -> Result<()> {
        Ok(self.inner.oncall.save_schedule(schedule).await?)
    }

    pub async fn add_override(&self, schedule_override: &ScheduleOverride) -> Result<()> {
        Ok(self.inner.oncall.add_override(schedule_override).await?)
    }

    pub async fn remove_override(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.oncall.remove_override(id).await?)
    }

    // Providers

    pub async fn save_provider(&self, provider: &NotificationProvider) -> Result<()> {
        Ok(self.inner.dispatcher.save_provider(provider).await?)
    }

    pub async fn providers(&self) -> Result<Vec<NotificationProvider>> {
        Ok(self.inner.dispatcher.list_providers().await?)
    }

    pub async fn delete_provider(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.dispatcher.delete_provider(id).await?)
    }

    pub async fn test_provider(&self, id: Uuid) -> Result<ProviderTestResult> {
        Ok(self.inner.dispatcher.test_provider(id).await?)
    }

    // Maintenance

    pub async fn schedule_maintenance(&self, window: MaintenanceWindow) -> Result<MaintenanceWindow> {
        self.inner.maintenance.schedule(window).await
    }

    pub async fn cancel_maintenance(&self, id: Uuid) -> Result<MaintenanceWindow> {
        self.inner.maintenance.cancel(id).await
    }

    pub async fn maintenance_windows(&self) -> Vec<MaintenanceWindow> {
        self.inner.maintenance.list().await
    }

    // Workflow

    pub async fn save_rule(&self, rule: AlertWorkflowRule) -> Result<()> {
        self.inner.rules.save(&rule).await?;
        info!(rule_id = %rule.id, name = %rule.name, "Workflow rule saved");
        self.inner.workflow.upsert_rule(rule).await;
        Ok(())
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        let removed = self.inner.rules.delete(id).await?;
        self.inner.workflow.remove_rule(id).await;
        Ok(removed)
    }

    pub async fn rules(&self) -> Vec<AlertWorkflowRule> {
        self.inner.workflow.rules().await.as_ref().clone()
    }

    /// Evaluate workflow rules against a ticket and apply what they plan
    pub async fn evaluate_ticket(&self, ticket: &Ticket) -> Result<Vec<AppliedAction>> {
        let planned = self.inner.workflow.evaluate(ticket, Utc::now()).await;
        debug!(ticket_id = %ticket.id, actions = planned.len(), "Ticket evaluated");

        let mut applied = Vec::with_capacity(planned.len());
        for PlannedAction { rule_id, action, .. } in planned {
            applied.push(self.apply_action(ticket, Some(rule_id), action).await);
        }
        self.release_failed_rules(&ticket.id, &applied);
        Ok(applied)
    }

    /// Run workflow rules against an incident a monitor just opened
    ///
    /// Returns the incident as it stands once the actions were applied.
    async fn apply_incident_rules(&self, monitor: &Monitor, incident: Incident, detail: &str) -> Result<Incident> {
        let context = self.incident_context(monitor, &incident, detail).await;
        let planned = self.inner.workflow.evaluate(&context, Utc::now()).await;
        if planned.is_empty() {
            return Ok(incident);
        }
        debug!(incident_id = %incident.id, actions = planned.len(), "Incident evaluated");

        let mut applied = Vec::with_capacity(planned.len());
        for PlannedAction { rule_id, action, .. } in planned {
            applied.push(self.apply_incident_action(&context, incident.id, rule_id, action).await);
        }
        self.release_failed_rules(&context.id, &applied);
        Ok(self.inner.incidents.get(incident.id).await?)
    }

    /// Conditions see a monitor incident as a ticket keyed by the incident id
    ///
    /// The monitor name is the title, the incident severity the priority and
    /// the monitor kind the category; summary, check message and tag names
    /// are searched by keywords.
    async fn incident_context(&self, monitor: &Monitor, incident: &Incident, detail: &str) -> Ticket {
        let mut tags = Vec::with_capacity(monitor.tags.len());
        for tag_id in &monitor.tags {
            match self.inner.tags.get(*tag_id).await {
                Ok(Some(tag)) => tags.push(tag.name),
                Ok(None) => {}
                Err(e) => warn!(tag_id = %tag_id, "Cannot load tag for rule evaluation: {}", e),
            }
        }

        let mut context = Ticket::new(incident.id.to_string(), monitor.name.clone(), incident.severity.into());
        context.description = format!("{} {} {}", incident.summary, detail, tags.join(" "));
        context.category = Some(monitor.kind().as_str().to_string());
        context.created_at = incident.created_at;
        context.updated_at = incident.updated_at;
        context
    }

    /// Let a rule run again when none of its actions took effect
    fn release_failed_rules(&self, ticket_id: &str, applied: &[AppliedAction]) {
        let mut rule_ids: Vec<Uuid> = applied.iter().filter_map(|a| a.rule_id).collect();
        rule_ids.dedup();
        for rule_id in rule_ids {
            if applied.iter().filter(|a| a.rule_id == Some(rule_id)).all(|a| !a.success) {
                self.inner.workflow.release(rule_id, ticket_id);
            }
        }
    }

    async fn apply_action(&self, ticket: &Ticket, rule_id: Option<Uuid>, action: WorkflowAction) -> AppliedAction {
        let result = match &action {
            WorkflowAction::CreateAlert => self.alert_for_ticket(ticket).await,
            WorkflowAction::EscalateTo(to) => self.escalate_ticket(ticket, to).await,
            WorkflowAction::Notify(targets) => match self.inner.incidents.active_for_ticket(&ticket.id).await {
                Ok(incident) => {
                    let severity = incident.as_ref().map(|i| i.severity).unwrap_or_else(|| ticket.priority.severity());
                    let mut message =
                        AlertMessage::new(AlertKind::Trigger, severity, ticket_title(ticket), ticket.description.clone());
                    message.incident_id = incident.map(|i| i.id);
                    self.notify_targets(message, targets).await
                }
                Err(e) => Err(e.to_string()),
            },
            WorkflowAction::ChangePriority(priority) => self
                .inner
                .gateway
                .change_priority(&ticket.id, *priority)
                .await
                .map(|()| format!("priority changed to {priority}"))
                .map_err(|e| e.to_string()),
        };
        applied_action(&ticket.id, rule_id, action, result)
    }

    async fn apply_incident_action(
        &self,
        context: &Ticket,
        incident_id: Uuid,
        rule_id: Uuid,
        action: WorkflowAction,
    ) -> AppliedAction {
        let result = match &action {
            WorkflowAction::CreateAlert => Ok(format!("incident {incident_id} raises its own trigger alert")),
            WorkflowAction::EscalateTo(to) => self.escalate_monitor_incident(incident_id, &context.id, to).await,
            WorkflowAction::Notify(targets) => match self.inner.incidents.get(incident_id).await {
                Ok(incident) => {
                    let mut message = AlertMessage::new(
                        AlertKind::Trigger,
                        incident.severity,
                        incident.summary.clone(),
                        context.description.clone(),
                    );
                    message.monitor_id = incident.monitor_id;
                    message.incident_id = Some(incident.id);
                    self.notify_targets(message, targets).await
                }
                Err(e) => Err(e.to_string()),
            },
            WorkflowAction::ChangePriority(priority) => self
                .inner
                .incidents
                .set_severity(incident_id, priority.severity())
                .await
                .map(|incident| format!("incident severity set to {}", incident.severity))
                .map_err(|e| e.to_string()),
        };
        applied_action(&context.id, Some(rule_id), action, result)
    }

    async fn alert_for_ticket(&self, ticket: &Ticket) -> std::result::Result<String, String> {
        let signal = TicketSignal {
            ticket_id: ticket.id.clone(),
            severity: ticket.priority.severity(),
            summary: ticket.title.clone(),
            description: ticket.description.clone(),
        };
        let incident = match self.inner.incidents.open_from_signal(signal).await {
            Ok(IncidentOutcome::Created(incident)) => incident,
            Ok(IncidentOutcome::Updated(incident)) => {
                return Ok(format!("incident {} already open", incident.id));
            }
            Err(e) => return Err(e.to_string()),
        };

        let mut message =
            AlertMessage::new(AlertKind::Trigger, incident.severity, ticket_title(ticket), ticket.description.clone());
        message.incident_id = Some(incident.id);
        let alert = OutgoingAlert { message, provider_ids: Vec::new(), token: self.inner.shutdown.child_token() };
        match self.deliver(alert).await {
            Ok(report) => Ok(format!("incident {} opened, delivered: {}", incident.id, report.delivered())),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn escalate_ticket(&self, ticket: &Ticket, to: &str) -> std::result::Result<String, String> {
        match self.inner.incidents.active_for_ticket(&ticket.id).await {
            Ok(Some(incident)) => self
                .inner
                .incidents
                .escalate(incident.id, to)
                .await
                .map(|incident| format!("incident {} escalated to {to}", incident.id))
                .map_err(|e| e.to_string()),
            Ok(None) => self
                .inner
                .gateway
                .escalate(&ticket.id, to)
                .await
                .map(|()| format!("ticket escalated to {to}"))
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Escalate a monitor incident and forward the escalation to the ITSM
    async fn escalate_monitor_incident(
        &self,
        incident_id: Uuid,
        reference: &str,
        to: &str,
    ) -> std::result::Result<String, String> {
        let incident = self.inner.incidents.escalate(incident_id, to).await.map_err(|e| e.to_string())?;
        self.inner
            .gateway
            .escalate(reference, to)
            .await
            .map(|()| format!("incident {} escalated to {to}", incident.id))
            .map_err(|e| e.to_string())
    }

    async fn notify_targets(
        &self,
        mut message: AlertMessage,
        targets: &[NotifyTarget],
    ) -> std::result::Result<String, String> {
        let now = Utc::now();
        let mut provider_ids = Vec::new();
        let mut recipients = Vec::new();
        for target in targets {
            match target {
                NotifyTarget::Provider(id) => provider_ids.push(*id),
                NotifyTarget::Schedule(id) => recipients.extend(self.schedule_recipients(*id, now).await),
                NotifyTarget::User(user) => recipients.push(user.clone()),
            }
        }
        let mut seen = std::collections::HashSet::new();
        recipients.retain(|user| seen.insert(user.clone()));
        message.recipients = recipients;

        let alert = OutgoingAlert { message, provider_ids, token: self.inner.shutdown.child_token() };
        let report = self.deliver(alert).await.map_err(|e| e.to_string())?;
        if report.all_failed() {
            return Err("no provider delivered the notification".to_string());
        }
        Ok(format!("notified {} provider(s)", report.outcomes.iter().filter(|o| o.delivered).count()))
    }

    // Recommendations

    /// Queue a recommendation; confident ones auto-execute after the policy delay
    pub fn submit_recommendation(&self, ticket: Ticket, recommendation: Recommendation) -> ExecutionMode {
        let this = self.clone();
        self.inner.recommendations.submit(ticket, recommendation, move |ticket, recommendation| async move {
            let applied = this.apply_recommendation(&ticket, recommendation).await;
            if let Some(applied) = applied {
                info!(ticket_id = %ticket.id, success = applied.success, "Recommendation auto-executed");
            }
        })
    }

    pub fn cancel_recommendation(&self, ticket_id: &str) -> bool {
        self.inner.recommendations.cancel(ticket_id)
    }

    /// Run a pending recommendation now
    ///
    /// `None` means the recommendation was a free-form suggestion with nothing to apply.
    pub async fn execute_recommendation(&self, ticket_id: &str) -> Result<Option<AppliedAction>> {
        let (ticket, recommendation) = self
            .inner
            .recommendations
            .take(ticket_id)
            .ok_or_else(|| CoreError::NoPendingRecommendation(ticket_id.to_string()))?;
        Ok(self.apply_recommendation(&ticket, recommendation).await)
    }

    pub fn pending_recommendations(&self) -> Vec<PendingRecommendation> {
        self.inner.recommendations.pending()
    }

    async fn apply_recommendation(&self, ticket: &Ticket, recommendation: Recommendation) -> Option<AppliedAction> {
        let Some(action) = recommended_action(&recommendation.action) else {
            info!(ticket_id = %ticket.id, "Recommendation is a free-form suggestion, nothing to apply");
            return None;
        };
        Some(self.apply_action(ticket, None, action).await)
    }
}

fn applied_action(
    ticket_id: &str,
    rule_id: Option<Uuid>,
    action: WorkflowAction,
    result: std::result::Result<String, String>,
) -> AppliedAction {
    match result {
        Ok(detail) => AppliedAction { rule_id, action, success: true, detail },
        Err(detail) => {
            warn!(ticket_id = %ticket_id, rule_id = ?rule_id, "Workflow action failed: {}", detail);
            AppliedAction { rule_id, action, success: false, detail }
        }
    }
}

fn ticket_title(ticket: &Ticket) -> String {
    format!("Ticket {}: {}", ticket.id, ticket.title)
}

fn recovery_body(incident: &Incident, beat: &HeartbeatRecord) -> String {
    let downtime = beat.timestamp - incident.created_at;
    let minutes = downtime.num_minutes();
    let latency = beat.latency_ms.map(|ms| format!(", responding in {ms} ms")).unwrap_or_default();
    if minutes > 0 {
        format!("Recovered after {minutes} min{latency}")
    } else {
        format!("Recovered after {} s{latency}", downtime.num_seconds().max(0))
    }
}
