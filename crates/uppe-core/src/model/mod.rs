//! Domain records shared by every component.
//!
//! Operator-authored definitions (monitors, rules, schedules, providers,
//! maintenance windows, tags) and the records the core produces
//! (heartbeats, incidents).

pub mod heartbeat;
pub mod incident;
pub mod maintenance;
pub mod monitor;
pub mod provider;
pub mod rule;
pub mod schedule;
pub mod tag;
pub mod ticket;

pub use heartbeat::HeartbeatRecord;
pub use incident::{Incident, IncidentStatus, Severity, TimelineEntry, TimelineKind};
pub use maintenance::{MaintenanceStatus, MaintenanceWindow};
pub use monitor::{Monitor, MonitorKind, MonitorTarget};
pub use provider::{AlertKind, AlertMessage, NotificationProvider, ProviderConfig, ProviderTestResult};
pub use rule::{AlertWorkflowRule, NotifyTarget, RuleActions, RuleConditions};
pub use schedule::{DailyWindow, OnCallSchedule, RotationLayer, ScheduleOverride};
pub use tag::Tag;
pub use ticket::{Recommendation, RecommendedAction, Ticket, TicketPriority};
