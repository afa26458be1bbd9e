use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Investigating,
    Resolved,
}

impl IncidentStatus {
    fn rank(self) -> u8 {
        match self {
            IncidentStatus::Open => 0,
            IncidentStatus::Acknowledged => 1,
            IncidentStatus::Investigating => 2,
            IncidentStatus::Resolved => 3,
        }
    }

    /// Forward moves only; resolved is terminal
    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        self != IncidentStatus::Resolved && next.rank() > self.rank()
    }

    pub fn is_resolved(self) -> bool {
        self == IncidentStatus::Resolved
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentStatus::Open => write!(f, "open"),
            IncidentStatus::Acknowledged => write!(f, "acknowledged"),
            IncidentStatus::Investigating => write!(f, "investigating"),
            IncidentStatus::Resolved => write!(f, "resolved"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Created,
    Signal,
    StatusChange,
    Escalated,
    Recovered,
    Note,
    NotificationFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    pub kind: TimelineKind,
    pub message: String,
}

impl TimelineEntry {
    pub fn new(kind: TimelineKind, message: impl Into<String>) -> Self {
        Self { at: Utc::now(), kind, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    #[serde(default)]
    pub monitor_id: Option<Uuid>,
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub alert_id: Option<Uuid>,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalated: bool,
    #[serde(default)]
    pub escalated_to: Option<String>,
    #[serde(default)]
    pub notification_degraded: bool,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

impl Incident {
    pub fn new(severity: Severity, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        let summary = summary.into();
        Self {
            id: Uuid::new_v4(),
            monitor_id: None,
            ticket_id: None,
            alert_id: None,
            status: IncidentStatus::Open,
            severity,
            timeline: vec![TimelineEntry::new(TimelineKind::Created, summary.clone())],
            summary,
            description: String::new(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            escalated: false,
            escalated_to: None,
            notification_degraded: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_resolved()
    }

    pub fn push_timeline(&mut self, kind: TimelineKind, message: impl Into<String>) {
        let entry = TimelineEntry::new(kind, message);
        self.updated_at = entry.at;
        self.timeline.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        use IncidentStatus::*;
        assert!(Open.can_transition_to(Acknowledged));
        assert!(Open.can_transition_to(Resolved));
        assert!(Acknowledged.can_transition_to(Investigating));
        assert!(!Investigating.can_transition_to(Acknowledged));
        assert!(!Open.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Resolved));
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low < Severity::Medium);
    }
}
