use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::incident::Severity;
use super::rule::NotifyTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TicketPriority {
    pub fn severity(self) -> Severity {
        match self {
            TicketPriority::Low => Severity::Low,
            TicketPriority::Medium => Severity::Medium,
            TicketPriority::High => Severity::High,
            TicketPriority::Critical => Severity::Critical,
        }
    }
}

impl From<Severity> for TicketPriority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => TicketPriority::Low,
            Severity::Medium => TicketPriority::Medium,
            Severity::High => TicketPriority::High,
            Severity::Critical => TicketPriority::Critical,
        }
    }
}

impl fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketPriority::Low => write!(f, "low"),
            TicketPriority::Medium => write!(f, "medium"),
            TicketPriority::High => write!(f, "high"),
            TicketPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Ticket as handed over by the ITSM; never stored by this crate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: TicketPriority,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub customer_tier: Option<String>,
    #[serde(default)]
    pub affected_users: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: TicketPriority) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority,
            category: None,
            customer_tier: None,
            affected_users: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Text searched by keyword conditions
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Action proposed by the external scoring service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecommendedAction {
    CreateAlert,
    Escalate { to: String },
    ChangePriority { priority: TicketPriority },
    Notify { targets: Vec<NotifyTarget> },
    /// Free-form suggestion; only ever executed by hand
    Other { description: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: RecommendedAction,
    /// In `[0, 1]`
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}
