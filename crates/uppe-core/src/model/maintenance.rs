use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

impl fmt::Display for MaintenanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceStatus::Scheduled => write!(f, "scheduled"),
            MaintenanceStatus::Active => write!(f, "active"),
            MaintenanceStatus::Completed => write!(f, "completed"),
            MaintenanceStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Planned period during which failures of the covered monitors are suppressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub monitor_ids: Vec<Uuid>,
    #[serde(default)]
    pub cancelled: bool,
}

impl MaintenanceWindow {
    pub fn new(
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        monitor_ids: Vec<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            start_time,
            end_time,
            monitor_ids,
            cancelled: false,
        }
    }

    /// Status derived from the time bounds, unless cancelled by hand
    pub fn status(&self, now: DateTime<Utc>) -> MaintenanceStatus {
        if self.cancelled {
            MaintenanceStatus::Cancelled
        } else if now < self.start_time {
            MaintenanceStatus::Scheduled
        } else if now < self.end_time {
            MaintenanceStatus::Active
        } else {
            MaintenanceStatus::Completed
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == MaintenanceStatus::Active
    }
}
