use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rotation of responders resolvable to "who is on call now"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnCallSchedule {
    pub id: Uuid,
    pub name: String,
    /// IANA zone name, e.g. `Europe/Berlin`
    pub timezone: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Evaluated in order; the first primary layer with a shift wins
    pub layers: Vec<RotationLayer>,
}

fn default_enabled() -> bool {
    true
}

impl OnCallSchedule {
    pub fn new(name: impl Into<String>, timezone: impl Into<String>, layers: Vec<RotationLayer>) -> Self {
        Self { id: Uuid::new_v4(), name: name.into(), timezone: timezone.into(), enabled: true, layers }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationLayer {
    pub name: String,
    pub users: Vec<String>,
    /// Length of a single shift
    pub rotation_hours: u32,
    /// Epoch the rotation is computed from, in both directions
    pub rotation_start: DateTime<Utc>,
    /// Restricts shifts to a daily window in the schedule's local time
    #[serde(default)]
    pub restriction: Option<DailyWindow>,
    #[serde(default)]
    pub is_backup: bool,
}

impl RotationLayer {
    pub fn new(name: impl Into<String>, users: Vec<String>, rotation_hours: u32, rotation_start: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            users,
            rotation_hours,
            rotation_start,
            restriction: None,
            is_backup: false,
        }
    }

    pub fn restricted_to(mut self, window: DailyWindow) -> Self {
        self.restriction = Some(window);
        self
    }

    pub fn backup(mut self) -> Self {
        self.is_backup = true;
        self
    }
}

/// Local time-of-day range; `end <= start` wraps past midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Time-bounded replacement of the rotation's responder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOverride {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub user_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleOverride {
    pub fn new(schedule_id: Uuid, user_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            user_id: user_id.into(),
            start,
            end,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn daily_window_same_day() {
        let window = DailyWindow::new(t(8, 0), t(16, 0));
        assert!(window.contains(t(8, 0)));
        assert!(window.contains(t(15, 59)));
        assert!(!window.contains(t(16, 0)));
        assert!(!window.contains(t(7, 59)));
    }

    #[test]
    fn daily_window_overnight() {
        let window = DailyWindow::new(t(22, 0), t(6, 0));
        assert!(window.contains(t(23, 0)));
        assert!(window.contains(t(2, 0)));
        assert!(!window.contains(t(12, 0)));
    }
}
