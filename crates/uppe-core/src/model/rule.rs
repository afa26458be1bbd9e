use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ticket::TicketPriority;

/// Condition/action pair evaluated against incoming tickets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertWorkflowRule {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower runs first
    pub priority: i32,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default)]
    pub actions: RuleActions,
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl AlertWorkflowRule {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            priority,
            conditions: RuleConditions::default(),
            actions: RuleActions::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_conditions(mut self, conditions: RuleConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_actions(mut self, actions: RuleActions) -> Self {
        self.actions = actions;
        self
    }
}

/// Every present condition must hold; absent or empty ones do not restrict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default)]
    pub priorities: Option<Vec<TicketPriority>>,
    #[serde(default)]
    pub customer_tiers: Option<Vec<String>>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub time_threshold_minutes: Option<u64>,
    #[serde(default)]
    pub affected_users_threshold: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default)]
    pub create_alert: bool,
    #[serde(default)]
    pub escalate_to: Option<String>,
    #[serde(default)]
    pub notify: Vec<NotifyTarget>,
    #[serde(default)]
    pub priority_change: Option<TicketPriority>,
}

/// Recipient of a workflow notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NotifyTarget {
    Provider(Uuid),
    Schedule(Uuid),
    User(String),
}
