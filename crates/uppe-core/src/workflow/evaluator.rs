use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::conditions::conditions_match;
use crate::model::{AlertWorkflowRule, NotifyTarget, Ticket, TicketPriority};

/// One action a matching rule asks for
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WorkflowAction {
    CreateAlert,
    EscalateTo(String),
    Notify(Vec<NotifyTarget>),
    ChangePriority(TicketPriority),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAction {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub action: WorkflowAction,
}

/// Actions of a rule, in execution order
pub fn rule_actions(rule: &AlertWorkflowRule) -> Vec<WorkflowAction> {
    let mut actions = Vec::new();
    if rule.actions.create_alert {
        actions.push(WorkflowAction::CreateAlert);
    }
    if let Some(to) = &rule.actions.escalate_to {
        actions.push(WorkflowAction::EscalateTo(to.clone()));
    }
    if !rule.actions.notify.is_empty() {
        actions.push(WorkflowAction::Notify(rule.actions.notify.clone()));
    }
    if let Some(priority) = rule.actions.priority_change {
        actions.push(WorkflowAction::ChangePriority(priority));
    }
    actions
}

/// Workflow rule evaluator
///
/// Rules are read through a shared snapshot; the only mutable state touched
/// during evaluation is the idempotency ledger, a concurrent map keyed by
/// (rule, ticket), so unrelated tickets evaluate in parallel.
pub struct WorkflowEvaluator {
    rules: RwLock<Arc<Vec<AlertWorkflowRule>>>,
    ledger: DashMap<(Uuid, String), DateTime<Utc>>,
    window: Duration,
}

impl WorkflowEvaluator {
    pub fn new(idempotency_window: std::time::Duration) -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
            ledger: DashMap::new(),
            window: Duration::from_std(idempotency_window).unwrap_or(Duration::hours(1)),
        }
    }

    pub async fn set_rules(&self, mut rules: Vec<AlertWorkflowRule>) {
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        *self.rules.write().await = Arc::new(rules);
    }

    pub async fn upsert_rule(&self, rule: AlertWorkflowRule) {
        let mut rules: Vec<AlertWorkflowRule> = self.rules().await.iter().filter(|r| r.id != rule.id).cloned().collect();
        rules.push(rule);
        self.set_rules(rules).await;
    }

    pub async fn remove_rule(&self, id: Uuid) -> bool {
        let current = self.rules().await;
        let rules: Vec<AlertWorkflowRule> = current.iter().filter(|r| r.id != id).cloned().collect();
        let removed = rules.len() != current.len();
        self.set_rules(rules).await;
        removed
    }

    pub async fn rules(&self) -> Arc<Vec<AlertWorkflowRule>> {
        Arc::clone(&*self.rules.read().await)
    }

    /// Enabled rules whose conditions hold, by ascending priority then id
    pub async fn matching_rules(&self, ticket: &Ticket, now: DateTime<Utc>) -> Vec<AlertWorkflowRule> {
        self.rules()
            .await
            .iter()
            .filter(|rule| rule.enabled && conditions_match(&rule.conditions, ticket, now))
            .cloned()
            .collect()
    }

    /// Planned actions for a ticket, skipping rules that already ran for it recently
    pub async fn evaluate(&self, ticket: &Ticket, now: DateTime<Utc>) -> Vec<PlannedAction> {
        let mut planned = Vec::new();
        for rule in self.matching_rules(ticket, now).await {
            if !self.claim(rule.id, &ticket.id, now) {
                debug!(rule_id = %rule.id, ticket_id = %ticket.id, "rule already executed for ticket, skipping");
                continue;
            }
            debug!(rule_id = %rule.id, ticket_id = %ticket.id, "rule matched");
            planned.extend(rule_actions(&rule).into_iter().map(|action| PlannedAction {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                action,
            }));
        }
        planned
    }

    /// Record an execution unless one happened within the window
    fn claim(&self, rule_id: Uuid, ticket_id: &str, now: DateTime<Utc>) -> bool {
        match self.ledger.entry((rule_id, ticket_id.to_string())) {
            Entry::Occupied(mut entry) => {
                if now - *entry.get() < self.window {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Forget an execution so the rule can run again for `ticket_id`
    pub fn release(&self, rule_id: Uuid, ticket_id: &str) -> bool {
        let released = self.ledger.remove(&(rule_id, ticket_id.to_string())).is_some();
        if released {
            debug!(rule_id = %rule_id, ticket_id = %ticket_id, "rule execution released");
        }
        released
    }

    /// Drop ledger entries older than the window
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.ledger.len();
        self.ledger.retain(|_, at| now - *at < self.window);
        before - self.ledger.len()
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RuleActions, RuleConditions};

    fn evaluator() -> WorkflowEvaluator {
        WorkflowEvaluator::new(std::time::Duration::from_secs(3600))
    }

    fn critical_ticket(id: &str) -> Ticket {
        Ticket::new(id, "Database down", TicketPriority::Critical)
    }

    fn rule(name: &str, priority: i32, actions: RuleActions) -> AlertWorkflowRule {
        AlertWorkflowRule::new(name, priority)
            .with_conditions(RuleConditions {
                priorities: Some(vec![TicketPriority::Critical]),
                ..Default::default()
            })
            .with_actions(actions)
    }

    #[tokio::test]
    async fn rules_run_in_priority_order() {
        let evaluator = evaluator();
        let escalate = rule("escalate", 5, RuleActions { escalate_to: Some("dba-oncall".into()), ..Default::default() });
        let alert = rule("alert", 1, RuleActions { create_alert: true, ..Default::default() });
        let mut disabled = rule("disabled", 0, RuleActions { create_alert: true, ..Default::default() });
        disabled.enabled = false;
        evaluator.set_rules(vec![escalate.clone(), disabled, alert.clone()]).await;

        let planned = evaluator.evaluate(&critical_ticket("T-1"), Utc::now()).await;
        let order: Vec<Uuid> = planned.iter().map(|p| p.rule_id).collect();
        assert_eq!(order, vec![alert.id, escalate.id]);
        assert_eq!(planned[0].action, WorkflowAction::CreateAlert);
        assert_eq!(planned[1].action, WorkflowAction::EscalateTo("dba-oncall".into()));
    }

    #[tokio::test]
    async fn actions_follow_declared_order() {
        let evaluator = evaluator();
        let full = rule(
            "full",
            1,
            RuleActions {
                create_alert: true,
                escalate_to: Some("lead".into()),
                notify: vec![NotifyTarget::User("alice".into())],
                priority_change: Some(TicketPriority::High),
            },
        );
        evaluator.set_rules(vec![full]).await;

        let kinds: Vec<WorkflowAction> =
            evaluator.evaluate(&critical_ticket("T-2"), Utc::now()).await.into_iter().map(|p| p.action).collect();
        assert_eq!(
            kinds,
            vec![
                WorkflowAction::CreateAlert,
                WorkflowAction::EscalateTo("lead".into()),
                WorkflowAction::Notify(vec![NotifyTarget::User("alice".into())]),
                WorkflowAction::ChangePriority(TicketPriority::High),
            ]
        );
    }

    #[tokio::test]
    async fn rule_runs_once_per_ticket_within_window() {
        let evaluator = evaluator();
        evaluator.set_rules(vec![rule("alert", 1, RuleActions { create_alert: true, ..Default::default() })]).await;
        let now = Utc::now();

        assert_eq!(evaluator.evaluate(&critical_ticket("T-3"), now).await.len(), 1);
        assert!(evaluator.evaluate(&critical_ticket("T-3"), now + Duration::minutes(59)).await.is_empty());
        // Other tickets are unaffected
        assert_eq!(evaluator.evaluate(&critical_ticket("T-4"), now).await.len(), 1);
        // Window elapsed
        assert_eq!(evaluator.evaluate(&critical_ticket("T-3"), now + Duration::minutes(61)).await.len(), 1);
    }

    #[tokio::test]
    async fn released_rules_run_again() {
        let evaluator = evaluator();
        let alert = rule("alert", 1, RuleActions { create_alert: true, ..Default::default() });
        evaluator.set_rules(vec![alert.clone()]).await;
        let now = Utc::now();

        assert_eq!(evaluator.evaluate(&critical_ticket("T-8"), now).await.len(), 1);
        assert!(evaluator.release(alert.id, "T-8"));
        assert!(!evaluator.release(alert.id, "T-8"));
        assert_eq!(evaluator.evaluate(&critical_ticket("T-8"), now).await.len(), 1);
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() {
        let evaluator = evaluator();
        evaluator.set_rules(vec![rule("alert", 1, RuleActions { create_alert: true, ..Default::default() })]).await;
        let now = Utc::now();
        evaluator.evaluate(&critical_ticket("T-5"), now).await;
        evaluator.evaluate(&critical_ticket("T-6"), now + Duration::minutes(30)).await;

        assert_eq!(evaluator.purge_expired(now + Duration::minutes(70)), 1);
        assert_eq!(evaluator.ledger_len(), 1);
    }

    #[tokio::test]
    async fn ties_break_by_rule_id() {
        let evaluator = evaluator();
        let a = rule("a", 3, RuleActions { create_alert: true, ..Default::default() });
        let b = rule("b", 3, RuleActions { create_alert: true, ..Default::default() });
        evaluator.set_rules(vec![a.clone(), b.clone()]).await;

        let matched: Vec<Uuid> = evaluator.matching_rules(&critical_ticket("T-7"), Utc::now()).await.iter().map(|r| r.id).collect();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(matched, expected);

        assert!(evaluator.remove_rule(a.id).await);
        assert_eq!(evaluator.rules().await.len(), 1);
    }
}
