//! Recommendation execution policy.
//!
//! Recommendations come from an external scoring service. Confident ones
//! for the configured priorities run on their own after a delay, during
//! which an operator can cancel them; everything else waits for a human.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::evaluator::WorkflowAction;
use crate::config::RecommendationPolicy;
use crate::model::{Recommendation, RecommendedAction, Ticket};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    Auto { execute_at: DateTime<Utc> },
    Manual,
}

/// Whether a recommendation may run without a human
///
/// Free-form suggestions are always manual.
pub fn auto_executable(policy: &RecommendationPolicy, ticket: &Ticket, recommendation: &Recommendation) -> bool {
    !matches!(recommendation.action, RecommendedAction::Other { .. })
        && recommendation.confidence > policy.auto_execute_confidence
        && policy.auto_execute_priorities.contains(&ticket.priority)
}

/// Workflow action equivalent to a recommended action
pub fn recommended_action(action: &RecommendedAction) -> Option<WorkflowAction> {
    match action {
        RecommendedAction::CreateAlert => Some(WorkflowAction::CreateAlert),
        RecommendedAction::Escalate { to } => Some(WorkflowAction::EscalateTo(to.clone())),
        RecommendedAction::ChangePriority { priority } => Some(WorkflowAction::ChangePriority(*priority)),
        RecommendedAction::Notify { targets } => Some(WorkflowAction::Notify(targets.clone())),
        RecommendedAction::Other { .. } => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingRecommendation {
    pub ticket: Ticket,
    pub recommendation: Recommendation,
    pub mode: ExecutionMode,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip)]
    generation: u64,
    #[serde(skip)]
    token: CancellationToken,
}

/// Recommendations waiting for their delay to pass or for an operator
///
/// One entry per ticket; a newer recommendation replaces (and cancels) the
/// previous one.
pub struct RecommendationQueue {
    policy: RecommendationPolicy,
    pending: Arc<DashMap<String, PendingRecommendation>>,
    generation: AtomicU64,
}

impl RecommendationQueue {
    pub fn new(policy: RecommendationPolicy) -> Self {
        Self { policy, pending: Arc::new(DashMap::new()), generation: AtomicU64::new(0) }
    }

    pub fn policy(&self) -> &RecommendationPolicy {
        &self.policy
    }

    /// Queue a recommendation, arming the auto-execute timer when the policy allows
    ///
    /// `execute` runs at most once, after the delay, unless the recommendation is
    /// cancelled, taken for manual execution or replaced first.
    pub fn submit<F, Fut>(&self, ticket: Ticket, recommendation: Recommendation, execute: F) -> ExecutionMode
    where
        F: FnOnce(Ticket, Recommendation) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let now = Utc::now();
        let delay = Duration::from_secs(self.policy.auto_execute_delay_secs);
        let mode = if auto_executable(&self.policy, &ticket, &recommendation) {
            ExecutionMode::Auto { execute_at: now + chrono::Duration::seconds(delay.as_secs() as i64) }
        } else {
            ExecutionMode::Manual
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let ticket_id = ticket.id.clone();
        let entry = PendingRecommendation {
            ticket,
            recommendation,
            mode,
            submitted_at: now,
            generation,
            token: token.clone(),
        };
        if let Some(previous) = self.pending.insert(ticket_id.clone(), entry) {
            previous.token.cancel();
            debug!(ticket_id = %ticket_id, "recommendation replaced");
        }

        if let ExecutionMode::Auto { .. } = mode {
            info!(ticket_id = %ticket_id, delay_secs = delay.as_secs(), "recommendation will auto-execute");
            let pending = Arc::clone(&self.pending);
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(ticket_id = %ticket_id, "auto-execution cancelled");
                    }
                    _ = tokio::time::sleep(delay) => {
                        if let Some((_, entry)) = pending.remove_if(&ticket_id, |_, e| e.generation == generation) {
                            info!(ticket_id = %ticket_id, "auto-executing recommendation");
                            execute(entry.ticket, entry.recommendation).await;
                        }
                    }
                }
            });
        } else {
            info!(ticket_id = %ticket_id, "recommendation awaits manual execution");
        }
        mode
    }

    /// Cancel a pending recommendation
    pub fn cancel(&self, ticket_id: &str) -> bool {
        match self.pending.remove(ticket_id) {
            Some((_, entry)) => {
                entry.token.cancel();
                info!(ticket_id, "recommendation cancelled");
                true
            }
            None => false,
        }
    }

    /// Remove a recommendation for manual execution, disarming its timer
    pub fn take(&self, ticket_id: &str) -> Option<(Ticket, Recommendation)> {
        let (_, entry) = self.pending.remove(ticket_id)?;
        entry.token.cancel();
        Some((entry.ticket, entry.recommendation))
    }

    pub fn get(&self, ticket_id: &str) -> Option<PendingRecommendation> {
        self.pending.get(ticket_id).map(|e| e.value().clone())
    }

    pub fn pending(&self) -> Vec<PendingRecommendation> {
        let mut pending: Vec<PendingRecommendation> = self.pending.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|p| p.submitted_at);
        pending
    }

    /// Cancel every armed timer
    pub fn shutdown(&self) {
        for entry in self.pending.iter() {
            entry.token.cancel();
        }
    }
}
