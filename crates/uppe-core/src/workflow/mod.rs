//! Ticket workflow automation: rule evaluation and recommendation policy.

pub mod conditions;
pub mod evaluator;
pub mod gateway;
pub mod recommendation;

pub use conditions::conditions_match;
pub use evaluator::{PlannedAction, WorkflowAction, WorkflowEvaluator, rule_actions};
pub use gateway::{LoggingTicketGateway, TicketGateway};
pub use recommendation::{ExecutionMode, PendingRecommendation, RecommendationQueue, auto_executable, recommended_action};
