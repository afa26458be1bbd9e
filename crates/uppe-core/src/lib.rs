//! Uppe core - monitoring, incident and alert delivery engine.
//!
//! This library owns everything between "probe a service" and "page a human":
//! scheduling checks, deriving monitor state and uptime, deduplicating
//! incidents, evaluating ticket workflow rules, resolving on-call responders
//! and fanning alerts out to notification providers.

pub mod config;
pub mod error;
pub mod events;
pub mod incident;
pub mod maintenance;
pub mod model;
pub mod monitoring;
pub mod notify;
pub mod oncall;
pub mod orchestrator;
pub mod status;
pub mod storage;
pub mod workflow;

pub use config::Config;
pub use error::{CoreError, ValidationError};
pub use events::{EventBus, MonitorEvent};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};

/// Uppe core result type using the crate error
pub type Result<T> = std::result::Result<T, CoreError>;
