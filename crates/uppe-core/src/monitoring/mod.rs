/// Monitoring engine module - probes targets on a schedule
///
/// This module is responsible for:
/// - Executing the per-kind checks
/// - Scheduling checks with retries and a global concurrency bound
/// - Rejecting malformed monitors before they are scheduled
pub mod checker;
pub mod checkers;
pub mod executor;
pub mod scheduler;
pub mod validation;

pub use checker::{Checker, CheckerRegistry, Probe};
pub use executor::MonitoringExecutor;
pub use scheduler::{CheckReport, MonitoringScheduler};
pub use validation::validate_monitor;
