//! Alert fan-out to notification providers.
//!
//! [`SenderRegistry`] maps a provider kind to a [`SenderFactory`]; the
//! [`Dispatcher`] resolves the providers for an alert and delivers to each of
//! them in its own task with bounded retries.

pub mod dispatcher;
pub mod error;
pub mod providers;
pub mod registry;

pub use dispatcher::{DispatchReport, Dispatcher, ProviderOutcome};
pub use error::DispatchError;
pub use registry::{NotificationSender, SenderFactory, SenderRegistry};
