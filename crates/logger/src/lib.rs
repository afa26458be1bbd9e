//! Shared tracing setup for the Uppe binaries.

mod subscriber;

pub use subscriber::{LogFormat, init, init_tracing, init_with};
