//! Error taxonomy for the alerting core.
//!
//! Transient check failures never surface here: checkers turn them into
//! failing heartbeats. What remains are configuration errors (rejected before
//! scheduling), storage errors, incident lifecycle violations and on-call
//! resolution errors.

use thiserror::Error;
use uuid::Uuid;

use crate::incident::IncidentError;
use crate::notify::DispatchError;
use crate::oncall::OnCallError;

/// A monitor (or other operator-authored definition) is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    OutOfRange { field: &'static str, value: u64, min: u64, max: u64 },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField { field, reason: reason.into() }
    }

    pub fn target(reason: impl Into<String>) -> Self {
        Self::InvalidTarget(reason.into())
    }
}

/// Persistence layer failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database query failed: {0}")]
    Database(#[from] libsql::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Umbrella error returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Incident(#[from] IncidentError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    OnCall(#[from] OnCallError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("No pending recommendation for ticket {0}")]
    NoPendingRecommendation(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }
}
