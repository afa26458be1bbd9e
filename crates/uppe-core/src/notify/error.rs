use thiserror::Error;
use uuid::Uuid;

use crate::error::StorageError;

/// Errors raised while delivering alerts
///
/// A failing provider never aborts the dispatch of the others; these errors
/// end up in that provider's outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    #[error("No sender registered for provider kind '{0}'")]
    UnknownKind(String),

    #[error("Notification provider {0} not found")]
    ProviderNotFound(Uuid),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Api { service: &'static str, status: u16, body: String },

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}
