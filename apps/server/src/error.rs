use std::io::Error as IoError;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use uppe_core::error::StorageError;
use uppe_core::incident::IncidentError;
use uppe_core::notify::DispatchError;
use uppe_core::oncall::OnCallError;
use uppe_core::{CoreError, config::ConfigError};

/// Startup failures of the server binary
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Error returned by route handlers, rendered as `{"error": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    BadRequest(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(error) => core_status(error),
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

fn core_status(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::NotFound { .. } | CoreError::NoPendingRecommendation(_) => StatusCode::NOT_FOUND,
        CoreError::Incident(IncidentError::NotFound(_)) => StatusCode::NOT_FOUND,
        CoreError::Incident(IncidentError::InvalidTransition { .. } | IncidentError::AlreadyResolved(_)) => {
            StatusCode::CONFLICT
        }
        CoreError::OnCall(OnCallError::ScheduleNotFound(_)) => StatusCode::NOT_FOUND,
        CoreError::OnCall(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Dispatch(DispatchError::ProviderNotFound(_)) => StatusCode::NOT_FOUND,
        CoreError::Dispatch(DispatchError::InvalidConfig(_) | DispatchError::UnknownKind(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CoreError::Storage(StorageError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
