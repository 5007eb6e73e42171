use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;
use tracing::{error, warn};

use crate::{clients::ai::GenerationError, store::StoreError};

pub type AppResult<T> = Result<T, AppError>;
pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the operation and surfaces to the caller.
    Fatal,
    /// Logged and swallowed; the primary write stands.
    NonFatal,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no diaries for pet {pet_id} between {start} and {end}")]
    EmptyPeriod {
        pet_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("content generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("upstream service failed: {0}")]
    Upstream(String),
    #[error("enrichment failed: {0}")]
    Enrichment(String),
    #[error("side index write failed: {0}")]
    SideIndex(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Enrichment(_) | Self::SideIndex(_) => Severity::NonFatal,
            _ => Severity::Fatal,
        }
    }
}

pub trait Degrade<T> {
    /// Swallows non-fatal failures with a warning; fatal ones pass through.
    fn degrade(self, step: &'static str) -> ServiceResult<Option<T>>;
}

impl<T> Degrade<T> for ServiceResult<T> {
    fn degrade(self, step: &'static str) -> ServiceResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.severity() == Severity::NonFatal => {
                warn!(step, error = %err, "continuing without side effect");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        match &value {
            ServiceError::NotFound(_) | ServiceError::EmptyPeriod { .. } => {
                AppError::new(StatusCode::NOT_FOUND, value.to_string())
            }
            ServiceError::InvalidInput(_) => AppError::bad_request(value.to_string()),
            ServiceError::Generation(_) | ServiceError::Upstream(_) => {
                warn!(error = %value, "upstream dependency failed");
                AppError::new(StatusCode::BAD_GATEWAY, value.to_string())
            }
            _ => {
                error!(error = %value, "request failed");
                AppError::internal(value)
            }
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::bad_request(value.to_string())
    }
}
