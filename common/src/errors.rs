//! Application error types.
//!
//! Every failure that may reach a caller is expressed as an [`AppError`].
//! Model-provider failures have no variant here: they are recovered inside
//! the query generator and never cross the engine boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::response::ApiResponse;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Application error taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    /// The backend could not be reached or rejected the credentials.
    #[error("connection error: {0}")]
    Connection(String),

    /// The query text did not match any production of the command grammar.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A mutating or deleting command lacks its required filter.
    #[error("unsafe mutation: {0}")]
    UnsafeMutation(String),

    /// A structured-literal payload could not be parsed.
    #[error("malformed arguments: {0}")]
    MalformedArguments(String),

    /// The backend rejected a validated command at runtime.
    #[error("execution error: {0}")]
    Execution(String),

    /// Request payload failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller did not present an authenticated user.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable error code carried in response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionError,
    UnsupportedOperation,
    UnsafeMutation,
    MalformedArguments,
    ExecutionError,
    ValidationError,
    Unauthorized,
    InternalError,
}

impl ErrorCode {
    /// HTTP status used when this code is returned over HTTP.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::ConnectionError => StatusCode::BAD_GATEWAY,
            ErrorCode::UnsupportedOperation
            | ErrorCode::UnsafeMutation
            | ErrorCode::MalformedArguments => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::ExecutionError | ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AppError {
    /// Returns the wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Connection(_) => ErrorCode::ConnectionError,
            AppError::UnsupportedOperation(_) => ErrorCode::UnsupportedOperation,
            AppError::UnsafeMutation(_) => ErrorCode::UnsafeMutation,
            AppError::MalformedArguments(_) => ErrorCode::MalformedArguments,
            AppError::Execution(_) => ErrorCode::ExecutionError,
            AppError::Validation(_) => ErrorCode::ValidationError,
            AppError::Unauthorized(_) => ErrorCode::Unauthorized,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code().status()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = ?self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = ?self.code(), error = %self, "request rejected");
        }
        (status, Json(ApiResponse::<()>::from_error(&self))).into_response()
    }
}
