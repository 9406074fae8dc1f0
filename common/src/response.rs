//! API response wrapper types.
//!
//! Provides the single success-flag-plus-payload shape returned by every
//! engine operation and every HTTP endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult, ErrorCode};
use crate::models::query::QueryPayload;

/// Standard response wrapper.
///
/// `data` is present on success, `error` and `code` on failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded.
    pub success: bool,

    /// Payload (present on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Human-readable error message (present on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Machine-readable error code (present on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,

    /// Response metadata.
    pub meta: ResponseMeta,
}

/// The normalized result of executing a command.
pub type ResultEnvelope = ApiResponse<QueryPayload>;

/// Response metadata.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    /// Request ID for tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Response timestamp.
    pub timestamp: DateTime<Utc>,

    /// Processing time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Service name that handled the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            request_id: None,
            timestamp: Utc::now(),
            duration_ms: None,
            service: None,
        }
    }
}

impl<T> ApiResponse<T> {
    /// Creates a successful response with data.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            meta: ResponseMeta::default(),
        }
    }

    /// Creates a failed response from an application error.
    pub fn from_error(error: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            code: Some(error.code()),
            meta: ResponseMeta::default(),
        }
    }

    /// Folds a result into an envelope. Never fails.
    pub fn from_result(result: AppResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Sets the request ID on the response.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.meta.request_id = Some(request_id.into());
        self
    }

    /// Sets the duration on the response.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.meta.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the service name on the response.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.meta.service = Some(service.into());
        self
    }

    /// HTTP status matching this envelope.
    pub fn status(&self) -> axum::http::StatusCode {
        self.code
            .map(ErrorCode::status)
            .unwrap_or(axum::http::StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_has_no_data() {
        let env: ApiResponse<u32> =
            ApiResponse::from_result(Err(AppError::UnsupportedOperation("DROP".into())));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "UNSUPPORTED_OPERATION");
        assert!(json.get("data").is_none());
        assert!(json["error"].as_str().unwrap().contains("DROP"));
    }

    #[test]
    fn test_ok_envelope_status() {
        let env = ApiResponse::ok(1u8).with_duration(12).with_service("query-service");
        assert!(env.success);
        assert_eq!(env.status(), axum::http::StatusCode::OK);
        assert_eq!(env.meta.duration_ms, Some(12));
    }
}
