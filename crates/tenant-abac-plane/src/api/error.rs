//! API error types and responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use tenant_abac_bridge::FederationError;
use tenant_abac_core::IsolationError;

use crate::core::AccessError;
use crate::storage::StorageError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {message}")]
    BadRequest { code: &'static str, message: String },

    /// Authentication failed; the same token or credential will keep failing
    #[error("Unauthorized: {message}")]
    Unauthorized { code: &'static str, message: String },

    /// Authenticated, but the policy denies the call
    #[error("Forbidden: {message}")]
    Forbidden { code: &'static str, message: String },

    #[error("Not found: {message}")]
    NotFound { code: &'static str, message: String },

    /// An upstream dependency failed; the caller may retry with backoff
    #[error("Unavailable: {message}")]
    Unavailable { code: &'static str, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { code, .. }
            | ApiError::Unauthorized { code, .. }
            | ApiError::Forbidden { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Unavailable { code, .. } => code,
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Only upstream unavailability is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Unavailable { .. })
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest { message, .. }
            | ApiError::Unauthorized { message, .. }
            | ApiError::Forbidden { message, .. }
            | ApiError::NotFound { message, .. }
            | ApiError::Unavailable { message, .. } => message.clone(),
            ApiError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal error");
        }

        let body = ErrorResponse {
            error: self.message(),
            code: self.code().to_string(),
            retryable: self.is_retryable(),
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        let code = err.code();
        let message = err.to_string();
        match err {
            e if e.is_retryable() => ApiError::Unavailable { code, message },
            FederationError::Internal(detail) => ApiError::Internal(detail),
            FederationError::InvalidRequest(_) => ApiError::BadRequest { code, message },
            _ => ApiError::Unauthorized { code, message },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            code: "invalid_request",
            message: rejection.body_text(),
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        let code = err.code();
        let message = err.to_string();
        if err.is_authentication_failure() {
            ApiError::Unauthorized { code, message }
        } else {
            ApiError::Forbidden { code, message }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::NoSuchBucket(_) => ApiError::NotFound {
                code: "no_such_bucket",
                message,
            },
            StorageError::NoSuchKey(_) => ApiError::NotFound {
                code: "no_such_key",
                message,
            },
            StorageError::InvalidKey(_) => ApiError::BadRequest {
                code: "invalid_key",
                message,
            },
            StorageError::Backend(_) => ApiError::Unavailable {
                code: "storage_unavailable",
                message,
            },
        }
    }
}

impl From<IsolationError> for ApiError {
    fn from(err: IsolationError) -> Self {
        match err {
            IsolationError::InvalidResource(_) => ApiError::BadRequest {
                code: "invalid_resource",
                message: err.to_string(),
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}
