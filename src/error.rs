// src/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::response::{Envelope, ErrorBody, Metadata};

/// Enumerated error codes surfaced to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCredentials,
    SessionAlreadyActive,
    SessionInvalidated,
    TokenRequired,
    TokenInvalid,
    Forbidden,
    PermissionDenied,
    StudentAccessOnly,
    AdminAccessOnly,
    ValidationError,
    InvalidId,
    NotFound,
    Conflict,
    DuplicateTargetRule,
    ExamNotAvailable,
    InvalidEntryToken,
    ExamNotPublished,
    NotExamAuthor,
    NoQuestions,
    ExamNotDraft,
    RateLimitExceeded,
    InternalError,
}

impl ErrorCode {
    /// Human-readable message for each code. The WebSocket path and logs use
    /// their own wording; this catalog is only for the HTTP envelope.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::InvalidCredentials => "Invalid credentials.",
            ErrorCode::SessionAlreadyActive => {
                "Another session is already active. Ask an admin to reset it."
            }
            ErrorCode::SessionInvalidated => "Your session has ended. Please log in again.",
            ErrorCode::TokenRequired => "An authentication token is required.",
            ErrorCode::TokenInvalid => "The authentication token is invalid.",
            ErrorCode::Forbidden => "You do not have access to this resource.",
            ErrorCode::PermissionDenied => "Permission denied.",
            ErrorCode::StudentAccessOnly => "This resource is restricted to students.",
            ErrorCode::AdminAccessOnly => "This resource is restricted to administrators.",
            ErrorCode::ValidationError => "Validation failed. Check your input.",
            ErrorCode::InvalidId => "Invalid identifier format.",
            ErrorCode::NotFound => "Resource not found.",
            ErrorCode::Conflict => "The resource already exists.",
            ErrorCode::DuplicateTargetRule => "An identical target rule already exists.",
            ErrorCode::ExamNotAvailable => "This exam is not currently available.",
            ErrorCode::InvalidEntryToken => "The exam entry token is invalid.",
            ErrorCode::ExamNotPublished => "This exam has not been published.",
            ErrorCode::NotExamAuthor => "You are not the author of this exam.",
            ErrorCode::NoQuestions => "This exam has no questions.",
            ErrorCode::ExamNotDraft => "This exam is not in DRAFT status.",
            ErrorCode::RateLimitExceeded => "Too many requests. Try again later.",
            ErrorCode::InternalError => "An internal server error occurred.",
        }
    }
}

/// Global application error enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 401
    InvalidCredentials,
    SessionInvalidated,
    TokenRequired,
    TokenInvalid,

    // 403
    Forbidden,
    PermissionDenied,
    StudentAccessOnly,
    AdminAccessOnly,
    NotExamAuthor,

    // 400
    Validation(HashMap<String, String>),
    InvalidId,
    ExamNotAvailable,
    InvalidEntryToken,
    NoQuestions,
    ExamNotDraft,

    // 404
    NotFound,
    ExamNotPublished,

    // 409
    Conflict,
    DuplicateTargetRule,
    SessionAlreadyActive,

    // 500
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, ErrorCode::InvalidCredentials),
            AppError::SessionInvalidated => (StatusCode::UNAUTHORIZED, ErrorCode::SessionInvalidated),
            AppError::TokenRequired => (StatusCode::UNAUTHORIZED, ErrorCode::TokenRequired),
            AppError::TokenInvalid => (StatusCode::UNAUTHORIZED, ErrorCode::TokenInvalid),
            AppError::Forbidden => (StatusCode::FORBIDDEN, ErrorCode::Forbidden),
            AppError::PermissionDenied => (StatusCode::FORBIDDEN, ErrorCode::PermissionDenied),
            AppError::StudentAccessOnly => (StatusCode::FORBIDDEN, ErrorCode::StudentAccessOnly),
            AppError::AdminAccessOnly => (StatusCode::FORBIDDEN, ErrorCode::AdminAccessOnly),
            AppError::NotExamAuthor => (StatusCode::FORBIDDEN, ErrorCode::NotExamAuthor),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::ValidationError),
            AppError::InvalidId => (StatusCode::BAD_REQUEST, ErrorCode::InvalidId),
            AppError::ExamNotAvailable => (StatusCode::BAD_REQUEST, ErrorCode::ExamNotAvailable),
            AppError::InvalidEntryToken => (StatusCode::BAD_REQUEST, ErrorCode::InvalidEntryToken),
            AppError::NoQuestions => (StatusCode::BAD_REQUEST, ErrorCode::NoQuestions),
            AppError::ExamNotDraft => (StatusCode::BAD_REQUEST, ErrorCode::ExamNotDraft),
            AppError::NotFound => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            AppError::ExamNotPublished => (StatusCode::NOT_FOUND, ErrorCode::ExamNotPublished),
            AppError::Conflict => (StatusCode::CONFLICT, ErrorCode::Conflict),
            AppError::DuplicateTargetRule => (StatusCode::CONFLICT, ErrorCode::DuplicateTargetRule),
            AppError::SessionAlreadyActive => (StatusCode::CONFLICT, ErrorCode::SessionAlreadyActive),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Converts the error into the standard JSON envelope with the matching
/// HTTP status code. Internal details are logged, never sent to clients.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(ref msg) = self {
            tracing::error!("Internal server error: {}", msg);
        }

        let (status, code) = self.status_and_code();

        let fields = match self {
            AppError::Validation(fields) => Some(fields),
            _ => None,
        };

        let body = Envelope {
            data: serde_json::Value::Null,
            error: Some(ErrorBody {
                code,
                message: code.message().to_string(),
                fields,
            }),
            pagination: None,
            metadata: Metadata::build(),
        };

        (status, Json(body)).into_response()
    }
}

/// Allows using `?` on database queries. Unique violations map to Conflict
/// so duplicate inserts surface as 409 without per-call-site matching.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict,
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Flattens validator output into a field -> first-message map.
pub fn validation_fields(errors: &validator::ValidationErrors) -> HashMap<String, String> {
    errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let msg = errs
                .first()
                .and_then(|e| e.message.as_ref())
                .map(|m| m.to_string())
                .unwrap_or_else(|| "invalid value".to_string());
            (field.to_string(), msg)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::SessionAlreadyActive).unwrap();
        assert_eq!(json, "\"SESSION_ALREADY_ACTIVE\"");
        let json = serde_json::to_string(&ErrorCode::InvalidEntryToken).unwrap();
        assert_eq!(json, "\"INVALID_ENTRY_TOKEN\"");
    }

    #[test]
    fn statuses_match_error_classes() {
        assert_eq!(
            AppError::SessionInvalidated.status_and_code().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::SessionAlreadyActive.status_and_code().0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::ExamNotAvailable.status_and_code().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotExamAuthor.status_and_code().0,
            StatusCode::FORBIDDEN
        );
    }
}
