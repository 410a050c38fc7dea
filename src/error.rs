// =============================================================================
// ERROR MODULE
// =============================================================================
// Custom error type for the device directory and its HTTP responses.
//
// Every business failure of the directory (validation, missing references,
// duplicate serial numbers, rejected writes) is reported as 400 Bad Request,
// which is the convention existing clients depend on. Only access-control and
// unexpected infrastructure failures use other status codes.
// =============================================================================

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::ErrorResponse;

pub const DEVICE_NOT_FOUND: &str = "Installation device not found";
pub const DEPARTMENT_NOT_FOUND: &str = "Department not found";

// =============================================================================
// CUSTOM ERROR TYPE
// =============================================================================
#[derive(Debug, Error)]
pub enum AppError {
    // -------------------------------------------------------------------------
    // BUSINESS RULE ERRORS (400)
    // -------------------------------------------------------------------------
    /// A field, query parameter or body failed validation
    #[error("{0}")]
    Validation(String),

    /// Referenced device or department does not exist
    #[error("{0}")]
    NotFound(String),

    /// Store-level unique constraint on the serial number fired
    #[error("An installation device with the same serial number already exists")]
    DuplicateSerial,

    /// Any other write failure after validation passed
    #[error("Action is impossible")]
    ActionImpossible,

    // -------------------------------------------------------------------------
    // ACCESS CONTROL ERRORS
    // -------------------------------------------------------------------------
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // -------------------------------------------------------------------------
    // INTERNAL ERRORS
    // -------------------------------------------------------------------------
    /// Database query failed outside of a classified write
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::BAD_REQUEST, "NOT_FOUND"),
            AppError::DuplicateSerial => (StatusCode::BAD_REQUEST, "DUPLICATE_SERIAL"),
            AppError::ActionImpossible => (StatusCode::BAD_REQUEST, "ACTION_IMPOSSIBLE"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Reclassify a failed INSERT/UPDATE on the devices table.
    ///
    /// PostgreSQL reports unique violations with SQLSTATE 23505; the only
    /// unique column a client can collide on is `fabrique_number`.
    pub fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return AppError::DuplicateSerial;
            }
        }
        tracing::warn!(error = %err, "Device write rejected by the database");
        AppError::ActionImpossible
    }
}

// =============================================================================
// HTTP RESPONSE CONVERSION
// =============================================================================
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        // Infrastructure details stay in the logs
        let message = match &self {
            AppError::Database(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error_code = error_code, error = %self, "Request failed");
        } else {
            tracing::info!(error_code = error_code, message = %message, "Request rejected");
        }

        (status, Json(ErrorResponse::new(error_code, message))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

// =============================================================================
// JSON BODY EXTRACTOR
// =============================================================================
// Axum's own Json extractor answers malformed bodies with 415/422. The
// directory reports every client mistake as 400 with the standard error body,
// so request bodies go through this wrapper instead.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => Err(AppError::Validation(rejection_message(&rejection))),
        }
    }
}

fn rejection_message(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "Expected request with `Content-Type: application/json`".to_string()
        }
        other => other.body_text(),
    }
}
