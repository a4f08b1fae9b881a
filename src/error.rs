use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message) = match self {
            ApiError::Database(ref err) => {
                if err.contains("connection") {
                    tracing::error!("PostgreSQL connection issue: {}", err);
                } else if err.contains("timeout") {
                    tracing::warn!("PostgreSQL operation timeout: {}", err);
                } else {
                    tracing::error!("PostgreSQL database error: {}", err);
                }

                // Never hand driver details to clients
                let user_message = if err.contains("timeout") {
                    "Database operation timed out, please try again"
                } else if err.contains("unavailable") || err.contains("connection") {
                    "Database service is temporarily unavailable"
                } else {
                    "A database error occurred"
                };

                ("DATABASE_ERROR", user_message.to_string())
            }
            ApiError::Validation(message) => {
                tracing::debug!("Validation error: {}", message);
                ("VALIDATION_ERROR", message)
            }
            ApiError::NotFound(message) => {
                tracing::debug!("Resource not found: {}", message);
                ("NOT_FOUND", message)
            }
            ApiError::Unauthorized(message) => {
                tracing::debug!("Unauthenticated request: {}", message);
                ("UNAUTHORIZED", message)
            }
            ApiError::Forbidden(message) => {
                tracing::debug!("Forbidden request: {}", message);
                ("FORBIDDEN", message)
            }
            ApiError::Conflict(message) => {
                tracing::debug!("Constraint conflict: {}", message);
                ("CONFLICT", message)
            }
            ApiError::Internal(ref err) => {
                tracing::error!("Internal server error: {:#}", err);
                ("INTERNAL_ERROR", "An internal server error occurred".to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

// PostgreSQL error mapping
impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.code() {
            Some(&SqlState::UNIQUE_VIOLATION) => {
                let constraint = err
                    .as_db_error()
                    .and_then(|db| db.constraint())
                    .unwrap_or_default();
                let message = if constraint.contains("username") {
                    "Username already exists"
                } else if constraint.contains("user_question") {
                    "User has already voted on this question"
                } else {
                    "Resource already exists"
                };
                ApiError::Conflict(message.to_string())
            }
            Some(&SqlState::FOREIGN_KEY_VIOLATION) => {
                ApiError::Validation("Referenced resource does not exist".to_string())
            }
            Some(&SqlState::NOT_NULL_VIOLATION) => {
                let column = err
                    .as_db_error()
                    .and_then(|db| db.column())
                    .map(|c| format!("Required field '{}' is missing", c))
                    .unwrap_or_else(|| "Required field is missing".to_string());
                ApiError::Validation(column)
            }
            Some(&SqlState::CHECK_VIOLATION) => {
                ApiError::Validation("Data validation constraint violated".to_string())
            }
            Some(&SqlState::INVALID_TEXT_REPRESENTATION) | Some(&SqlState::INVALID_DATETIME_FORMAT) => {
                ApiError::Validation("Invalid data format provided".to_string())
            }
            Some(&SqlState::NUMERIC_VALUE_OUT_OF_RANGE) => {
                ApiError::Validation("Numeric value is out of range".to_string())
            }
            Some(&SqlState::STRING_DATA_RIGHT_TRUNCATION) => {
                ApiError::Validation("Text data exceeds maximum length".to_string())
            }
            Some(&SqlState::CONNECTION_EXCEPTION)
            | Some(&SqlState::CONNECTION_DOES_NOT_EXIST)
            | Some(&SqlState::CONNECTION_FAILURE) => {
                tracing::error!("PostgreSQL connection error: {}", err);
                ApiError::Database("Database connection unavailable".to_string())
            }
            Some(&SqlState::INSUFFICIENT_PRIVILEGE) => {
                tracing::error!("PostgreSQL privilege error: {}", err);
                ApiError::Database("Database access denied".to_string())
            }
            None if err.is_closed() => {
                tracing::error!("PostgreSQL connection closed: {}", err);
                ApiError::Database("Database connection unavailable".to_string())
            }
            _ => {
                tracing::error!("Unhandled PostgreSQL error: {} (code: {:?})", err, err.code());
                ApiError::Database("Database operation failed".to_string())
            }
        }
    }
}

// Connection pool error mapping
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Timeout(_) => {
                tracing::warn!("Database connection pool timeout: {}", err);
                ApiError::Database("Database connection timeout".to_string())
            }
            deadpool_postgres::PoolError::Closed => {
                tracing::error!("Database connection pool is closed: {}", err);
                ApiError::Database("Database service unavailable".to_string())
            }
            deadpool_postgres::PoolError::NoRuntimeSpecified => {
                tracing::error!("Database pool runtime error: {}", err);
                ApiError::Internal(anyhow::anyhow!("Database configuration error"))
            }
            deadpool_postgres::PoolError::PostCreateHook(_) => {
                tracing::error!("Database connection setup error: {}", err);
                ApiError::Database("Database connection setup failed".to_string())
            }
            _ => {
                tracing::error!("Database connection pool error: {}", err);
                ApiError::Database("Database connection unavailable".to_string())
            }
        }
    }
}

// Result type alias for convenience
pub type ApiResult<T> = Result<T, ApiError>;
