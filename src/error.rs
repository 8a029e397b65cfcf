use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Invalid payment signature")]
    SignatureInvalid,

    #[error("Payment amount mismatch: callback {callback}, order {order}")]
    AmountMismatch { callback: f64, order: f64 },

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::DatabaseError(DatabaseError::NotFound),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::DatabaseError(DatabaseError::Duplicate)
            }
            _ => AppError::DatabaseError(DatabaseError::QueryError(err.to_string())),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamFailure(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseError(DatabaseError::QueryError(err.to_string()))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl AppError {
    /// True when the error stems from a storage-level uniqueness constraint.
    /// Callers that treat duplicate inserts as an expected outcome key off this.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, AppError::DatabaseError(DatabaseError::Duplicate))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Internal detail stays in the logs; clients get the display string,
        // which is generic for the 5xx variants.
        let message = match self {
            AppError::DatabaseError(_)
            | AppError::ConfigError(_)
            | AppError::InternalError(_) => "服务器错误，请稍后重试".to_string(),
            AppError::UpstreamFailure(_) => "服务暂时不可用，请稍后重试".to_string(),
            other => other.to_string(),
        };
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": message
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::SignatureInvalid => StatusCode::FORBIDDEN,
            AppError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AppError::NotFound("content".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("order".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::InvalidInput("reason".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::SignatureInvalid.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Conflict("dup".into()).status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let app_err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(
            app_err,
            AppError::DatabaseError(DatabaseError::NotFound)
        ));
    }

    #[test]
    fn test_internal_errors_do_not_leak_detail() {
        let err = AppError::InternalError("pool exhausted at 10.0.0.3".into());
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = AppError::DatabaseError(DatabaseError::QueryError("secret".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unique_violation_helper() {
        assert!(AppError::DatabaseError(DatabaseError::Duplicate).is_unique_violation());
        assert!(!AppError::Conflict("x".into()).is_unique_violation());
    }
}
