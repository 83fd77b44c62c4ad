//! Domain error types for the C2.
//!
//! Uses thiserror for ergonomic error handling with automatic Display
//! implementations; every variant maps onto one wire status code and the
//! `{"error": "..."}` envelope.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

/// Challenge sent alongside every 401.
const CHALLENGE: &str = "SECCHIWARE-HMAC-256 realm=\"Access to C2\"";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed request content or parameters.
    #[error("{0}")]
    Validation(String),

    /// Any failure of the signing checks.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    UnsupportedMedia(String),

    /// A node answered a forwarded request with something unexpected.
    #[error("{0}")]
    Upstream(String),

    /// A node could not be reached at all.
    #[error("The requested environment could not be reached")]
    NodeUnreachable,

    /// Database, broker or IO failure; details stay in the log.
    #[error("{0}")]
    Internal(String),
}

/// Error envelope of every non-2xx JSON response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::NodeUnreachable => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                "Something went wrong when handling the request".to_string()
            }
            other => other.to_string(),
        };

        let mut builder = HttpResponse::build(self.status_code());
        if matches!(self, AppError::Unauthorized(_)) {
            builder.insert_header(("WWW-Authenticate", CHALLENGE));
        }
        builder.json(ErrorBody { error: message })
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Internal(format!("database error: {err}"))
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
