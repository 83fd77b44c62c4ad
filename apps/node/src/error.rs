//! Domain error type mapping onto the wire error envelope.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

/// Challenge sent alongside every 401.
const CHALLENGE: &str = "SECCHIWARE-HMAC-256 realm=\"Access to node\"";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    UnsupportedMedia(String),

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

/// Convenience alias used by every handler.
pub type AppResult<T> = Result<T, AppError>;
