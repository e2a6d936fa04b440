use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use imagevault_core::CoreError;
use serde_json::json;
use std::fmt;

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP-facing error envelope. Grounded in the teacher's `AppError`: a
/// bare `{status, message}` pair, never a backtrace.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

/// Maps every `CoreError` variant to the status code its failure mode
/// warrants, the way the teacher's `From<MediaError> for AppError` does.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::NotFound(_) => Self::not_found(err.to_string()),
            CoreError::PathMissing(_)
            | CoreError::DangerousPath(_)
            | CoreError::UnsupportedArchiveKind(_)
            | CoreError::UnsupportedOrMissingSource(_)
            | CoreError::InvalidInput(_)
            | CoreError::InputTooLarge { .. } => Self::bad_request(err.to_string()),
            CoreError::Cancelled(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            CoreError::NoCacheFolderAvailable(_) => Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
