//! HTTP error responses.
//!
//! Every failure leaves the server as `{"error": CODE, "message": text}` with
//! a status derived from the domain error.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use stagehand::Error;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Conflict,
    NotFound,
    GenerationFailed,
    StaleToken,
    UpstreamUnavailable,
    UnknownComponent,
    InvalidInput,
    PayloadTooLarge,
    InternalError,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::Conflict | ErrorCode::StaleToken => StatusCode::CONFLICT,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::GenerationFailed | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::UnknownComponent | ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(rename = "error")]
    pub code: ErrorCode,
    pub message: String,
    /// Captured stderr of a failed generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::Conflict(_) => ErrorCode::Conflict,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Generation { .. } => ErrorCode::GenerationFailed,
            Error::StaleToken { .. } => ErrorCode::StaleToken,
            Error::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            Error::UnknownComponent(_) => ErrorCode::UnknownComponent,
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::Internal(_) => ErrorCode::InternalError,
        };
        let details = match &err {
            Error::Generation { stderr, .. } if !stderr.is_empty() => Some(stderr.clone()),
            _ => None,
        };
        Self {
            code,
            message: format!("{err:#}"),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        if status.is_server_error() {
            error!(code = ?self.code, message = %self.message, "request failed");
        } else {
            warn!(code = ?self.code, message = %self.message, "request rejected");
        }
        (status, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
