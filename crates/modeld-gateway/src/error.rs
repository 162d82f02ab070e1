//! HTTP error mapping
//!
//! Translates [`ModeldError`] into status codes and the daemon's consistent
//! JSON error payload `{"error": ..., "code": ...}`.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use modeld_core::ModeldError;
use serde_json::json;

/// An error ready to be rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Map axum body-extraction failures onto the daemon's error payload:
    /// wrong content type → 415, oversized body → 413, anything else → 400.
    pub fn from_rejection(rejection: JsonRejection) -> Self {
        let status = match &rejection {
            JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            JsonRejection::BytesRejection(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, rejection.body_text())
    }
}

impl From<ModeldError> for ApiError {
    fn from(err: ModeldError) -> Self {
        let status = match &err {
            ModeldError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ModeldError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ModeldError::TooBusy(_) => StatusCode::TOO_MANY_REQUESTS,
            ModeldError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            // The client is gone; this response is never observed.
            ModeldError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ModeldError::LoadFailed { .. }
            | ModeldError::Backend(_)
            | ModeldError::Config(_)
            | ModeldError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.status.as_u16(),
        }));
        (self.status, body).into_response()
    }
}
