// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use browsercast_browser::BrowserError;
use browsercast_stream::StreamError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
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

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert streaming errors to HTTP errors
impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::InvalidDescription(msg) => AppError::bad_request(msg),
            StreamError::SessionNotFound(id) => AppError::not_found(format!("Session not found: {id}")),
            StreamError::SessionLimit(_) | StreamError::ShuttingDown => {
                AppError::service_unavailable(err.to_string())
            }
            StreamError::InputRejected(msg) => AppError::bad_gateway(msg),
            StreamError::WebRtc(e) => {
                tracing::error!("WebRTC error: {}", e);
                AppError::internal_server_error("WebRTC negotiation failed")
            }
            StreamError::Decode(_) | StreamError::Encode(_) | StreamError::Transport(_) => {
                tracing::error!("Streaming error: {}", err);
                AppError::internal_server_error("Internal server error")
            }
        }
    }
}

/// Convert browser errors to HTTP errors
impl From<BrowserError> for AppError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::NotRunning => AppError::conflict("Browser is not running, POST /start first"),
            BrowserError::NavigationFailed { .. } | BrowserError::Cdp(_) => {
                AppError::bad_gateway(err.to_string())
            }
            BrowserError::Timeout { .. } => AppError::new(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
            BrowserError::ChromeNotFound
            | BrowserError::LaunchFailed { .. }
            | BrowserError::ScreencastFailed(_)
            | BrowserError::Disconnected => {
                tracing::error!("Browser error: {}", err);
                AppError::internal_server_error(err.to_string())
            }
        }
    }
}

/// Convert serde_json errors to HTTP errors
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::bad_request(format!("Invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_status() {
        let cases = [
            (StreamError::InvalidDescription("bad".into()), StatusCode::BAD_REQUEST),
            (StreamError::SessionLimit(4), StatusCode::SERVICE_UNAVAILABLE),
            (StreamError::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
            (StreamError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (StreamError::Encode("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_browser_error_status() {
        assert_eq!(AppError::from(BrowserError::NotRunning).status, StatusCode::CONFLICT);
        assert_eq!(
            AppError::from(BrowserError::Timeout {
                timeout_ms: 1,
                context: "x".into()
            })
            .status,
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = AppError::not_found("Session not found: abc").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Session not found: abc");
        assert_eq!(json["status"], 404);
    }
}
