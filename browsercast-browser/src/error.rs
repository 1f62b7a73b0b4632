//! Browser-side error types

use browsercast_stream::StreamError;
use thiserror::Error;

/// Result type for browser operations
pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {context}")]
    LaunchFailed { context: String },

    #[error("Chrome not found, install Chrome/Chromium or set browser.chrome_path")]
    ChromeNotFound,

    #[error("browser is not running")]
    NotRunning,

    #[error("navigation failed for {url}: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("screencast failed: {0}")]
    ScreencastFailed(String),

    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("DevTools connection closed")]
    Disconnected,
}

impl From<BrowserError> for StreamError {
    fn from(err: BrowserError) -> Self {
        StreamError::InputRejected(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = BrowserError::NavigationFailed {
            url: "https://example.com".into(),
            reason: "net::ERR_NAME_NOT_RESOLVED".into(),
        };
        assert!(err.to_string().contains("https://example.com"));
        assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));

        let err = BrowserError::Timeout {
            timeout_ms: 30_000,
            context: "CDP Page.navigate".into(),
        };
        assert_eq!(err.to_string(), "timed out after 30000ms: CDP Page.navigate");
    }

    #[test]
    fn test_into_stream_error() {
        let err: StreamError = BrowserError::Cdp("Target closed".into()).into();
        match err {
            StreamError::InputRejected(message) => assert!(message.contains("Target closed")),
            other => panic!("expected InputRejected, got: {other:?}"),
        }
    }
}
