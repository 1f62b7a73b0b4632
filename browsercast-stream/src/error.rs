use thiserror::Error;

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Session limit reached (max {0})")]
    SessionLimit(usize),

    #[error("Session manager is shutting down")]
    ShuttingDown,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("Frame encode failed: {0}")]
    Encode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Input rejected: {0}")]
    InputRejected(String),
}

/// Why an inbound input record was dropped
#[derive(Error, Debug)]
pub enum InputError {
    #[error("malformed input record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid {action} input: {reason}")]
    Invalid {
        action: &'static str,
        reason: &'static str,
    },
}
