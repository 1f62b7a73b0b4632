//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// WebRTC session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// STUN/TURN server URLs
    pub ice_servers: Vec<String>,
    /// Nominal outgoing frame rate
    pub frame_rate: u32,
    /// Presentation clock rate (Hz)
    pub clock_rate: u32,
    /// Rebuild the encoder (forcing an IDR frame) every n frames, 0 = only on demand
    pub keyframe_interval: u32,
    /// Upper bound on ICE candidate gathering while building an answer
    pub ice_gathering_timeout: Duration,
    /// Maximum number of concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
    /// Never release frames faster than the nominal frame rate
    pub pace_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            frame_rate: 30,
            clock_rate: 90_000,
            keyframe_interval: 120,
            ice_gathering_timeout: Duration::from_secs(5),
            max_sessions: 0,
            pace_frames: true,
        }
    }
}
