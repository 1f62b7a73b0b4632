//! Browsercast streaming layer
//!
//! Fans out frames captured from a headless browser to any number of viewers and
//! carries their input back.
//!
//! ## Architecture
//!
//! - **`Broadcaster`**: Registry of listeners, each with a single-frame slot that
//!   always holds the newest frame
//! - **`ByteStreamViewer`**: Sends raw frames over a message connection and reads
//!   input events from it
//! - **`BrowserVideoTrack`**: Pull-based video source that decodes frames and
//!   stamps them on a 90 kHz clock
//! - **`SessionManager`**: WebRTC offer/answer, session state and teardown
//! - **`InputSink`**: Where decoded viewer input ends up
//!
//! ## Features
//!
//! - Slow viewers only ever miss frames, they never delay the producer
//! - Monotonic presentation timestamps regardless of frame arrival jitter
//! - Exactly-once session teardown with guaranteed listener release
//! - H.264 encoding on dedicated threads with keyframes on viewer request
//!
//! ## Usage
//!
//! ```rust,ignore
//! use browsercast_stream::{Broadcaster, SessionConfig, SessionDescription, SessionManager};
//!
//! let broadcaster = Broadcaster::new();
//! let manager = SessionManager::new(SessionConfig::default(), broadcaster.clone(), input)?;
//!
//! // Frames pushed by the browser reach every connected viewer
//! broadcaster.publish(jpeg_bytes);
//!
//! let negotiated = manager.handle_offer(SessionDescription::offer(sdp)).await?;
//! ```

mod broadcaster;
mod clock;
mod config;
mod encoder;
mod error;
mod frame;
mod input;
mod manager;
mod session;
mod track;
mod types;
mod viewer;

pub use broadcaster::{Broadcaster, BroadcasterStats, Frame, Listener};
pub use clock::{PresentationClock, TimeBase, DEFAULT_FRAME_RATE, VIDEO_CLOCK_RATE};
pub use config::SessionConfig;
pub use encoder::{h264_factory, EncoderFactory, H264Encoder, KeyframeRequest, VideoEncoder};
pub use error::{InputError, Result, StreamError};
pub use frame::{decode_image, DecodedImage, VideoFrame};
pub use input::{dispatch_text, normalize_url, Dispatch, InputAction, InputSink, Modifiers, MouseButton};
pub use manager::{NegotiatedSession, SessionManager};
pub use session::{Session, SessionDescription, SessionInfo, SessionState};
pub use track::{BrowserVideoTrack, NextFrame};
pub use types::{ListenerId, SessionId};
pub use viewer::{ByteStreamViewer, EndReason, EventSource, FrameSink, ViewerMessage, ViewerSummary};
