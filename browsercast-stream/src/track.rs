//! Media track adapter - turns pushed browser frames into pulled, timestamped video
//!
//! The browser pushes compressed frames whenever the page repaints; the WebRTC
//! pipeline pulls one frame at a time. [`BrowserVideoTrack`] sits in between: it
//! waits on its own broadcaster listener, decodes what arrives and stamps it from
//! a private [`PresentationClock`].

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::broadcaster::{Broadcaster, Listener};
use crate::clock::PresentationClock;
use crate::frame::{decode_image, VideoFrame};

/// Result of one pull on a [`BrowserVideoTrack`]
#[derive(Debug)]
pub enum NextFrame {
    Frame(VideoFrame),
    /// The frame received this cycle could not be decoded
    Skipped,
    /// The track was ended; no more frames will follow
    Ended,
}

#[derive(Debug, Default)]
struct TrackState {
    listener: Option<Arc<Listener>>,
    ended: bool,
}

/// Outgoing video track fed by the broadcaster
pub struct BrowserVideoTrack {
    broadcaster: Arc<Broadcaster>,
    state: Mutex<TrackState>,
    clock: tokio::sync::Mutex<PresentationClock>,
    pace: bool,
}

impl BrowserVideoTrack {
    #[must_use]
    pub fn new(broadcaster: Arc<Broadcaster>, clock: PresentationClock, pace: bool) -> Self {
        Self {
            broadcaster,
            state: Mutex::new(TrackState::default()),
            clock: tokio::sync::Mutex::new(clock),
            pace,
        }
    }

    /// Wait for and produce the next outgoing frame.
    ///
    /// Registers with the broadcaster on first use. Decode failures yield
    /// [`NextFrame::Skipped`] so the caller can simply pull again.
    pub async fn next_frame(&self) -> NextFrame {
        let Some(listener) = self.listener() else {
            return NextFrame::Ended;
        };

        // Pulls are serialised; holding the clock also keeps timestamps in pull order
        let mut clock = self.clock.lock().await;
        let pts = clock.peek();

        let Some(frame) = listener.recv().await else {
            return NextFrame::Ended;
        };

        let data = frame.into_data();
        let decoded = match tokio::task::spawn_blocking(move || decode_image(&data)).await {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(e)) => {
                warn!(listener_id = %listener.id(), pts, error = %e, "Skipping undecodable frame");
                return NextFrame::Skipped;
            }
            Err(e) => {
                warn!(listener_id = %listener.id(), pts, error = %e, "Frame decode task failed");
                return NextFrame::Skipped;
            }
        };

        if self.pace {
            if let Some(at) = clock.release_at(pts) {
                tokio::time::sleep_until(at).await;
            }
        }
        if self.is_ended() {
            return NextFrame::Ended;
        }

        let pts = clock.advance();
        NextFrame::Frame(VideoFrame {
            width: decoded.width,
            height: decoded.height,
            data: decoded.rgb,
            pts,
            time_base: clock.time_base(),
            duration: clock.frame_duration(),
        })
    }

    /// Register with the broadcaster now instead of on the first pull. Idempotent.
    pub fn register(&self) {
        if let Some(listener) = self.listener() {
            debug!(listener_id = %listener.id(), "Video track registered");
        }
    }

    /// Stop the track and release its broadcaster registration. Idempotent.
    pub fn end(&self) {
        let listener = {
            let mut state = self.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
            state.listener.take()
        };

        match listener {
            Some(listener) => {
                listener.unregister();
                debug!(listener_id = %listener.id(), "Video track ended");
            }
            None => debug!("Video track ended before first pull"),
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Whether the track currently holds a broadcaster registration
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.state.lock().listener.is_some()
    }

    fn listener(&self) -> Option<Arc<Listener>> {
        let mut state = self.state.lock();
        if state.ended {
            return None;
        }
        let listener = state
            .listener
            .get_or_insert_with(|| Arc::new(self.broadcaster.register()));
        Some(Arc::clone(listener))
    }
}

impl Drop for BrowserVideoTrack {
    fn drop(&mut self) {
        self.end();
    }
}
