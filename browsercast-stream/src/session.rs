//! WebRTC viewer session - one peer connection carrying one browser video track

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::encoder::{EncoderFactory, EncoderWorker, KeyframeRequest};
use crate::error::Result;
use crate::track::{BrowserVideoTrack, NextFrame};
use crate::types::SessionId;

/// Session description exchanged with the viewer, `{"sdp": "...", "type": "offer"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "offer".to_string(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "answer".to_string(),
        }
    }
}

/// Connection state of a session
///
/// `New -> Negotiating -> Connected -> {Failed, Closed}`; a session may also fail
/// or close straight from `New` or `Negotiating`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Failed | Self::Closed, _) => false,
            (_, Self::Failed | Self::Closed) => true,
            (Self::New, Self::Negotiating) | (Self::Negotiating, Self::Connected) => true,
            _ => false,
        }
    }
}

/// Snapshot of a session for status output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub frames_sent: u64,
}

/// One WebRTC viewer
pub struct Session {
    id: SessionId,
    state: RwLock<SessionState>,
    peer_connection: Arc<RTCPeerConnection>,
    video_track: Arc<BrowserVideoTrack>,
    output: Arc<TrackLocalStaticSample>,
    keyframe_request: KeyframeRequest,
    pump: Mutex<Option<JoinHandle<()>>>,
    frames_sent: Arc<AtomicU64>,
    created_at: DateTime<Utc>,
    /// Session-limit permit, returned on close
    slot: Mutex<Option<OwnedSemaphorePermit>>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        peer_connection: Arc<RTCPeerConnection>,
        video_track: Arc<BrowserVideoTrack>,
        output: Arc<TrackLocalStaticSample>,
        keyframe_request: KeyframeRequest,
        slot: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            id,
            state: RwLock::new(SessionState::New),
            peer_connection,
            video_track,
            output,
            keyframe_request,
            pump: Mutex::new(None),
            frames_sent: Arc::new(AtomicU64::new(0)),
            created_at: Utc::now(),
            slot: Mutex::new(slot),
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn video_track(&self) -> &Arc<BrowserVideoTrack> {
        &self.video_track
    }

    pub(crate) fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    /// Move to `next` if the transition is legal. Returns whether the state changed.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return false;
        }
        debug!(session_id = %self.id, from = ?*state, to = ?next, "Session state changed");
        *state = next;
        true
    }

    /// Start pulling, encoding and sending frames. Only the first call has an effect.
    ///
    /// `on_failure` runs if the pump stops for any reason other than the track ending.
    pub(crate) fn start_media<F>(&self, encoder_factory: &EncoderFactory, on_failure: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return Ok(());
        }

        let factory = Arc::clone(encoder_factory);
        let keyframe_request = self.keyframe_request.clone();
        let worker = EncoderWorker::spawn(format!("encode-{}", self.id), move || {
            factory(keyframe_request)
        })?;

        let pump_task = run_media_pump(
            self.id.clone(),
            Arc::clone(&self.video_track),
            Arc::clone(&self.output),
            worker,
            Arc::clone(&self.frames_sent),
        );
        *pump = Some(tokio::spawn(async move {
            if pump_task.await == PumpExit::Failed {
                on_failure();
            }
        }));

        info!(session_id = %self.id, "Media started");
        Ok(())
    }

    /// Release everything the session holds. Called once, by the manager.
    pub(crate) async fn close(&self, terminal: SessionState) {
        self.transition(terminal);
        self.video_track.end();

        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.abort();
        }

        if let Err(e) = self.peer_connection.close().await {
            warn!(session_id = %self.id, error = %e, "Failed to close peer connection");
        }

        drop(self.slot.lock().take());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    /// The track ended, the session is already closing
    Ended,
    /// The pump cannot continue, the session must be failed
    Failed,
}

/// Pull frames from the track, encode them and hand them to the RTP packetizer.
async fn run_media_pump(
    session_id: SessionId,
    track: Arc<BrowserVideoTrack>,
    output: Arc<TrackLocalStaticSample>,
    encoder: EncoderWorker,
    frames_sent: Arc<AtomicU64>,
) -> PumpExit {
    let exit = loop {
        let frame = match track.next_frame().await {
            NextFrame::Frame(frame) => frame,
            NextFrame::Skipped => continue,
            NextFrame::Ended => break PumpExit::Ended,
        };

        let duration = frame.duration;
        let data = match encoder.encode(frame).await {
            Ok(data) if data.is_empty() => continue,
            Ok(data) => data,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Stopping media after encoder failure");
                break PumpExit::Failed;
            }
        };

        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        match output.write_sample(&sample).await {
            Ok(()) => {
                frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => debug!(session_id = %session_id, error = %e, "Dropped video sample"),
        }
    };

    debug!(
        session_id = %session_id,
        frames_sent = frames_sent.load(Ordering::Relaxed),
        exit = ?exit,
        "Media pump stopped"
    );
    exit
}
