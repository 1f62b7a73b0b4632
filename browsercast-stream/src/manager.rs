//! Session manager - negotiates, tracks and tears down WebRTC viewer sessions
//!
//! This module provides:
//! - Offer/answer negotiation for new viewers
//! - Connection state tracking driven by the peer connection callbacks
//! - Data-channel input forwarding
//! - Exactly-once teardown, which also releases the session's broadcaster listener

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::broadcaster::Broadcaster;
use crate::clock::PresentationClock;
use crate::config::SessionConfig;
use crate::encoder::{h264_factory, EncoderFactory, KeyframeRequest};
use crate::error::{Result, StreamError};
use crate::input::{dispatch_text, InputSink};
use crate::session::{Session, SessionDescription, SessionInfo, SessionState};
use crate::track::BrowserVideoTrack;
use crate::types::SessionId;

/// Answer produced for an accepted offer
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    pub session_id: SessionId,
    pub answer: SessionDescription,
}

/// Owns every active WebRTC viewer session
pub struct SessionManager {
    config: SessionConfig,
    api: API,
    broadcaster: Arc<Broadcaster>,
    input: Arc<dyn InputSink>,
    encoder_factory: EncoderFactory,
    sessions: DashMap<SessionId, Arc<Session>>,
    /// One permit per allowed session; `None` when unlimited
    slots: Option<Arc<Semaphore>>,
    shutting_down: AtomicBool,
}

impl SessionManager {
    /// Create a manager producing H.264 video
    pub fn new(
        config: SessionConfig,
        broadcaster: Arc<Broadcaster>,
        input: Arc<dyn InputSink>,
    ) -> Result<Arc<Self>> {
        let factory = h264_factory(config.keyframe_interval);
        Self::with_encoder(config, broadcaster, input, factory)
    }

    /// Create a manager with a custom encoder factory
    pub fn with_encoder(
        config: SessionConfig,
        broadcaster: Arc<Broadcaster>,
        input: Arc<dyn InputSink>,
        encoder_factory: EncoderFactory,
    ) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!(
            ice_servers = config.ice_servers.len(),
            frame_rate = config.frame_rate,
            max_sessions = config.max_sessions,
            "Session manager initialized"
        );

        let slots = (config.max_sessions > 0).then(|| Arc::new(Semaphore::new(config.max_sessions)));

        Ok(Arc::new(Self {
            config,
            api,
            broadcaster,
            input,
            encoder_factory,
            sessions: DashMap::new(),
            slots,
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// Accept a viewer offer and answer it.
    ///
    /// A negotiation error tears the new session down as failed before being
    /// returned.
    pub async fn handle_offer(self: &Arc<Self>, offer: SessionDescription) -> Result<NegotiatedSession> {
        if offer.sdp_type != "offer" {
            return Err(StreamError::InvalidDescription(format!(
                "expected an offer, got \"{}\"",
                offer.sdp_type
            )));
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(StreamError::ShuttingDown);
        }
        // The slot is taken before the first await so concurrent offers cannot overshoot
        let slot = self.reserve_slot()?;

        let session = self.create_session(slot).await?;
        let session_id = session.id().clone();

        // shutdown() may have taken its snapshot while the session was being built
        if self.shutting_down.load(Ordering::SeqCst) {
            self.teardown(&session_id, SessionState::Closed).await;
            return Err(StreamError::ShuttingDown);
        }
        session.transition(SessionState::Negotiating);

        match self.negotiate(&session, offer.sdp).await {
            Ok(answer) => {
                info!(
                    session_id = %session_id,
                    total_sessions = self.sessions.len(),
                    "Session negotiated"
                );
                Ok(NegotiatedSession { session_id, answer })
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Negotiation failed");
                self.teardown(&session_id, SessionState::Failed).await;
                Err(e)
            }
        }
    }

    fn reserve_slot(&self) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(slots) = &self.slots else {
            return Ok(None);
        };
        match Arc::clone(slots).try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => {
                warn!(
                    current_sessions = self.sessions.len(),
                    max_sessions = self.config.max_sessions,
                    "Session limit reached"
                );
                Err(StreamError::SessionLimit(self.config.max_sessions))
            }
        }
    }

    async fn create_session(self: &Arc<Self>, slot: Option<OwnedSemaphorePermit>) -> Result<Arc<Session>> {
        let rtc_config = RTCConfiguration {
            ice_servers: if self.config.ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: self.config.ice_servers.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };
        let peer_connection = Arc::new(self.api.new_peer_connection(rtc_config).await?);

        let session_id = SessionId::generate();
        let output = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: self.config.clock_rate,
                ..Default::default()
            },
            "video".to_owned(),
            format!("browsercast-{session_id}"),
        ));

        let rtp_sender = match peer_connection
            .add_track(Arc::clone(&output) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                let _ = peer_connection.close().await;
                return Err(e.into());
            }
        };

        let keyframe_request = KeyframeRequest::default();
        tokio::spawn(read_rtcp(
            session_id.clone(),
            rtp_sender,
            keyframe_request.clone(),
        ));

        let video_track = Arc::new(BrowserVideoTrack::new(
            Arc::clone(&self.broadcaster),
            PresentationClock::new(self.config.clock_rate, self.config.frame_rate),
            self.config.pace_frames,
        ));
        // The session owns its listener from the start, so teardown always releases it
        video_track.register();

        let session = Arc::new(Session::new(
            session_id.clone(),
            Arc::clone(&peer_connection),
            video_track,
            output,
            keyframe_request,
            slot,
        ));
        self.sessions.insert(session_id.clone(), Arc::clone(&session));

        self.install_handlers(&peer_connection, &session_id);

        debug!(session_id = %session_id, "Session created");
        Ok(session)
    }

    fn install_handlers(self: &Arc<Self>, peer_connection: &RTCPeerConnection, session_id: &SessionId) {
        let manager = Arc::downgrade(self);
        let id = session_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let manager = manager.clone();
                let id = id.clone();
                Box::pin(async move {
                    if let Some(manager) = manager.upgrade() {
                        manager.on_connection_state(&id, state);
                    }
                })
            },
        ));

        let manager = Arc::downgrade(self);
        let id = session_id.clone();
        peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let manager = manager.clone();
            let id = id.clone();
            Box::pin(async move {
                debug!(session_id = %id, label = %channel.label(), "Data channel opened");
                install_input_channel(&channel, manager, id);
            })
        }));
    }

    async fn negotiate(&self, session: &Session, sdp: String) -> Result<SessionDescription> {
        let peer_connection = session.peer_connection();

        let remote = RTCSessionDescription::offer(sdp)
            .map_err(|e| StreamError::InvalidDescription(e.to_string()))?;
        peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| StreamError::InvalidDescription(e.to_string()))?;

        let answer = peer_connection.create_answer(None).await?;
        let mut gathering_complete = peer_connection.gathering_complete_promise().await;
        peer_connection.set_local_description(answer).await?;

        if tokio::time::timeout(self.config.ice_gathering_timeout, gathering_complete.recv())
            .await
            .is_err()
        {
            debug!(
                session_id = %session.id(),
                timeout_ms = self.config.ice_gathering_timeout.as_millis() as u64,
                "ICE gathering timed out, answering with candidates found so far"
            );
        }

        let local = peer_connection
            .local_description()
            .await
            .ok_or_else(|| StreamError::InvalidDescription("no local description".to_string()))?;

        Ok(SessionDescription::answer(local.sdp))
    }

    fn on_connection_state(self: &Arc<Self>, session_id: &SessionId, state: RTCPeerConnectionState) {
        debug!(session_id = %session_id, state = %state, "Peer connection state changed");

        match state {
            RTCPeerConnectionState::Connected => {
                let Some(session) = self.session(session_id) else {
                    return;
                };
                if !session.transition(SessionState::Connected) {
                    return;
                }
                info!(session_id = %session_id, "Session connected");
                let manager = Arc::downgrade(self);
                let id = session_id.clone();
                let on_failure = move || {
                    if let Some(manager) = manager.upgrade() {
                        manager.spawn_teardown(id, SessionState::Failed);
                    }
                };
                if let Err(e) = session.start_media(&self.encoder_factory, on_failure) {
                    error!(session_id = %session_id, error = %e, "Failed to start media");
                    self.spawn_teardown(session_id.clone(), SessionState::Failed);
                }
            }
            RTCPeerConnectionState::Failed => {
                self.spawn_teardown(session_id.clone(), SessionState::Failed);
            }
            RTCPeerConnectionState::Closed => {
                self.spawn_teardown(session_id.clone(), SessionState::Closed);
            }
            RTCPeerConnectionState::Disconnected => {
                warn!(session_id = %session_id, "Peer connection interrupted");
            }
            _ => {}
        }
    }

    /// Teardown closes the peer connection, which must not happen from inside its
    /// own callback, so it runs on a separate task.
    fn spawn_teardown(self: &Arc<Self>, session_id: SessionId, terminal: SessionState) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.teardown(&session_id, terminal).await;
        });
    }

    /// Tear down a session. Returns false when it was already gone.
    async fn teardown(&self, session_id: &SessionId, terminal: SessionState) -> bool {
        // Removal picks the single caller that performs cleanup
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return false;
        };

        session.close(terminal).await;

        info!(
            session_id = %session_id,
            state = ?terminal,
            frames_sent = session.info().frames_sent,
            remaining_sessions = self.sessions.len(),
            "Session torn down"
        );
        true
    }

    async fn on_input_message(&self, session_id: &SessionId, message: DataChannelMessage) {
        let connected = self
            .session(session_id)
            .is_some_and(|session| session.state() == SessionState::Connected);
        if !connected {
            debug!(session_id = %session_id, "Dropping input for session that is not connected");
            return;
        }
        if !message.is_string {
            debug!(session_id = %session_id, bytes = message.data.len(), "Ignoring binary data channel message");
            return;
        }

        let text = String::from_utf8_lossy(&message.data);
        dispatch_text(self.input.as_ref(), &text, session_id.as_str()).await;
    }

    /// Close one session at the viewer's or operator's request
    pub async fn close_session(&self, session_id: &SessionId) -> Result<()> {
        if self.teardown(session_id, SessionState::Closed).await {
            Ok(())
        } else {
            Err(StreamError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Close every session and wait until all of them are released.
    ///
    /// New offers are refused from here on.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        if ids.is_empty() {
            return;
        }

        info!(sessions = ids.len(), "Closing all sessions");
        let closed = futures::future::join_all(
            ids.iter().map(|id| self.teardown(id, SessionState::Closed)),
        )
        .await
        .into_iter()
        .filter(|closed| *closed)
        .count();

        info!(closed, "All sessions closed");
    }

    #[must_use]
    pub fn session(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn session_state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.session(session_id).map(|session| session.state())
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|entry| entry.value().info()).collect()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

fn install_input_channel(channel: &RTCDataChannel, manager: Weak<SessionManager>, session_id: SessionId) {
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let manager = manager.clone();
        let session_id = session_id.clone();
        Box::pin(async move {
            if let Some(manager) = manager.upgrade() {
                manager.on_input_message(&session_id, message).await;
            }
        })
    }));
}

/// Drain RTCP for the video sender, turning loss reports into keyframe requests.
///
/// Ends when the peer connection closes.
async fn read_rtcp(session_id: SessionId, sender: Arc<RTCRtpSender>, keyframe_request: KeyframeRequest) {
    let mut buf = vec![0u8; 1500];
    while let Ok((packets, _)) = sender.read(&mut buf).await {
        for packet in &packets {
            let any = packet.as_any();
            if any.downcast_ref::<PictureLossIndication>().is_some()
                || any.downcast_ref::<FullIntraRequest>().is_some()
            {
                debug!(session_id = %session_id, "Viewer requested a keyframe");
                keyframe_request.request();
            }
        }
    }
}
