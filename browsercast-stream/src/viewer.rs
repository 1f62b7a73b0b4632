//! Byte-stream viewer - raw frames out, input events in, over one connection
//!
//! Each connected viewer gets its own broadcaster listener. A send loop writes
//! every frame it receives as one binary message; a receive loop decodes text
//! messages into input actions. Whichever loop stops first ends the session,
//! and the listener is released on every exit path.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, Listener};
use crate::error::StreamError;
use crate::input::{dispatch_text, Dispatch, InputSink};

/// Message read from a viewer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerMessage {
    Text(String),
    Binary(Bytes),
    Close,
}

/// Outbound half of a viewer connection
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame as a single binary message
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), StreamError>;

    /// Close the connection. Must tolerate an already closed connection.
    async fn close(&mut self);
}

/// Inbound half of a viewer connection
#[async_trait]
pub trait EventSource: Send {
    /// Next message, or `None` once the connection is gone
    async fn next_message(&mut self) -> Option<Result<ViewerMessage, StreamError>>;
}

/// Why a viewer session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Writing a frame failed
    SendFailed,
    /// The viewer closed the connection
    ClosedByViewer,
    /// Reading from the connection failed
    ReceiveFailed,
    /// The listener was unregistered from outside
    Unregistered,
    /// The server is shutting down
    Cancelled,
}

/// Counters reported when a viewer session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewerSummary {
    pub frames_sent: u64,
    pub inputs_applied: u64,
    pub inputs_dropped: u64,
    pub reason: EndReason,
}

/// Byte-stream adapter between the broadcaster and one viewer connection
pub struct ByteStreamViewer {
    broadcaster: Arc<Broadcaster>,
    input: Arc<dyn InputSink>,
    origin: String,
}

impl ByteStreamViewer {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        input: Arc<dyn InputSink>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            broadcaster,
            input,
            origin: origin.into(),
        }
    }

    /// Serve the connection until either side stops or `cancel` fires.
    pub async fn run<S, R>(self, mut sink: S, mut source: R, cancel: CancellationToken) -> ViewerSummary
    where
        S: FrameSink,
        R: EventSource,
    {
        let listener = self.broadcaster.register();
        info!(
            origin = %self.origin,
            listener_id = %listener.id(),
            "Viewer connected"
        );

        let mut frames_sent = 0u64;
        let mut inputs_applied = 0u64;
        let mut inputs_dropped = 0u64;

        let reason = tokio::select! {
            reason = send_loop(&listener, &mut sink, &mut frames_sent) => reason,
            reason = self.receive_loop(&mut source, &mut inputs_applied, &mut inputs_dropped) => reason,
            () = cancel.cancelled() => EndReason::Cancelled,
        };

        listener.unregister();
        sink.close().await;

        let summary = ViewerSummary {
            frames_sent,
            inputs_applied,
            inputs_dropped,
            reason,
        };
        info!(
            origin = %self.origin,
            listener_id = %listener.id(),
            frames_sent,
            inputs_applied,
            inputs_dropped,
            reason = ?reason,
            "Viewer disconnected"
        );
        summary
    }

    async fn receive_loop<R: EventSource>(
        &self,
        source: &mut R,
        applied: &mut u64,
        dropped: &mut u64,
    ) -> EndReason {
        loop {
            match source.next_message().await {
                Some(Ok(ViewerMessage::Text(text))) => {
                    match dispatch_text(self.input.as_ref(), &text, &self.origin).await {
                        Dispatch::Applied => *applied += 1,
                        Dispatch::Ignored | Dispatch::Malformed | Dispatch::Failed => *dropped += 1,
                    }
                }
                Some(Ok(ViewerMessage::Binary(data))) => {
                    debug!(origin = %self.origin, bytes = data.len(), "Ignoring binary message from viewer");
                }
                Some(Ok(ViewerMessage::Close)) | None => return EndReason::ClosedByViewer,
                Some(Err(e)) => {
                    warn!(origin = %self.origin, error = %e, "Viewer receive failed");
                    return EndReason::ReceiveFailed;
                }
            }
        }
    }
}

async fn send_loop<S: FrameSink>(listener: &Listener, sink: &mut S, sent: &mut u64) -> EndReason {
    while let Some(frame) = listener.recv().await {
        if let Err(e) = sink.send_frame(frame.into_data()).await {
            debug!(listener_id = %listener.id(), error = %e, "Viewer send failed");
            return EndReason::SendFailed;
        }
        *sent += 1;
    }
    EndReason::Unregistered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputAction;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSink {
        actions: Mutex<Vec<InputAction>>,
    }

    #[async_trait]
    impl InputSink for RecordingSink {
        async fn apply_input(&self, action: InputAction) -> Result<(), StreamError> {
            self.actions.lock().push(action);
            Ok(())
        }
    }

    struct ChannelSink {
        tx: mpsc::UnboundedSender<Bytes>,
        fail: bool,
    }

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send_frame(&mut self, frame: Bytes) -> Result<(), StreamError> {
            if self.fail {
                return Err(StreamError::Transport("broken pipe".to_string()));
            }
            self.tx
                .send(frame)
                .map_err(|_| StreamError::Transport("closed".to_string()))
        }

        async fn close(&mut self) {}
    }

    struct ChannelSource(mpsc::UnboundedReceiver<ViewerMessage>);

    #[async_trait]
    impl EventSource for ChannelSource {
        async fn next_message(&mut self) -> Option<Result<ViewerMessage, StreamError>> {
            self.0.recv().await.map(Ok)
        }
    }

    #[tokio::test]
    async fn test_frames_forwarded_and_inputs_applied() {
        let broadcaster = Broadcaster::new();
        let input = Arc::new(RecordingSink::default());
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        let viewer = ByteStreamViewer::new(Arc::clone(&broadcaster), input.clone(), "test");
        let handle = tokio::spawn(viewer.run(
            ChannelSink { tx: frame_tx, fail: false },
            ChannelSource(msg_rx),
            CancellationToken::new(),
        ));

        while broadcaster.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        broadcaster.publish(Bytes::from_static(b"jpeg-1"));
        assert_eq!(frame_rx.recv().await.unwrap().as_ref(), b"jpeg-1");

        msg_tx.send(ViewerMessage::Text("garbage".to_string())).unwrap();
        msg_tx
            .send(ViewerMessage::Text(r#"{"action":"type","text":"hello"}"#.to_string()))
            .unwrap();
        msg_tx.send(ViewerMessage::Close).unwrap();

        let summary = handle.await.unwrap();
        assert_eq!(summary.reason, EndReason::ClosedByViewer);
        assert_eq!(summary.frames_sent, 1);
        assert_eq!(summary.inputs_applied, 1);
        assert_eq!(summary.inputs_dropped, 1);
        assert_eq!(
            input.actions.lock().as_slice(),
            &[InputAction::Type {
                text: "hello".to_string()
            }]
        );
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_releases_listener() {
        let broadcaster = Broadcaster::new();
        let (frame_tx, _frame_rx) = mpsc::unbounded_channel();
        let (_msg_tx, msg_rx) = mpsc::unbounded_channel();

        let viewer = ByteStreamViewer::new(
            Arc::clone(&broadcaster),
            Arc::new(RecordingSink::default()),
            "test",
        );
        let handle = tokio::spawn(viewer.run(
            ChannelSink { tx: frame_tx, fail: true },
            ChannelSource(msg_rx),
            CancellationToken::new(),
        ));

        while broadcaster.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        broadcaster.publish(Bytes::from_static(b"frame"));

        let summary = handle.await.unwrap();
        assert_eq!(summary.reason, EndReason::SendFailed);
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_and_external_unregister() {
        let broadcaster = Broadcaster::new();
        let cancel = CancellationToken::new();
        let (frame_tx, _frame_rx) = mpsc::unbounded_channel();
        let (_msg_tx, msg_rx) = mpsc::unbounded_channel();

        let viewer = ByteStreamViewer::new(
            Arc::clone(&broadcaster),
            Arc::new(RecordingSink::default()),
            "test",
        );
        let handle = tokio::spawn(viewer.run(
            ChannelSink { tx: frame_tx, fail: false },
            ChannelSource(msg_rx),
            cancel.clone(),
        ));
        while broadcaster.listener_count() == 0 {
            tokio::task::yield_now().await;
        }

        cancel.cancel();
        let summary = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.reason, EndReason::Cancelled);
        assert_eq!(broadcaster.listener_count(), 0);
    }
}
