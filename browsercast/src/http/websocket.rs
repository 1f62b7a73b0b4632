//! WebSocket viewer endpoint
//!
//! `GET /ws` upgrades to a byte-stream viewer: every screencast frame is sent
//! as one binary message, text messages are input events.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use browsercast_stream::{
    ByteStreamViewer, EventSource, FrameSink, InputSink, StreamError, ViewerMessage,
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::http::AppState;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let origin = format!("ws-{}", NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
    let (sender, receiver) = socket.split();

    let viewer = ByteStreamViewer::new(
        Arc::clone(&state.broadcaster),
        Arc::clone(&state.browser) as Arc<dyn InputSink>,
        origin,
    );
    viewer
        .run(
            WsFrameSink(sender),
            WsEventSource(receiver),
            state.shutdown.child_token(),
        )
        .await;
}

struct WsFrameSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), StreamError> {
        self.0
            .send(Message::Binary(frame))
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.send(Message::Close(None)).await;
        let _ = self.0.close().await;
    }
}

struct WsEventSource(SplitStream<WebSocket>);

#[async_trait]
impl EventSource for WsEventSource {
    async fn next_message(&mut self) -> Option<Result<ViewerMessage, StreamError>> {
        loop {
            let message = match self.0.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(StreamError::Transport(e.to_string()))),
            };
            return Some(Ok(match message {
                Message::Text(text) => ViewerMessage::Text(text.as_str().to_owned()),
                Message::Binary(data) => ViewerMessage::Binary(data),
                Message::Close(frame) => {
                    debug!(close_frame = ?frame, "Viewer sent close");
                    ViewerMessage::Close
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            }));
        }
    }
}
