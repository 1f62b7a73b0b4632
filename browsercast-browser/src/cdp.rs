//! Minimal DevTools protocol client over `tokio-tungstenite`
//!
//! One handler task owns the WebSocket. Commands are correlated with their
//! responses by id; `Page.screencastFrame` events are decoded, published to the
//! broadcaster and acknowledged right there so the browser keeps sending.

use base64::Engine as _;
use browsercast_stream::Broadcaster;
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{BrowserError, Result};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type PendingTx = oneshot::Sender<std::result::Result<Value, String>>;

struct CdpCommand {
    method: String,
    params: Value,
    response_tx: PendingTx,
}

/// Connection to one page target
pub struct CdpConnection {
    cmd_tx: mpsc::Sender<CdpCommand>,
    frames_received: Arc<AtomicU64>,
    command_timeout: Duration,
    handler: JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to a page's `webSocketDebuggerUrl`.
    pub async fn connect(ws_url: &str, frames: Arc<Broadcaster>) -> Result<Self> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::LaunchFailed {
                context: format!("WebSocket connect: {e}"),
            })?;
        debug!(url = %ws_url, "Connected to DevTools");
        Ok(Self::with_stream(ws, frames))
    }

    /// Run the protocol over an already established WebSocket.
    pub fn with_stream<S>(ws: WebSocketStream<S>, frames: Arc<Broadcaster>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let frames_received = Arc::new(AtomicU64::new(0));
        let handler = tokio::spawn(handler_loop(
            ws,
            cmd_rx,
            frames,
            Arc::clone(&frames_received),
        ));

        Self {
            cmd_tx,
            frames_received,
            command_timeout: COMMAND_TIMEOUT,
            handler,
        }
    }

    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Send one command and wait for its result.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(CdpCommand {
                method: method.to_string(),
                params,
                response_tx,
            })
            .await
            .map_err(|_| BrowserError::Disconnected)?;

        let result = tokio::time::timeout(self.command_timeout, response_rx)
            .await
            .map_err(|_| BrowserError::Timeout {
                timeout_ms: u64::try_from(self.command_timeout.as_millis()).unwrap_or(u64::MAX),
                context: format!("CDP {method}"),
            })?
            .map_err(|_| BrowserError::Disconnected)?;

        result.map_err(BrowserError::Cdp)
    }

    /// Whether the WebSocket is still being served
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Screencast frames received so far
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

async fn send_message<W>(ws_tx: &mut W, id: u64, method: &str, params: &Value) -> bool
where
    W: Sink<Message> + Unpin,
{
    let msg = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    ws_tx.send(Message::Text(msg.to_string().into())).await.is_ok()
}

async fn handler_loop<S>(
    ws: WebSocketStream<S>,
    mut cmd_rx: mpsc::Receiver<CdpCommand>,
    frames: Arc<Broadcaster>,
    frames_received: Arc<AtomicU64>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let mut next_id = 1u64;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id;
                next_id += 1;
                track_pending(&mut pending, id, cmd.response_tx);
                if !send_message(&mut ws_tx, id, &cmd.method, &cmd.params).await {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(val) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };

                if let Some(id) = val.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = pending.remove(&id) {
                        let response = match val.get("error") {
                            Some(err) => Err(err["message"].as_str().unwrap_or("CDP error").to_string()),
                            None => Ok(val["result"].clone()),
                        };
                        let _ = tx.send(response);
                    }
                    continue;
                }

                match val.get("method").and_then(Value::as_str) {
                    Some("Page.screencastFrame") => {
                        let params = &val["params"];
                        publish_frame(&frames, params, &frames_received);

                        if let Some(session_id) = params["sessionId"].as_i64() {
                            let id = next_id;
                            next_id += 1;
                            let ack = json!({ "sessionId": session_id });
                            if !send_message(&mut ws_tx, id, "Page.screencastFrameAck", &ack).await {
                                break;
                            }
                        }
                    }
                    Some("Inspector.targetCrashed") => warn!("Browser page crashed"),
                    Some("Inspector.detached") => {
                        warn!(reason = %val["params"]["reason"], "DevTools session detached");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(
        frames_received = frames_received.load(Ordering::Relaxed),
        pending_commands = pending.len(),
        "DevTools connection closed"
    );
}

/// Remember a command awaiting its response, forgetting commands whose caller
/// already gave up (timed out) and will never read the reply.
fn track_pending(pending: &mut HashMap<u64, PendingTx>, id: u64, response_tx: PendingTx) {
    pending.retain(|_, tx| !tx.is_closed());
    pending.insert(id, response_tx);
}

fn publish_frame(frames: &Broadcaster, params: &Value, frames_received: &AtomicU64) {
    let Some(data) = params["data"].as_str() else {
        debug!("Screencast frame without data");
        return;
    };
    match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(bytes) => {
            frames_received.fetch_add(1, Ordering::Relaxed);
            frames.publish(Bytes::from(bytes));
        }
        Err(e) => warn!(error = %e, "Dropping screencast frame with invalid base64"),
    }
}
