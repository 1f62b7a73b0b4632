// Module: http
// HTTP/JSON control API plus the WebSocket and WebRTC viewer endpoints

pub mod browser;
pub mod error;
pub mod health;
pub mod webrtc;
pub mod websocket;

use axum::{
    routing::{delete, get, post},
    Router,
};
use browsercast_browser::BrowserController;
use browsercast_stream::{Broadcaster, SessionManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<Broadcaster>,
    pub sessions: Arc<SessionManager>,
    pub browser: Arc<BrowserController>,
    /// Largest inbound WebSocket message accepted from a viewer
    pub max_message_size: usize,
    /// Cancelled when the server shuts down; ends every WebSocket viewer
    pub shutdown: CancellationToken,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        .route("/start", post(browser::start_browser))
        .route("/stop", post(browser::stop_browser))
        .route("/navigate", post(browser::navigate))
        .route("/offer", post(webrtc::offer))
        .route("/sessions", get(webrtc::list_sessions))
        .route("/sessions/{session_id}", delete(webrtc::close_session))
        .route("/ws", get(websocket::websocket_handler));

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    router.with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use browsercast_browser::BrowserOptions;
    use browsercast_stream::{InputSink, SessionConfig};
    use std::time::Duration;

    pub fn state() -> AppState {
        let broadcaster = Broadcaster::new();
        let browser = BrowserController::new(BrowserOptions::default(), Arc::clone(&broadcaster));
        let config = SessionConfig {
            ice_servers: Vec::new(),
            ice_gathering_timeout: Duration::from_secs(2),
            ..SessionConfig::default()
        };
        let sessions = SessionManager::new(
            config,
            Arc::clone(&broadcaster),
            Arc::clone(&browser) as Arc<dyn InputSink>,
        )
        .unwrap();

        AppState {
            broadcaster,
            sessions,
            browser,
            max_message_size: 64 * 1024,
            shutdown: CancellationToken::new(),
        }
    }
}
