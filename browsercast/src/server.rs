//! Server lifecycle management
//!
//! Manages the startup and shutdown of all server components:
//! - HTTP/JSON control API and viewer endpoints
//! - WebSocket viewers
//! - WebRTC sessions
//! - The browser frame source

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use browsercast_browser::BrowserController;
use browsercast_core::Config;
use browsercast_stream::{Broadcaster, SessionManager};
use tokio_util::sync::CancellationToken;

use crate::http::{self, AppState};

/// Upper bound on waiting for in-flight HTTP requests during shutdown
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Container for shared services
#[derive(Clone)]
pub struct Services {
    pub broadcaster: Arc<Broadcaster>,
    pub sessions: Arc<SessionManager>,
    pub browser: Arc<BrowserController>,
}

/// Browsercast server - manages all server components
pub struct BrowsercastServer {
    config: Config,
    services: Services,
    viewer_shutdown: CancellationToken,
}

impl BrowsercastServer {
    /// Create a new server instance
    #[must_use]
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            viewer_shutdown: CancellationToken::new(),
        }
    }

    /// Start the HTTP server and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting browsercast server...");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut http_handle = self.start_http_server(shutdown_rx);

        info!("All servers started successfully");

        let http_running = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                false
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                true
            }
        };

        let _ = shutdown_tx.send(true);

        self.shutdown(http_running.then_some(http_handle)).await;

        Ok(())
    }

    /// Graceful shutdown
    async fn shutdown(&self, http_handle: Option<JoinHandle<()>>) {
        info!("Shutting down browsercast server...");

        // 1. End WebSocket viewers; each unregisters its listener on the way out
        self.viewer_shutdown.cancel();

        // 2. Let in-flight requests (offers included) finish before sessions are closed
        if let Some(handle) = http_handle {
            if tokio::time::timeout(HTTP_DRAIN_TIMEOUT, handle).await.is_err() {
                warn!(
                    "HTTP server did not drain within {}s, closing sessions anyway",
                    HTTP_DRAIN_TIMEOUT.as_secs()
                );
            }
        }

        // 3. Close WebRTC sessions
        let sessions = self.services.sessions.session_count();
        if sessions > 0 {
            info!("Closing {} WebRTC session(s)...", sessions);
        }
        self.services.sessions.shutdown().await;

        // 4. Stop the browser
        if self.services.browser.stop().await {
            info!("Browser stopped");
        }

        info!(
            listeners = self.services.broadcaster.listener_count(),
            "Browsercast server shut down"
        );
    }

    fn start_http_server(&self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let http_address = self.config.http_address();

        let state = AppState {
            broadcaster: Arc::clone(&self.services.broadcaster),
            sessions: Arc::clone(&self.services.sessions),
            browser: Arc::clone(&self.services.browser),
            max_message_size: self.config.viewer.max_message_size,
            shutdown: self.viewer_shutdown.clone(),
        };
        let http_router = http::create_router(state);

        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&http_address).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to bind HTTP address {}: {}", http_address, e);
                    return;
                }
            };

            info!("HTTP server listening on {}", http_address);

            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, http_router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        })
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn server() -> BrowsercastServer {
        let state = test_support::state();
        BrowsercastServer::new(
            Config::default(),
            Services {
                broadcaster: state.broadcaster,
                sessions: state.sessions,
                browser: state.browser,
            },
        )
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_requests() {
        let server = server();
        let drained = Arc::new(AtomicBool::new(false));

        let http = {
            let drained = Arc::clone(&drained);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                drained.store(true, Ordering::SeqCst);
            })
        };

        server.shutdown(Some(http)).await;

        assert!(drained.load(Ordering::SeqCst));
        assert!(server.viewer_shutdown.is_cancelled());
        assert_eq!(server.services.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_http_task() {
        let server = server();
        server.shutdown(None).await;
        assert_eq!(server.services.broadcaster.listener_count(), 0);
    }
}
