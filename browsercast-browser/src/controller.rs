//! Browser lifecycle owner shared by the HTTP handlers and the viewers

use async_trait::async_trait;
use browsercast_stream::{Broadcaster, InputAction, InputSink, StreamError};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{BrowserError, Result};
use crate::options::{BrowserOptions, Viewport};
use crate::session::BrowserSession;

/// Snapshot of the browser for status output
#[derive(Debug, Clone, Serialize)]
pub struct BrowserStatus {
    pub running: bool,
    pub current_url: Option<String>,
    pub viewport: Option<Viewport>,
    pub frames_received: u64,
}

/// Starts and stops the browser that feeds the broadcaster
///
/// At most one browser runs at a time. Input arriving while none is running is
/// ignored.
pub struct BrowserController {
    options: BrowserOptions,
    frames: Arc<Broadcaster>,
    session: RwLock<Option<Arc<BrowserSession>>>,
    // Serialises start and stop
    lifecycle: Mutex<()>,
}

impl BrowserController {
    pub fn new(options: BrowserOptions, frames: Arc<Broadcaster>) -> Arc<Self> {
        Arc::new(Self {
            options,
            frames,
            session: RwLock::new(None),
            lifecycle: Mutex::new(()),
        })
    }

    /// Start the browser unless it is already running.
    ///
    /// Returns `true` if this call launched it.
    pub async fn start(&self) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;

        if let Some(session) = self.current() {
            if session.is_connected() {
                debug!("Browser already running");
                return Ok(false);
            }
            // The browser went away underneath us; replace it
            session.close().await;
            *self.session.write() = None;
        }

        let session = BrowserSession::start(self.options.clone(), Arc::clone(&self.frames)).await?;
        *self.session.write() = Some(Arc::new(session));
        Ok(true)
    }

    /// Stop the browser if it is running. Returns `true` if this call stopped it.
    pub async fn stop(&self) -> bool {
        let _guard = self.lifecycle.lock().await;

        let Some(session) = self.session.write().take() else {
            return false;
        };
        session.close().await;
        info!(frames_received = session.frames_received(), "Browser stopped");
        true
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current().is_some_and(|session| session.is_connected())
    }

    #[must_use]
    pub fn status(&self) -> BrowserStatus {
        match self.current() {
            Some(session) => BrowserStatus {
                running: session.is_connected(),
                current_url: session.current_url(),
                viewport: Some(session.viewport()),
                frames_received: session.frames_received(),
            },
            None => BrowserStatus {
                running: false,
                current_url: None,
                viewport: None,
                frames_received: 0,
            },
        }
    }

    /// Apply an action, failing when no browser is running.
    pub async fn apply(&self, action: &InputAction) -> Result<()> {
        let session = self.current().ok_or(BrowserError::NotRunning)?;
        session.apply(action).await
    }

    fn current(&self) -> Option<Arc<BrowserSession>> {
        self.session.read().clone()
    }
}

#[async_trait]
impl InputSink for BrowserController {
    async fn apply_input(&self, action: InputAction) -> std::result::Result<(), StreamError> {
        match self.apply(&action).await {
            Err(BrowserError::NotRunning) => {
                debug!(action = action.name(), "No browser running, ignoring input");
                Ok(())
            }
            result => result.map_err(StreamError::from),
        }
    }
}


#[cfg(all(test, feature = "browser-integration"))]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let options = BrowserOptions {
            start_url: "about:blank".to_string(),
            ..BrowserOptions::default()
        };
        let controller = BrowserController::new(options, Broadcaster::new());

        assert!(controller.start().await.unwrap());
        assert!(!controller.start().await.unwrap());
        assert!(controller.is_running());

        controller
            .apply_input(InputAction::Navigate {
                url: "data:text/html,<p>hi</p>".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            controller.status().current_url.as_deref(),
            Some("data:text/html,<p>hi</p>")
        );

        assert!(controller.stop().await);
        assert!(!controller.stop().await);
    }
}
