//! A running browser page streaming its screencast into the broadcaster

use browsercast_stream::{Broadcaster, InputAction};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::actions::{plan, ActionPlan};
use crate::cdp::CdpConnection;
use crate::chrome::find_chrome;
use crate::error::{BrowserError, Result};
use crate::options::{BrowserOptions, Viewport};

/// One browser page driven over the DevTools protocol
pub struct BrowserSession {
    cdp: CdpConnection,
    options: BrowserOptions,
    viewport: RwLock<Viewport>,
    current_url: RwLock<Option<String>>,
    process: Mutex<Option<Child>>,
}

impl BrowserSession {
    /// Launch (or attach to) a browser, open the start page and begin the screencast.
    pub async fn start(options: BrowserOptions, frames: Arc<Broadcaster>) -> Result<Self> {
        let (ws_url, process) = match &options.devtools_url {
            Some(endpoint) => {
                let ws_url = wait_for_page_ws_url(endpoint, options.launch_timeout, None).await?;
                info!(endpoint = %endpoint, "Attaching to running browser");
                (ws_url, None)
            }
            None => {
                let (ws_url, child) = launch(&options).await?;
                (ws_url, Some(child))
            }
        };

        let cdp = match CdpConnection::connect(&ws_url, frames).await {
            Ok(cdp) => cdp,
            Err(e) => {
                if let Some(mut child) = process {
                    let _ = child.kill().await;
                }
                return Err(e);
            }
        };

        let session = Self {
            cdp,
            viewport: RwLock::new(options.viewport),
            options,
            current_url: RwLock::new(None),
            process: Mutex::new(process),
        };

        if let Err(e) = session.initialize().await {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn initialize(&self) -> Result<()> {
        self.cdp.send("Page.enable", json!({})).await?;
        let viewport = *self.viewport.read();
        self.set_viewport(viewport).await?;

        let start_url = self.options.start_url.clone();
        if let Err(e) = self.navigate(&start_url).await {
            // A dead start page still leaves a usable browser
            warn!(url = %start_url, error = %e, "Failed to open start page");
        }

        self.start_screencast().await?;
        info!(
            width = viewport.width,
            height = viewport.height,
            format = self.options.format.as_str(),
            "Browser started and screencast active"
        );
        Ok(())
    }

    /// Apply one viewer input action.
    pub async fn apply(&self, action: &InputAction) -> Result<()> {
        match plan(action) {
            ActionPlan::Dispatch(calls) => {
                for call in calls {
                    self.cdp.send(call.method, call.params).await?;
                }
                Ok(())
            }
            ActionPlan::Navigate(url) => self.navigate(&url).await,
            ActionPlan::Resize { width, height } => self.resize(Viewport { width, height }).await,
            ActionPlan::Back => self.step_history(-1).await,
            ActionPlan::Forward => self.step_history(1).await,
            ActionPlan::Reload => self.cdp.send("Page.reload", json!({})).await.map(drop),
        }
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let result = self
            .cdp
            .send("Page.navigate", json!({ "url": url }))
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: error.to_string(),
            });
        }

        debug!(url = %url, "Navigated");
        *self.current_url.write() = Some(url.to_string());
        Ok(())
    }

    /// Change the page size. The screencast is restarted so frames match it.
    pub async fn resize(&self, viewport: Viewport) -> Result<()> {
        if viewport.width == 0 || viewport.height == 0 {
            return Err(BrowserError::Cdp(format!(
                "invalid viewport {}x{}",
                viewport.width, viewport.height
            )));
        }

        self.set_viewport(viewport).await?;
        *self.viewport.write() = viewport;

        let _ = self.cdp.send("Page.stopScreencast", json!({})).await;
        self.start_screencast().await?;
        info!(width = viewport.width, height = viewport.height, "Viewport resized");
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.cdp
            .send(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": viewport.width,
                    "height": viewport.height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
            )
            .await
            .map(drop)
    }

    async fn start_screencast(&self) -> Result<()> {
        let viewport = *self.viewport.read();
        self.cdp
            .send(
                "Page.startScreencast",
                json!({
                    "format": self.options.format.as_str(),
                    "quality": self.options.quality,
                    "maxWidth": viewport.width,
                    "maxHeight": viewport.height,
                    "everyNthFrame": self.options.every_nth_frame.max(1),
                }),
            )
            .await
            .map(drop)
            .map_err(|e| BrowserError::ScreencastFailed(e.to_string()))
    }

    /// Move `offset` entries through the navigation history. No-op at either end.
    async fn step_history(&self, offset: i64) -> Result<()> {
        let history = self.cdp.send("Page.getNavigationHistory", json!({})).await?;
        let Some(entry) = history_entry(&history, offset) else {
            debug!(offset, "No history entry to move to");
            return Ok(());
        };

        if let Some(entry_id) = entry["id"].as_i64() {
            self.cdp
                .send("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
                .await?;
        }
        *self.current_url.write() = entry["url"].as_str().map(str::to_string);
        Ok(())
    }

    #[must_use]
    pub fn current_url(&self) -> Option<String> {
        self.current_url.read().clone()
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        *self.viewport.read()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.cdp.is_connected()
    }

    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.cdp.frames_received()
    }

    /// Stop the screencast and terminate a launched browser. Idempotent.
    pub async fn close(&self) {
        if self.cdp.is_connected() {
            let _ = tokio::time::timeout(
                Duration::from_secs(2),
                self.cdp.send("Page.stopScreencast", json!({})),
            )
            .await;
        }

        if let Some(mut child) = self.process.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill browser process");
            }
            info!("Browser process stopped");
        }
    }
}

fn history_entry(history: &Value, offset: i64) -> Option<&Value> {
    let current = history["currentIndex"].as_i64()?;
    let target = usize::try_from(current.checked_add(offset)?).ok()?;
    history["entries"].as_array()?.get(target)
}

async fn launch(options: &BrowserOptions) -> Result<(String, Child)> {
    let chrome = find_chrome(options.chrome_path.as_deref()).ok_or(BrowserError::ChromeNotFound)?;

    let port = free_port()?;
    let mut child = Command::new(&chrome)
        .args(options.launch_args(port))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BrowserError::LaunchFailed {
            context: format!("{}: {e}", chrome.display()),
        })?;

    info!(
        chrome = %chrome.display(),
        port,
        headless = options.headless,
        "Launched browser"
    );

    let endpoint = format!("http://127.0.0.1:{port}");
    match wait_for_page_ws_url(&endpoint, options.launch_timeout, Some(&mut child)).await {
        Ok(ws_url) => Ok((ws_url, child)),
        Err(e) => {
            let _ = child.kill().await;
            Err(e)
        }
    }
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| BrowserError::LaunchFailed {
        context: format!("bind port: {e}"),
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| BrowserError::LaunchFailed {
            context: format!("local_addr: {e}"),
        })?
        .port();
    Ok(port)
}

/// Poll the DevTools `/json` listing until a page target shows up.
async fn wait_for_page_ws_url(
    endpoint: &str,
    timeout: Duration,
    mut child: Option<&mut Child>,
) -> Result<String> {
    let url = format!("{}/json", endpoint.trim_end_matches('/'));
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if let Some(child) = child.as_deref_mut() {
            let status = child.try_wait().map_err(|e| BrowserError::LaunchFailed {
                context: format!("wait: {e}"),
            })?;
            if let Some(status) = status {
                return Err(BrowserError::LaunchFailed {
                    context: format!("browser exited early with {status}"),
                });
            }
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(targets) = resp.json::<Vec<Value>>().await {
                if let Some(ws_url) = page_ws_url(&targets) {
                    return Ok(ws_url);
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Err(BrowserError::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        context: format!("waiting for a page target at {endpoint}"),
    })
}

fn page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t["type"].as_str().map_or(true, |kind| kind == "page"))
        .find_map(|t| t["webSocketDebuggerUrl"].as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_entry() {
        let history = json!({
            "currentIndex": 1,
            "entries": [
                { "id": 10, "url": "https://a.example" },
                { "id": 11, "url": "https://b.example" },
                { "id": 12, "url": "https://c.example" },
            ],
        });

        assert_eq!(history_entry(&history, -1).unwrap()["id"], 10);
        assert_eq!(history_entry(&history, 1).unwrap()["id"], 12);
        assert!(history_entry(&history, -2).is_none());
        assert!(history_entry(&history, 2).is_none());
        assert!(history_entry(&json!({}), 1).is_none());
    }

    #[test]
    fn test_page_ws_url_skips_other_targets() {
        let targets = vec![
            json!({ "type": "service_worker", "webSocketDebuggerUrl": "ws://x/sw" }),
            json!({ "type": "page", "webSocketDebuggerUrl": "ws://x/page" }),
        ];
        assert_eq!(page_ws_url(&targets).as_deref(), Some("ws://x/page"));
        assert_eq!(page_ws_url(&[]), None);
    }

    #[tokio::test]
    async fn test_wait_for_unreachable_endpoint_times_out() {
        let port = free_port().unwrap();
        let result = wait_for_page_ws_url(
            &format!("http://127.0.0.1:{port}"),
            Duration::from_millis(300),
            None,
        )
        .await;
        assert!(matches!(result, Err(BrowserError::Timeout { .. })));
    }
}

#[cfg(all(test, feature = "browser-integration"))]
mod integration_tests {
    use super::*;

    async fn start_test_session(broadcaster: &Arc<Broadcaster>) -> BrowserSession {
        let options = BrowserOptions {
            start_url: "data:text/html,<h1>browsercast</h1>".to_string(),
            viewport: Viewport {
                width: 640,
                height: 480,
            },
            ..BrowserOptions::default()
        };
        BrowserSession::start(options, Arc::clone(broadcaster))
            .await
            .expect("Chrome required for integration tests")
    }

    #[tokio::test]
    async fn test_screencast_frames_reach_listeners() {
        let broadcaster = Broadcaster::new();
        let listener = broadcaster.register();
        let session = start_test_session(&broadcaster).await;

        let frame = tokio::time::timeout(Duration::from_secs(10), listener.recv())
            .await
            .unwrap()
            .unwrap();
        // JPEG SOI marker
        assert_eq!(&frame.data()[..2], &[0xFF, 0xD8]);

        session.close().await;
        session.close().await;
    }

    #[tokio::test]
    async fn test_input_and_resize() {
        let broadcaster = Broadcaster::new();
        let session = start_test_session(&broadcaster).await;

        session
            .apply(&InputAction::Type {
                text: "hello".to_string(),
            })
            .await
            .unwrap();
        session
            .apply(&InputAction::Resize {
                width: 800,
                height: 600,
            })
            .await
            .unwrap();
        assert_eq!(
            session.viewport(),
            Viewport {
                width: 800,
                height: 600
            }
        );
        session.apply(&InputAction::Back).await.unwrap();

        session.close().await;
    }
}
