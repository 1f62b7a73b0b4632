mod http;
mod server;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use browsercast_browser::{BrowserController, BrowserOptions, ScreencastFormat, Viewport};
use browsercast_core::{
    bootstrap::load_config,
    config::{BrowserConfig, WebRtcConfig},
    logging,
};
use browsercast_stream::{Broadcaster, InputSink, SessionConfig, SessionManager};

use server::{BrowsercastServer, Services};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load and validate configuration
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Browsercast server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Frame fan-out shared by every viewer
    let broadcaster = Broadcaster::new();

    // 4. Browser controller (launched on POST /start)
    let browser = BrowserController::new(browser_options(&config.browser)?, Arc::clone(&broadcaster));
    info!(
        start_url = %config.browser.start_url,
        headless = config.browser.headless,
        "Browser controller ready"
    );

    // 5. WebRTC session manager
    let sessions = SessionManager::new(
        session_config(&config.webrtc),
        Arc::clone(&broadcaster),
        Arc::clone(&browser) as Arc<dyn InputSink>,
    )?;
    info!(
        frame_rate = config.webrtc.frame_rate,
        ice_servers = config.webrtc.ice_servers.len(),
        "WebRTC session manager ready"
    );

    // 6. Serve until shutdown
    let services = Services {
        broadcaster,
        sessions,
        browser,
    };
    BrowsercastServer::new(config, services).start().await
}

fn browser_options(config: &BrowserConfig) -> Result<BrowserOptions> {
    let format: ScreencastFormat = config
        .screencast_format
        .parse()
        .map_err(anyhow::Error::msg)?;

    Ok(BrowserOptions {
        chrome_path: config.chrome_path.as_ref().map(PathBuf::from),
        devtools_url: config.devtools_url.clone(),
        headless: config.headless,
        viewport: Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
        },
        start_url: config.start_url.clone(),
        format,
        quality: config.screencast_quality,
        every_nth_frame: config.every_nth_frame,
        launch_timeout: Duration::from_secs(config.launch_timeout_seconds),
    })
}

fn session_config(config: &WebRtcConfig) -> SessionConfig {
    SessionConfig {
        ice_servers: config.ice_servers.clone(),
        frame_rate: config.frame_rate,
        clock_rate: config.clock_rate,
        keyframe_interval: config.keyframe_interval,
        ice_gathering_timeout: Duration::from_millis(config.ice_gathering_timeout_ms),
        max_sessions: config.max_sessions,
        pace_frames: config.pace_frames,
    }
}
