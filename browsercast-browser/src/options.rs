//! Browser launch and screencast options

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Image format of screencast frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreencastFormat {
    #[default]
    Jpeg,
    Png,
}

impl ScreencastFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }
}

impl FromStr for ScreencastFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(format!("unsupported screencast format: {other}")),
        }
    }
}

/// Page area in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Executable to launch; discovered when unset
    pub chrome_path: Option<PathBuf>,
    /// Existing DevTools HTTP endpoint to attach to instead of launching
    pub devtools_url: Option<String>,
    pub headless: bool,
    pub viewport: Viewport,
    pub start_url: String,
    pub format: ScreencastFormat,
    pub quality: u8,
    pub every_nth_frame: u32,
    pub launch_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            devtools_url: None,
            headless: true,
            viewport: Viewport::default(),
            start_url: "https://www.google.com".to_string(),
            format: ScreencastFormat::Jpeg,
            quality: 80,
            every_nth_frame: 1,
            launch_timeout: Duration::from_secs(10),
        }
    }
}

impl BrowserOptions {
    /// Command-line arguments for a launched browser listening on `port`
    #[must_use]
    pub fn launch_args(&self, port: u16) -> Vec<String> {
        let mut args = Vec::with_capacity(10);
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.extend(
            [
                "--no-sandbox",
                "--disable-setuid-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--no-first-run",
                "--no-default-browser-check",
            ]
            .map(String::from),
        );
        args.push(format!("--remote-debugging-port={port}"));
        args.push(format!(
            "--window-size={},{}",
            self.viewport.width, self.viewport.height
        ));
        args.push("about:blank".to_string());
        args
    }
}
