use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub browser: BrowserConfig,
    pub webrtc: WebRtcConfig,
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Headless browser (frame source) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Chrome/Chromium executable. Discovered from PATH when unset.
    pub chrome_path: Option<String>,
    /// Attach to an already running DevTools endpoint (e.g. `http://127.0.0.1:9222`)
    /// instead of launching a browser.
    pub devtools_url: Option<String>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Page loaded right after the browser starts
    pub start_url: String,
    /// Screencast image format: "jpeg" or "png"
    pub screencast_format: String,
    /// Screencast compression quality (0-100, jpeg only)
    pub screencast_quality: u8,
    /// Deliver every n-th repainted frame
    pub every_nth_frame: u32,
    pub launch_timeout_seconds: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            devtools_url: None,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            start_url: "https://www.google.com".to_string(),
            screencast_format: "jpeg".to_string(),
            screencast_quality: 80,
            every_nth_frame: 1,
            launch_timeout_seconds: 10,
        }
    }
}

/// WebRTC viewer sessions configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN/TURN server URLs handed to every peer connection
    pub ice_servers: Vec<String>,
    /// Nominal outgoing frame rate
    pub frame_rate: u32,
    /// RTP clock rate for video presentation timestamps
    pub clock_rate: u32,
    /// Force a keyframe every n encoded frames (0 = only on demand)
    pub keyframe_interval: u32,
    pub ice_gathering_timeout_ms: u64,
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
    /// Hold frames back so they never leave faster than the nominal frame rate
    pub pace_frames: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            frame_rate: 30,
            clock_rate: 90_000,
            keyframe_interval: 120,
            ice_gathering_timeout_ms: 5_000,
            max_sessions: 0,
            pace_frames: true,
        }
    }
}

/// WebSocket (byte-stream) viewer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Largest accepted inbound message (input events are small)
    pub max_message_size: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // Load config file if provided
        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (BROWSERCAST_SERVER__PORT, BROWSERCAST_LOGGING__FILE_PATH, ...)
        builder = builder.add_source(
            Environment::with_prefix("BROWSERCAST")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("webrtc.ice_servers")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Check the configuration for values the service cannot run with.
    ///
    /// Returns every problem found rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            errors.push("browser viewport dimensions must be non-zero".to_string());
        }
        if !matches!(self.browser.screencast_format.as_str(), "jpeg" | "png") {
            errors.push(format!(
                "browser.screencast_format must be \"jpeg\" or \"png\", got \"{}\"",
                self.browser.screencast_format
            ));
        }
        if self.browser.screencast_quality > 100 {
            errors.push("browser.screencast_quality must be between 0 and 100".to_string());
        }
        if self.browser.every_nth_frame == 0 {
            errors.push("browser.every_nth_frame must be at least 1".to_string());
        }
        if self.webrtc.frame_rate == 0 {
            errors.push("webrtc.frame_rate must be non-zero".to_string());
        } else if self.webrtc.clock_rate < self.webrtc.frame_rate {
            errors.push("webrtc.clock_rate must not be lower than webrtc.frame_rate".to_string());
        }
        if self.viewer.max_message_size == 0 {
            errors.push("viewer.max_message_size must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.server.port > 0);
        assert_eq!(config.browser.viewport_width, 1280);
        assert_eq!(config.browser.viewport_height, 720);
        assert_eq!(config.webrtc.clock_rate, 90_000);
        assert_eq!(config.webrtc.frame_rate, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            ..Config::default()
        };

        assert_eq!(config.http_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        config.browser.screencast_format = "webp".to_string();
        config.webrtc.frame_rate = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("logging.format")));
        assert!(errors.iter().any(|e| e.contains("screencast_format")));
        assert!(errors.iter().any(|e| e.contains("frame_rate")));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "server:\n  port: 9001\nbrowser:\n  start_url: \"https://example.com\"\n  viewport_width: 800"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.browser.start_url, "https://example.com");
        assert_eq!(config.browser.viewport_width, 800);
        // Untouched sections keep their defaults
        assert_eq!(config.browser.viewport_height, 720);
        assert_eq!(config.webrtc.frame_rate, 30);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/browsercast.yaml")).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
