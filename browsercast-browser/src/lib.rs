//! Browsercast frame source
//!
//! Drives a headless Chrome/Chromium over the DevTools protocol: its screencast
//! feeds the [`Broadcaster`](browsercast_stream::Broadcaster) and viewer input is
//! replayed into the page.
//!
//! ## Architecture
//!
//! - **`BrowserController`**: Starts and stops the browser, implements `InputSink`
//! - **`BrowserSession`**: One running page with its screencast
//! - **`CdpConnection`**: Command/response and event handling over one WebSocket
//!
//! ## Usage
//!
//! ```rust,ignore
//! use browsercast_browser::{BrowserController, BrowserOptions};
//!
//! let controller = BrowserController::new(BrowserOptions::default(), broadcaster.clone());
//! controller.start().await?;
//! ```

mod actions;
mod cdp;
mod chrome;
mod controller;
mod error;
mod keys;
mod options;
mod session;

pub use actions::{plan, ActionPlan, CdpCall};
pub use cdp::CdpConnection;
pub use chrome::find_chrome;
pub use controller::{BrowserController, BrowserStatus};
pub use error::{BrowserError, Result};
pub use keys::{key_definition, KeyDefinition};
pub use options::{BrowserOptions, ScreencastFormat, Viewport};
pub use session::BrowserSession;
