//! Viewer input events and the sink that applies them to the browser
//!
//! Text records arriving on a viewer connection (WebSocket text frames or WebRTC
//! data-channel messages) are decoded once into [`InputAction`] and handed to an
//! [`InputSink`]. Anything that fails to decode is dropped without affecting the
//! connection it came from.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::{InputError, StreamError};

/// Mouse button referenced by pointer events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

impl MouseButton {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Middle => "middle",
            Self::Right => "right",
        }
    }
}

/// Keyboard modifiers held while an event happened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    /// Bit mask in DevTools protocol layout (alt=1, ctrl=2, meta=4, shift=8)
    #[must_use]
    pub const fn bits(self) -> u8 {
        (self.alt as u8) | (self.ctrl as u8) << 1 | (self.meta as u8) << 2 | (self.shift as u8) << 3
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.bits() == 0
    }
}

/// A decoded viewer input event
#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    MouseMove {
        x: f64,
        y: f64,
        modifiers: Modifiers,
    },
    MouseDown {
        x: f64,
        y: f64,
        button: MouseButton,
        modifiers: Modifiers,
    },
    MouseUp {
        x: f64,
        y: f64,
        button: MouseButton,
        modifiers: Modifiers,
    },
    Click {
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
        modifiers: Modifiers,
    },
    Scroll {
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    },
    KeyDown {
        key: String,
        modifiers: Modifiers,
    },
    KeyUp {
        key: String,
        modifiers: Modifiers,
    },
    /// Key down followed by key up
    KeyPress {
        key: String,
        modifiers: Modifiers,
    },
    /// Insert literal text at the focused element
    Type {
        text: String,
    },
    Navigate {
        url: String,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Back,
    Forward,
    Reload,
}

impl InputAction {
    /// Decode one text record.
    ///
    /// `Ok(None)` means the record was well formed but names an action this
    /// service does not know, which callers ignore.
    pub fn parse(text: &str) -> Result<Option<Self>, InputError> {
        let record: WireInput = serde_json::from_str(text)?;
        record.into_action()
    }

    /// Wire name of the action
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MouseMove { .. } => "mousemove",
            Self::MouseDown { .. } => "mousedown",
            Self::MouseUp { .. } => "mouseup",
            Self::Click { .. } => "click",
            Self::Scroll { .. } => "scroll",
            Self::KeyDown { .. } => "keydown",
            Self::KeyUp { .. } => "keyup",
            Self::KeyPress { .. } => "keypress",
            Self::Type { .. } => "type",
            Self::Navigate { .. } => "navigate",
            Self::Resize { .. } => "resize",
            Self::Back => "back",
            Self::Forward => "forward",
            Self::Reload => "reload",
        }
    }
}

/// Prefix scheme-less addresses with `https://`
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireModifiers {
    alt_key: bool,
    ctrl_key: bool,
    meta_key: bool,
    shift_key: bool,
}

impl From<WireModifiers> for Modifiers {
    fn from(m: WireModifiers) -> Self {
        Self {
            alt: m.alt_key,
            ctrl: m.ctrl_key,
            meta: m.meta_key,
            shift: m.shift_key,
        }
    }
}

/// Wire shape of an input record, `{"action": "...", ...params}`
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum WireInput {
    MouseMove {
        x: f64,
        y: f64,
        #[serde(flatten)]
        modifiers: WireModifiers,
    },
    MouseDown {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
        #[serde(flatten)]
        modifiers: WireModifiers,
    },
    MouseUp {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
        #[serde(flatten)]
        modifiers: WireModifiers,
    },
    Click {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
        #[serde(default, rename = "clickCount")]
        click_count: Option<u32>,
        #[serde(flatten)]
        modifiers: WireModifiers,
    },
    Scroll {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default, rename = "deltaX")]
        delta_x: f64,
        #[serde(default, rename = "deltaY")]
        delta_y: f64,
    },
    KeyDown {
        key: String,
        #[serde(flatten)]
        modifiers: WireModifiers,
    },
    KeyUp {
        key: String,
        #[serde(flatten)]
        modifiers: WireModifiers,
    },
    KeyPress {
        key: String,
        #[serde(flatten)]
        modifiers: WireModifiers,
    },
    Type {
        text: String,
    },
    Navigate {
        url: String,
    },
    Resize {
        #[serde(deserialize_with = "lenient_u32")]
        width: u32,
        #[serde(deserialize_with = "lenient_u32")]
        height: u32,
    },
    Back,
    Forward,
    Reload,
    #[serde(other)]
    Unknown,
}

impl WireInput {
    fn into_action(self) -> Result<Option<InputAction>, InputError> {
        let action = match self {
            Self::MouseMove { x, y, modifiers } => InputAction::MouseMove {
                x,
                y,
                modifiers: modifiers.into(),
            },
            Self::MouseDown { x, y, button, modifiers } => InputAction::MouseDown {
                x,
                y,
                button,
                modifiers: modifiers.into(),
            },
            Self::MouseUp { x, y, button, modifiers } => InputAction::MouseUp {
                x,
                y,
                button,
                modifiers: modifiers.into(),
            },
            Self::Click {
                x,
                y,
                button,
                click_count,
                modifiers,
            } => InputAction::Click {
                x,
                y,
                button,
                click_count: click_count.unwrap_or(1).max(1),
                modifiers: modifiers.into(),
            },
            Self::Scroll {
                x,
                y,
                delta_x,
                delta_y,
            } => InputAction::Scroll {
                x,
                y,
                delta_x,
                delta_y,
            },
            Self::KeyDown { key, modifiers } => InputAction::KeyDown {
                key: non_empty(key, "keydown", "key must not be empty")?,
                modifiers: modifiers.into(),
            },
            Self::KeyUp { key, modifiers } => InputAction::KeyUp {
                key: non_empty(key, "keyup", "key must not be empty")?,
                modifiers: modifiers.into(),
            },
            Self::KeyPress { key, modifiers } => InputAction::KeyPress {
                key: non_empty(key, "keypress", "key must not be empty")?,
                modifiers: modifiers.into(),
            },
            Self::Type { text } => InputAction::Type {
                text: non_empty(text, "type", "text must not be empty")?,
            },
            Self::Navigate { url } => {
                let url = non_empty(url, "navigate", "url must not be empty")?;
                InputAction::Navigate {
                    url: normalize_url(&url),
                }
            }
            Self::Resize { width, height } => {
                if width == 0 || height == 0 {
                    return Err(InputError::Invalid {
                        action: "resize",
                        reason: "width and height must be non-zero",
                    });
                }
                InputAction::Resize { width, height }
            }
            Self::Back => InputAction::Back,
            Self::Forward => InputAction::Forward,
            Self::Reload => InputAction::Reload,
            Self::Unknown => return Ok(None),
        };
        Ok(Some(action))
    }
}

fn non_empty(value: String, action: &'static str, reason: &'static str) -> Result<String, InputError> {
    if value.trim().is_empty() {
        return Err(InputError::Invalid { action, reason });
    }
    Ok(value)
}

/// Accept both `640` and `"640"`; browsers often report sizes as strings.
fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    let value = match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n,
        NumberOrString::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s}")))?,
    };
    if !(0.0..=f64::from(u32::MAX)).contains(&value) {
        return Err(serde::de::Error::custom("dimension out of range"));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value.round() as u32)
}

/// Applies viewer input to the browser
///
/// Implementations are best effort: a returned error is logged by the caller and
/// never tears down the connection that delivered the event.
#[async_trait]
pub trait InputSink: Send + Sync + 'static {
    async fn apply_input(&self, action: InputAction) -> Result<(), StreamError>;
}

/// Outcome of handling one inbound text record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    Ignored,
    Malformed,
    Failed,
}

/// Decode `text` and forward it to `sink`, logging instead of propagating failures.
///
/// `origin` identifies the connection in log output.
pub async fn dispatch_text(sink: &dyn InputSink, text: &str, origin: &str) -> Dispatch {
    let action = match InputAction::parse(text) {
        Ok(Some(action)) => action,
        Ok(None) => {
            debug!(origin, "Ignoring unknown input action");
            return Dispatch::Ignored;
        }
        Err(e) => {
            debug!(origin, error = %e, "Dropping malformed input");
            return Dispatch::Malformed;
        }
    };

    let name = action.name();
    match sink.apply_input(action).await {
        Ok(()) => Dispatch::Applied,
        Err(e) => {
            warn!(origin, action = name, error = %e, "Failed to apply input");
            Dispatch::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        actions: Mutex<Vec<InputAction>>,
    }

    #[async_trait]
    impl InputSink for RecordingSink {
        async fn apply_input(&self, action: InputAction) -> Result<(), StreamError> {
            self.actions.lock().push(action);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl InputSink for FailingSink {
        async fn apply_input(&self, _action: InputAction) -> Result<(), StreamError> {
            Err(StreamError::InputRejected("browser not running".to_string()))
        }
    }

    #[test]
    fn test_parse_mousemove() {
        let action = InputAction::parse(r#"{"action":"mousemove","x":10,"y":20.5}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            action,
            InputAction::MouseMove {
                x: 10.0,
                y: 20.5,
                modifiers: Modifiers::default()
            }
        );
    }

    #[test]
    fn test_parse_click_defaults() {
        let action = InputAction::parse(r#"{"action":"click","x":1,"y":2}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            action,
            InputAction::Click {
                x: 1.0,
                y: 2.0,
                button: MouseButton::Left,
                click_count: 1,
                modifiers: Modifiers::default()
            }
        );
    }

    #[test]
    fn test_parse_modifier_flags() {
        let action =
            InputAction::parse(r#"{"action":"keypress","key":"a","ctrlKey":true,"shiftKey":true}"#)
                .unwrap()
                .unwrap();
        let InputAction::KeyPress { key, modifiers } = action else {
            panic!("expected keypress, got {action:?}");
        };
        assert_eq!(key, "a");
        assert!(modifiers.ctrl && modifiers.shift);
        assert_eq!(modifiers.bits(), 2 | 8);
    }

    #[test]
    fn test_parse_scroll_deltas() {
        let action = InputAction::parse(r#"{"action":"scroll","deltaX":0,"deltaY":-120}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            action,
            InputAction::Scroll {
                x: 0.0,
                y: 0.0,
                delta_x: 0.0,
                delta_y: -120.0
            }
        );
    }

    #[test]
    fn test_parse_resize_accepts_strings() {
        let action = InputAction::parse(r#"{"action":"resize","width":"1024","height":768}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            action,
            InputAction::Resize {
                width: 1024,
                height: 768
            }
        );
    }

    #[test]
    fn test_parse_navigate_adds_scheme() {
        let action = InputAction::parse(r#"{"action":"navigate","url":"example.com"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            action,
            InputAction::Navigate {
                url: "https://example.com".to_string()
            }
        );
        assert_eq!(normalize_url("http://a.b"), "http://a.b");
        assert_eq!(normalize_url("about:blank"), "about:blank");
    }

    #[test]
    fn test_unknown_action_is_ignored() {
        assert!(InputAction::parse(r#"{"action":"teleport","x":1}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_records() {
        assert!(InputAction::parse("not json").is_err());
        assert!(InputAction::parse(r#"{"x":1,"y":2}"#).is_err());
        assert!(InputAction::parse(r#"{"action":"click","x":"left"}"#).is_err());
        assert!(InputAction::parse(r#"{"action":"type","text":""}"#).is_err());
        assert!(InputAction::parse(r#"{"action":"resize","width":0,"height":10}"#).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let sink = RecordingSink::default();

        assert_eq!(
            dispatch_text(&sink, r#"{"action":"type","text":"hi"}"#, "test").await,
            Dispatch::Applied
        );
        assert_eq!(dispatch_text(&sink, "{{{", "test").await, Dispatch::Malformed);
        assert_eq!(
            dispatch_text(&sink, r#"{"action":"dance"}"#, "test").await,
            Dispatch::Ignored
        );
        assert_eq!(sink.actions.lock().len(), 1);

        assert_eq!(
            dispatch_text(&FailingSink, r#"{"action":"reload"}"#, "test").await,
            Dispatch::Failed
        );
    }
}
