//! Translation of viewer input into DevTools commands

use browsercast_stream::{normalize_url, InputAction, Modifiers, MouseButton};
use serde_json::{json, Value};

use crate::keys::key_definition;

/// One DevTools command
#[derive(Debug, Clone, PartialEq)]
pub struct CdpCall {
    pub method: &'static str,
    pub params: Value,
}

impl CdpCall {
    fn new(method: &'static str, params: Value) -> Self {
        Self { method, params }
    }
}

/// How the browser session carries out an input action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPlan {
    /// Send these commands in order
    Dispatch(Vec<CdpCall>),
    Navigate(String),
    Resize { width: u32, height: u32 },
    Back,
    Forward,
    Reload,
}

#[derive(Debug, Clone, Copy)]
enum KeyPhase {
    Down,
    Up,
}

/// Plan the commands for `action`.
#[must_use]
pub fn plan(action: &InputAction) -> ActionPlan {
    match action {
        InputAction::MouseMove { x, y, modifiers } => ActionPlan::Dispatch(vec![mouse(
            "mouseMoved",
            *x,
            *y,
            None,
            0,
            *modifiers,
        )]),
        InputAction::MouseDown {
            x,
            y,
            button,
            modifiers,
        } => ActionPlan::Dispatch(vec![mouse("mousePressed", *x, *y, Some(*button), 1, *modifiers)]),
        InputAction::MouseUp {
            x,
            y,
            button,
            modifiers,
        } => ActionPlan::Dispatch(vec![mouse("mouseReleased", *x, *y, Some(*button), 1, *modifiers)]),
        InputAction::Click {
            x,
            y,
            button,
            click_count,
            modifiers,
        } => ActionPlan::Dispatch(vec![
            mouse("mouseMoved", *x, *y, None, 0, *modifiers),
            mouse("mousePressed", *x, *y, Some(*button), *click_count, *modifiers),
            mouse("mouseReleased", *x, *y, Some(*button), *click_count, *modifiers),
        ]),
        InputAction::Scroll {
            x,
            y,
            delta_x,
            delta_y,
        } => ActionPlan::Dispatch(vec![CdpCall::new(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseWheel",
                "x": x,
                "y": y,
                "deltaX": delta_x,
                "deltaY": delta_y,
            }),
        )]),
        InputAction::KeyDown { key, modifiers } => {
            ActionPlan::Dispatch(vec![key_event(KeyPhase::Down, key, *modifiers)])
        }
        InputAction::KeyUp { key, modifiers } => {
            ActionPlan::Dispatch(vec![key_event(KeyPhase::Up, key, *modifiers)])
        }
        InputAction::KeyPress { key, modifiers } => ActionPlan::Dispatch(vec![
            key_event(KeyPhase::Down, key, *modifiers),
            key_event(KeyPhase::Up, key, *modifiers),
        ]),
        InputAction::Type { text } => ActionPlan::Dispatch(vec![CdpCall::new(
            "Input.insertText",
            json!({ "text": text }),
        )]),
        InputAction::Navigate { url } => ActionPlan::Navigate(normalize_url(url)),
        InputAction::Resize { width, height } => ActionPlan::Resize {
            width: *width,
            height: *height,
        },
        InputAction::Back => ActionPlan::Back,
        InputAction::Forward => ActionPlan::Forward,
        InputAction::Reload => ActionPlan::Reload,
    }
}

fn mouse(
    kind: &str,
    x: f64,
    y: f64,
    button: Option<MouseButton>,
    click_count: u32,
    modifiers: Modifiers,
) -> CdpCall {
    let mut params = json!({
        "type": kind,
        "x": x,
        "y": y,
        "modifiers": modifiers.bits(),
        "button": button.map_or("none", MouseButton::as_str),
    });
    if click_count > 0 {
        params["clickCount"] = json!(click_count);
    }
    CdpCall::new("Input.dispatchMouseEvent", params)
}

fn key_event(phase: KeyPhase, key: &str, modifiers: Modifiers) -> CdpCall {
    let definition = key_definition(key);
    // Shortcuts such as Ctrl+A must not also insert text
    let text = definition
        .text
        .filter(|_| !(modifiers.ctrl || modifiers.meta || modifiers.alt));

    let kind = match (phase, &text) {
        (KeyPhase::Down, Some(_)) => "keyDown",
        (KeyPhase::Down, None) => "rawKeyDown",
        (KeyPhase::Up, _) => "keyUp",
    };

    let mut params = json!({
        "type": kind,
        "key": definition.key,
        "code": definition.code,
        "windowsVirtualKeyCode": definition.key_code,
        "nativeVirtualKeyCode": definition.key_code,
        "modifiers": modifiers.bits(),
    });
    if let (KeyPhase::Down, Some(text)) = (phase, text) {
        params["text"] = json!(text.clone());
        params["unmodifiedText"] = json!(text);
    }
    CdpCall::new("Input.dispatchKeyEvent", params)
}
