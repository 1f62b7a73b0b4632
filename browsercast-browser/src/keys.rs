//! Key names to DevTools key event fields

/// What `Input.dispatchKeyEvent` needs to know about a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDefinition {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    /// Text the key produces, if any
    pub text: Option<String>,
}

/// `(key, code, windows virtual key code, text)`
const NAMED_KEYS: &[(&str, &str, u32, Option<&str>)] = &[
    ("Enter", "Enter", 13, Some("\r")),
    ("Tab", "Tab", 9, None),
    ("Backspace", "Backspace", 8, None),
    ("Escape", "Escape", 27, None),
    ("Delete", "Delete", 46, None),
    ("Insert", "Insert", 45, None),
    ("Home", "Home", 36, None),
    ("End", "End", 35, None),
    ("PageUp", "PageUp", 33, None),
    ("PageDown", "PageDown", 34, None),
    ("ArrowLeft", "ArrowLeft", 37, None),
    ("ArrowUp", "ArrowUp", 38, None),
    ("ArrowRight", "ArrowRight", 39, None),
    ("ArrowDown", "ArrowDown", 40, None),
    ("Shift", "ShiftLeft", 16, None),
    ("Control", "ControlLeft", 17, None),
    ("Alt", "AltLeft", 18, None),
    ("Meta", "MetaLeft", 91, None),
    ("CapsLock", "CapsLock", 20, None),
    (" ", "Space", 32, Some(" ")),
];

/// Aliases some clients send instead of DOM key names
const ALIASES: &[(&str, &str)] = &[
    ("Space", " "),
    ("Esc", "Escape"),
    ("Return", "Enter"),
    ("Up", "ArrowUp"),
    ("Down", "ArrowDown"),
    ("Left", "ArrowLeft"),
    ("Right", "ArrowRight"),
    ("Ctrl", "Control"),
    ("Cmd", "Meta"),
];

/// Resolve a DOM key name (`"Enter"`, `"a"`, `"F5"`) to its key event fields.
#[must_use]
pub fn key_definition(key: &str) -> KeyDefinition {
    let key = ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |(_, name)| *name);

    if let Some(&(key, code, key_code, text)) = NAMED_KEYS.iter().find(|(name, ..)| *name == key) {
        return KeyDefinition {
            key: key.to_string(),
            code: code.to_string(),
            key_code,
            text: text.map(str::to_string),
        };
    }

    if let Some(n) = key.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=12).contains(&n) {
            return KeyDefinition {
                key: key.to_string(),
                code: key.to_string(),
                key_code: 111 + n,
                text: None,
            };
        }
    }

    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return char_definition(c);
    }

    KeyDefinition {
        key: key.to_string(),
        code: String::new(),
        key_code: 0,
        text: None,
    }
}

fn char_definition(c: char) -> KeyDefinition {
    let (code, key_code) = if c.is_ascii_alphabetic() {
        let upper = c.to_ascii_uppercase();
        (format!("Key{upper}"), u32::from(upper))
    } else if c.is_ascii_digit() {
        (format!("Digit{c}"), u32::from(c))
    } else {
        (String::new(), 0)
    };

    KeyDefinition {
        key: c.to_string(),
        code,
        key_code,
        text: (!c.is_control()).then(|| c.to_string()),
    }
}
