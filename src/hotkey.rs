//! Detail hotkey parsing and polling
//!
//! The detail hotkey is either a keyboard chord ("F9", "Ctrl+Shift+D") or a
//! mouse button ("mouse:x1"). It is polled once per scan iteration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HotkeyError {
    #[error("empty hotkey")]
    Empty,
    #[error("unknown key: {0}")]
    UnknownKey(String),
    #[error("unknown mouse button: {0}")]
    UnknownButton(String),
}

/// Keyboard keys the detail hotkey can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// F1 - F12
    Function(u8),
    /// A - Z and 0 - 9, uppercase
    Char(char),
    Numpad(u8),
    Space,
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    Shift,
    Control,
    Alt,
    Meta,
    Backquote,
}

impl Key {
    /// Canonical name, accepted by `DetailHotkey::parse`
    pub fn name(&self) -> String {
        match self {
            Key::Function(n) => format!("F{}", n),
            Key::Char(c) => c.to_string(),
            Key::Numpad(n) => format!("Num{}", n),
            Key::Control => "Ctrl".to_string(),
            Key::Backquote => "`".to_string(),
            other => format!("{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

impl MouseButton {
    pub fn name(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::X1 => "x1",
            MouseButton::X2 => "x2",
        }
    }
}

/// Parsed detail hotkey
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailHotkey {
    /// Every key must be held
    Keyboard(Vec<Key>),
    Mouse(MouseButton),
}

impl DetailHotkey {
    /// Parse "F9", "Ctrl+Shift+O", "mouse:right", "mouse:x1" ...
    pub fn parse(value: &str) -> Result<Self, HotkeyError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(HotkeyError::Empty);
        }

        let lower = value.to_lowercase();
        if let Some(button) = lower.strip_prefix("mouse:") {
            return parse_mouse_button(button.trim()).map(DetailHotkey::Mouse);
        }

        let keys = value
            .split('+')
            .map(|part| parse_key(&part.trim().to_uppercase()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DetailHotkey::Keyboard(keys))
    }
}

impl FromStr for DetailHotkey {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DetailHotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailHotkey::Mouse(button) => write!(f, "mouse:{}", button.name()),
            DetailHotkey::Keyboard(keys) => {
                let names: Vec<String> = keys.iter().map(Key::name).collect();
                f.write_str(&names.join("+"))
            }
        }
    }
}

impl Serialize for DetailHotkey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DetailHotkey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DetailHotkey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for an optional hotkey. A disabled hotkey is written as
/// `"none"` so it survives a save and reload over a non-empty default.
pub mod optional {
    use super::DetailHotkey;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const DISABLED: &str = "none";

    pub fn serialize<S: Serializer>(hotkey: &Option<DetailHotkey>, serializer: S) -> Result<S::Ok, S::Error> {
        match hotkey {
            Some(hotkey) => serializer.serialize_str(&hotkey.to_string()),
            None => serializer.serialize_str(DISABLED),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DetailHotkey>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(DISABLED) || trimmed.eq_ignore_ascii_case("off") {
            return Ok(None);
        }
        DetailHotkey::parse(trimmed).map(Some).map_err(serde::de::Error::custom)
    }
}

fn parse_mouse_button(name: &str) -> Result<MouseButton, HotkeyError> {
    let button = match name {
        "left" | "l" | "1" => MouseButton::Left,
        "right" | "r" | "2" => MouseButton::Right,
        "middle" | "m" | "3" => MouseButton::Middle,
        "x1" | "back" | "4" => MouseButton::X1,
        "x2" | "forward" | "5" => MouseButton::X2,
        _ => return Err(HotkeyError::UnknownButton(name.to_string())),
    };
    Ok(button)
}

/// Parse one uppercase key name
fn parse_key(key: &str) -> Result<Key, HotkeyError> {
    if let Some(n) = key.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
        if (1..=12).contains(&n) {
            return Ok(Key::Function(n));
        }
    }

    if let Some(n) = key
        .strip_prefix("NUMPAD")
        .or_else(|| key.strip_prefix("NUM"))
        .and_then(|n| n.parse::<u8>().ok())
    {
        if n <= 9 {
            return Ok(Key::Numpad(n));
        }
    }

    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_uppercase() || c.is_ascii_digit() {
            return Ok(Key::Char(c));
        }
        if c == '`' || c == '~' {
            return Ok(Key::Backquote);
        }
    }

    let named = match key {
        "SPACE" => Key::Space,
        "ENTER" | "RETURN" => Key::Enter,
        "TAB" => Key::Tab,
        "ESCAPE" | "ESC" => Key::Escape,
        "BACKSPACE" => Key::Backspace,
        "DELETE" | "DEL" => Key::Delete,
        "INSERT" | "INS" => Key::Insert,
        "HOME" => Key::Home,
        "END" => Key::End,
        "PAGEUP" | "PGUP" => Key::PageUp,
        "PAGEDOWN" | "PGDN" => Key::PageDown,
        "UP" => Key::Up,
        "DOWN" => Key::Down,
        "LEFT" => Key::Left,
        "RIGHT" => Key::Right,
        "SHIFT" => Key::Shift,
        "CTRL" | "CONTROL" => Key::Control,
        "ALT" => Key::Alt,
        "WIN" | "SUPER" | "META" => Key::Meta,
        _ => return Err(HotkeyError::UnknownKey(key.to_string())),
    };

    Ok(named)
}

/// Polls the current keyboard/mouse state
pub trait InputPoller {
    fn is_pressed(&self, hotkey: &DetailHotkey) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_key() {
        assert_eq!(
            DetailHotkey::parse("F9").unwrap(),
            DetailHotkey::Keyboard(vec![Key::Function(9)])
        );
        assert_eq!(
            DetailHotkey::parse("shift").unwrap(),
            DetailHotkey::Keyboard(vec![Key::Shift])
        );
    }

    #[test]
    fn test_parse_with_modifiers() {
        assert_eq!(
            DetailHotkey::parse("Ctrl+Shift+O").unwrap(),
            DetailHotkey::Keyboard(vec![Key::Control, Key::Shift, Key::Char('O')])
        );
    }

    #[test]
    fn test_parse_mouse_buttons() {
        assert_eq!(
            DetailHotkey::parse("mouse:x1").unwrap(),
            DetailHotkey::Mouse(MouseButton::X1)
        );
        assert_eq!(
            DetailHotkey::parse("Mouse:Right").unwrap(),
            DetailHotkey::Mouse(MouseButton::Right)
        );
        assert_eq!(
            DetailHotkey::parse("mouse:wheel"),
            Err(HotkeyError::UnknownButton("wheel".to_string()))
        );
    }

    #[test]
    fn test_parse_numpad_and_digits() {
        assert_eq!(DetailHotkey::parse("Num5").unwrap(), DetailHotkey::Keyboard(vec![Key::Numpad(5)]));
        assert_eq!(DetailHotkey::parse("7").unwrap(), DetailHotkey::Keyboard(vec![Key::Char('7')]));
    }

    #[test]
    fn test_parse_invalid_key() {
        assert!(matches!(DetailHotkey::parse("InvalidKey"), Err(HotkeyError::UnknownKey(_))));
        assert!(DetailHotkey::parse("F13").is_err());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(DetailHotkey::parse("  "), Err(HotkeyError::Empty));
    }

    #[test]
    fn test_serde_roundtrip_through_display() {
        for s in ["F9", "Ctrl+Alt+D", "mouse:x2", "Num0", "Backspace"] {
            let hotkey = DetailHotkey::parse(s).unwrap();
            assert_eq!(DetailHotkey::parse(&hotkey.to_string()).unwrap(), hotkey);
        }
    }
}
