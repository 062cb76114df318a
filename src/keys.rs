//! Key-input notation encoding.
//!
//! Front-ends forward keyboard input as structured events rather than raw
//! bytes, because the byte encoding of a key depends on terminal modes only
//! the daemon knows. An event carries the produced character (`key`) and
//! physical key name (`code`) per the W3C UI Events spec, plus modifier
//! flags; the encoder turns it into the byte sequence the application
//! inside the PTY expects.

use serde::Deserialize;

/// A key event in W3C notation.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyEvent {
    /// Produced character or named key ("a", "Enter", "ArrowUp", ...).
    pub key: String,
    /// Physical key name ("KeyA", "Digit1", ...). Unused by the encoder
    /// today but carried for front-ends that report it.
    pub code: String,
    #[serde(rename = "shiftKey")]
    pub shift: bool,
    #[serde(rename = "ctrlKey")]
    pub ctrl: bool,
    #[serde(rename = "altKey")]
    pub alt: bool,
    #[serde(rename = "metaKey")]
    pub meta: bool,
}

impl KeyEvent {
    /// xterm modifier parameter: 1 + shift(1) + alt(2) + ctrl(4) + meta(8).
    fn modifier_param(&self) -> u8 {
        1 + (self.shift as u8) + ((self.alt as u8) << 1) + ((self.ctrl as u8) << 2)
            + ((self.meta as u8) << 3)
    }

    fn has_modifiers(&self) -> bool {
        self.shift || self.ctrl || self.alt || self.meta
    }
}

/// Encode a key event into PTY bytes.
///
/// `application_cursor` is the terminal's DECCKM state: when set, unmodified
/// cursor keys send SS3 (`ESC O x`) instead of CSI (`ESC [ x`) sequences.
///
/// # Encoding rules
/// - Named keys: Enter -> CR, Tab -> HT (Shift+Tab -> CSI Z),
///   Backspace -> DEL (Ctrl+Backspace -> BS), Escape -> ESC
/// - Cursor keys (arrows, Home, End): CSI or SS3 final A-F/H, modifiers via
///   `CSI 1;<p> <final>`
/// - Editing keys (Insert, Delete, PageUp, PageDown): `CSI <n> ~`,
///   modifiers via `CSI <n>;<p> ~`
/// - F1-F4: SS3 P-S (CSI 1;<p> P-S with modifiers); F5-F12: `CSI <n> ~`
/// - Single characters: Ctrl maps into the C0 range where defined, Alt
///   prefixes ESC, otherwise the character's UTF-8 bytes (`key` already
///   reflects Shift)
///
/// Returns `None` for keys with no byte encoding (bare modifiers, unknown
/// named keys).
pub fn encode_key(event: &KeyEvent, application_cursor: bool) -> Option<Vec<u8>> {
    match event.key.as_str() {
        "Enter" => Some(with_alt_prefix(event, vec![b'\r'])),
        "Tab" => {
            if event.shift {
                Some(b"\x1b[Z".to_vec())
            } else {
                Some(with_alt_prefix(event, vec![b'\t']))
            }
        }
        "Backspace" => {
            let byte = if event.ctrl { 0x08 } else { 0x7f };
            Some(with_alt_prefix(event, vec![byte]))
        }
        "Escape" => Some(vec![0x1b]),

        "ArrowUp" => Some(cursor_key(event, b'A', application_cursor)),
        "ArrowDown" => Some(cursor_key(event, b'B', application_cursor)),
        "ArrowRight" => Some(cursor_key(event, b'C', application_cursor)),
        "ArrowLeft" => Some(cursor_key(event, b'D', application_cursor)),
        "Home" => Some(cursor_key(event, b'H', application_cursor)),
        "End" => Some(cursor_key(event, b'F', application_cursor)),

        "Insert" => Some(tilde_key(event, 2)),
        "Delete" => Some(tilde_key(event, 3)),
        "PageUp" => Some(tilde_key(event, 5)),
        "PageDown" => Some(tilde_key(event, 6)),

        "F1" => Some(ss3_function_key(event, b'P')),
        "F2" => Some(ss3_function_key(event, b'Q')),
        "F3" => Some(ss3_function_key(event, b'R')),
        "F4" => Some(ss3_function_key(event, b'S')),
        "F5" => Some(tilde_key(event, 15)),
        "F6" => Some(tilde_key(event, 17)),
        "F7" => Some(tilde_key(event, 18)),
        "F8" => Some(tilde_key(event, 19)),
        "F9" => Some(tilde_key(event, 20)),
        "F10" => Some(tilde_key(event, 21)),
        "F11" => Some(tilde_key(event, 23)),
        "F12" => Some(tilde_key(event, 24)),

        // Bare modifier presses produce no bytes.
        "Shift" | "Control" | "Alt" | "Meta" => None,

        key => {
            let mut chars = key.chars();
            let ch = chars.next()?;
            if chars.next().is_some() {
                // Multi-character named key we don't recognize.
                return None;
            }
            Some(encode_char(event, ch))
        }
    }
}

/// Encode a single produced character, applying Ctrl and Alt.
fn encode_char(event: &KeyEvent, ch: char) -> Vec<u8> {
    let bytes = if event.ctrl {
        match ch {
            'a'..='z' => vec![ch as u8 - b'a' + 1],
            'A'..='Z' => vec![ch as u8 - b'A' + 1],
            ' ' | '@' => vec![0x00],
            '[' => vec![0x1b],
            '\\' => vec![0x1c],
            ']' => vec![0x1d],
            '^' => vec![0x1e],
            '_' => vec![0x1f],
            other => other.to_string().into_bytes(),
        }
    } else {
        ch.to_string().into_bytes()
    };
    with_alt_prefix(event, bytes)
}

fn with_alt_prefix(event: &KeyEvent, mut bytes: Vec<u8>) -> Vec<u8> {
    if event.alt {
        bytes.insert(0, 0x1b);
    }
    bytes
}

fn cursor_key(event: &KeyEvent, final_byte: u8, application_cursor: bool) -> Vec<u8> {
    if event.has_modifiers() {
        let mut seq = format!("\x1b[1;{}", event.modifier_param()).into_bytes();
        seq.push(final_byte);
        seq
    } else if application_cursor {
        vec![0x1b, b'O', final_byte]
    } else {
        vec![0x1b, b'[', final_byte]
    }
}

fn tilde_key(event: &KeyEvent, number: u8) -> Vec<u8> {
    if event.has_modifiers() {
        format!("\x1b[{};{}~", number, event.modifier_param()).into_bytes()
    } else {
        format!("\x1b[{number}~").into_bytes()
    }
}

fn ss3_function_key(event: &KeyEvent, final_byte: u8) -> Vec<u8> {
    if event.has_modifiers() {
        let mut seq = format!("\x1b[1;{}", event.modifier_param()).into_bytes();
        seq.push(final_byte);
        seq
    } else {
        vec![0x1b, b'O', final_byte]
    }
}
