//! Resolved cell styles and the per-session style ID interner.

use avt::Pen;
use std::collections::HashMap;

/// A foreground or background color: 256-color palette index or 24-bit RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Indexed(u8),
    Rgb { r: u8, g: u8, b: u8 },
}

impl Color {
    fn from_avt(c: avt::Color) -> Self {
        match c {
            avt::Color::Indexed(i) => Color::Indexed(i),
            avt::Color::RGB(rgb) => Color::Rgb {
                r: rgb.r,
                g: rgb.g,
                b: rgb.b,
            },
        }
    }

    /// Pack an RGB color as 0x00RRGGBB.
    pub fn packed_rgb(self) -> Option<u32> {
        match self {
            Color::Rgb { r, g, b } => Some(((r as u32) << 16) | ((g as u32) << 8) | b as u32),
            Color::Indexed(_) => None,
        }
    }

    pub fn palette_index(self) -> Option<u8> {
        match self {
            Color::Indexed(i) => Some(i),
            Color::Rgb { .. } => None,
        }
    }
}

/// Resolved style attributes referenced by snapshot cells.
///
/// Styles are values: never mutated, only referenced by 16-bit IDs assigned
/// by the [`StyleInterner`]. ID 0 always denotes the default style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Style {
    pub fg: Option<Color>,
    pub bg: Option<Color>,
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: bool,
    pub reverse: bool,
    pub blink: bool,
}

impl Style {
    pub fn from_pen(pen: &Pen) -> Self {
        Style {
            fg: pen.foreground().map(Color::from_avt),
            bg: pen.background().map(Color::from_avt),
            bold: pen.is_bold(),
            dim: pen.is_faint(),
            italic: pen.is_italic(),
            underline: pen.is_underline(),
            reverse: pen.is_inverse(),
            blink: pen.is_blink(),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Style::default()
    }
}

/// Assigns stable non-zero 16-bit IDs to distinct styles.
///
/// IDs are stable for a session's lifetime: the same style always resolves
/// to the same ID, and IDs are never reused. On the (pathological)
/// exhaustion of the 16-bit space, new styles degrade to the default ID 0.
pub struct StyleInterner {
    ids: HashMap<Style, u16>,
    next: u32,
    exhausted_logged: bool,
}

impl StyleInterner {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            next: 1,
            exhausted_logged: false,
        }
    }

    /// Return the ID for a style, allocating one if it is new.
    pub fn id_for(&mut self, style: &Style) -> u16 {
        if style.is_default() {
            return 0;
        }
        if let Some(&id) = self.ids.get(style) {
            return id;
        }
        if self.next > u16::MAX as u32 {
            if !self.exhausted_logged {
                tracing::warn!("style ID space exhausted; further styles render as default");
                self.exhausted_logged = true;
            }
            return 0;
        }
        let id = self.next as u16;
        self.next += 1;
        self.ids.insert(*style, id);
        id
    }

    /// Number of distinct styles interned so far.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for StyleInterner {
    fn default() -> Self {
        Self::new()
    }
}
