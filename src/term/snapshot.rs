//! Screen snapshot value types.
//!
//! A snapshot is a pure value: every grapheme is copied into owned storage
//! and every referenced style is resolved into the side table, so the
//! session mutex can be released before redraw notifications are built.

use std::collections::HashMap;

use super::modes::CursorShape;
use super::style::Style;

/// A single captured cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Owned UTF-8 grapheme text. Empty for the spacer tail of a wide glyph.
    pub text: String,
    /// Style ID; 0 is the default style.
    pub style: u16,
    /// The glyph occupies two columns.
    pub wide: bool,
}

/// One captured screen row.
#[derive(Debug, Clone)]
pub struct RowCapture {
    /// Absolute row index on screen.
    pub index: usize,
    /// True if the emulator flagged this row since the previous capture.
    pub dirty: bool,
    pub cells: Vec<Cell>,
}

/// An allocator-independent copy of the screen taken under the session lock.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub rows: usize,
    pub cols: usize,
    pub cursor_row: usize,
    pub cursor_col: usize,
    pub cursor_shape: CursorShape,
    /// True when a screen-level dirty condition (resize, mode change)
    /// promoted this capture: every client must take the full redraw path.
    pub promoted: bool,
    /// Captured rows in screen order. A full capture holds every row; an
    /// incremental capture holds only dirty rows.
    pub captured: Vec<RowCapture>,
    /// Resolved attributes for every non-zero style ID referenced above.
    pub styles: HashMap<u16, Style>,
}
