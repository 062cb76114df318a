//! Emulator bridge: terminal emulation plus the session-side bookkeeping
//! the emulator library does not provide.
//!
//! [`Term`] wraps the `avt` virtual terminal with a style interner (stable
//! 16-bit style IDs), a per-row dirty set, a screen-level dirty flag, the
//! mode scanner, and device-query auto-replies. One `Term` lives behind each
//! session's mutex; the PTY reader thread is its only feeder and the frame
//! scheduler its only snapshotter.

pub mod modes;
pub mod snapshot;
pub mod style;

use std::collections::HashSet;

use modes::{ModeState, ScanEvent, SeqScanner};
use snapshot::{Cell, RowCapture, Snapshot};
use style::{Style, StyleInterner};

pub struct Term {
    vt: avt::Vt,
    scanner: SeqScanner,
    modes: ModeState,
    styles: StyleInterner,
    dirty_rows: HashSet<usize>,
    screen_dirty: bool,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last feed.
    utf8_tail: Vec<u8>,
}

impl Term {
    pub fn new(rows: usize, cols: usize) -> Self {
        let vt = avt::Vt::builder()
            .size(cols, rows)
            .scrollback_limit(0)
            .build();
        Self {
            vt,
            scanner: SeqScanner::new(),
            modes: ModeState::default(),
            styles: StyleInterner::new(),
            dirty_rows: HashSet::new(),
            screen_dirty: false,
            utf8_tail: Vec::new(),
        }
    }

    /// Feed PTY output into the emulator.
    ///
    /// Updates screen state and dirty tracking, applies mode transitions,
    /// and emits device-query replies through `reply` (the caller forwards
    /// them back to the PTY master).
    pub fn feed(&mut self, bytes: &[u8], mut reply: impl FnMut(&[u8])) {
        let events = self.scanner.scan(bytes);

        // Reassemble UTF-8 split across read chunks before feeding the
        // emulator's parser.
        let mut data = std::mem::take(&mut self.utf8_tail);
        data.extend_from_slice(bytes);
        let valid_len = match std::str::from_utf8(&data) {
            Ok(_) => data.len(),
            // A truncated sequence at the end of the chunk: carry it over.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Invalid bytes mid-chunk: feed lossily, the emulator copes.
            Err(_) => data.len(),
        };
        if valid_len < data.len() {
            self.utf8_tail = data.split_off(valid_len);
        }
        let text = String::from_utf8_lossy(&data);

        let changes = self.vt.feed_str(&text);
        let changed_lines: Vec<usize> = changes.lines.clone();
        drop(changes);
        self.dirty_rows.extend(changed_lines);

        for event in events {
            match event {
                ScanEvent::AlternateScreen(on) => {
                    if self.modes.alternate_screen != on {
                        self.modes.alternate_screen = on;
                        self.screen_dirty = true;
                    }
                }
                ScanEvent::ApplicationCursor(on) => self.modes.application_cursor = on,
                ScanEvent::SynchronizedOutput(on) => self.modes.synchronized_output = on,
                ScanEvent::CursorShape(shape) => self.modes.cursor_shape = shape,
                ScanEvent::ReplyStatus => reply(b"\x1b[0n"),
                ScanEvent::ReplyCursorPosition => {
                    let cursor = self.vt.cursor();
                    let report = format!("\x1b[{};{}R", cursor.row + 1, cursor.col + 1);
                    reply(report.as_bytes());
                }
                ScanEvent::ReplyDeviceAttributes => reply(b"\x1b[?6c"),
            }
        }
    }

    /// Resize the emulated screen. A resize is a screen-level dirty
    /// condition: the next capture is promoted to full.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        let _changes = self.vt.resize(cols, rows);
        self.screen_dirty = true;
    }

    pub fn synchronized_output(&self) -> bool {
        self.modes.synchronized_output
    }

    pub fn application_cursor(&self) -> bool {
        self.modes.application_cursor
    }

    /// Copy screen state into an owned [`Snapshot`] and clear dirty flags.
    ///
    /// A `full` request captures every row; otherwise only rows the emulator
    /// flagged since the previous capture. A pending screen-level dirty
    /// condition promotes any capture to full.
    pub fn snapshot(&mut self, full: bool) -> Snapshot {
        let promoted = self.screen_dirty;
        let capture_all = full || promoted;

        let cursor = self.vt.cursor();
        let (cols, rows) = self.vt.size();

        let mut captured = Vec::new();
        let mut styles = std::collections::HashMap::new();

        for (index, line) in self.vt.view().iter().enumerate() {
            let dirty = promoted || self.dirty_rows.contains(&index);
            if !capture_all && !dirty {
                continue;
            }

            let mut cells = Vec::with_capacity(cols);
            for cell in line.cells() {
                let ch = cell.char();
                // Spacer tail of a wide glyph: empty text, default style,
                // so downstream diffing skips it.
                if ch == '\0' || cell.width() == 0 {
                    cells.push(Cell {
                        text: String::new(),
                        style: 0,
                        wide: false,
                    });
                    continue;
                }
                let style = Style::from_pen(cell.pen());
                let id = self.styles.id_for(&style);
                if id != 0 {
                    styles.entry(id).or_insert(style);
                }
                cells.push(Cell {
                    text: ch.to_string(),
                    style: id,
                    wide: cell.width() > 1,
                });
            }

            captured.push(RowCapture {
                index,
                dirty,
                cells,
            });
        }

        self.dirty_rows.clear();
        self.screen_dirty = false;

        Snapshot {
            rows,
            cols,
            cursor_row: cursor.row,
            cursor_col: cursor.col,
            cursor_shape: self.modes.cursor_shape,
            promoted,
            captured,
            styles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::modes::CursorShape;
    use super::style::Color;
    use super::*;

    fn feed(term: &mut Term, text: &str) -> Vec<u8> {
        let mut replies = Vec::new();
        term.feed(text.as_bytes(), |r| replies.extend_from_slice(r));
        replies
    }

    fn row_text(snapshot: &Snapshot, index: usize) -> String {
        snapshot
            .captured
            .iter()
            .find(|r| r.index == index)
            .map(|r| r.cells.iter().map(|c| c.text.as_str()).collect::<String>())
            .unwrap_or_default()
    }

    #[test]
    fn feed_updates_screen_and_dirty_rows() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "hello");

        let snapshot = term.snapshot(false);
        assert!(!snapshot.promoted);
        assert_eq!(snapshot.captured.len(), 1);
        assert!(row_text(&snapshot, 0).starts_with("hello"));
    }

    #[test]
    fn capture_clears_dirty_state() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "hello");
        let _ = term.snapshot(false);

        let second = term.snapshot(false);
        assert!(second.captured.is_empty(), "no new output, nothing dirty");
    }

    #[test]
    fn full_capture_takes_every_row() {
        let mut term = Term::new(4, 20);
        feed(&mut term, "one\r\ntwo");
        let snapshot = term.snapshot(true);
        assert_eq!(snapshot.captured.len(), 4);
        assert_eq!(snapshot.rows, 4);
        assert_eq!(snapshot.cols, 20);
    }

    #[test]
    fn resize_promotes_next_capture() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "x");
        let _ = term.snapshot(false);

        term.resize(30, 100);
        let snapshot = term.snapshot(false);
        assert!(snapshot.promoted);
        assert_eq!(snapshot.captured.len(), 30);
        assert_eq!(snapshot.cols, 100);
    }

    #[test]
    fn alternate_screen_transition_promotes() {
        let mut term = Term::new(24, 80);
        let _ = term.snapshot(true);

        feed(&mut term, "\x1b[?1049h");
        let snapshot = term.snapshot(false);
        assert!(snapshot.promoted);
    }

    #[test]
    fn styled_cells_get_interned_ids() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "\x1b[31mred");

        let snapshot = term.snapshot(false);
        let row = &snapshot.captured[0];
        let styled: Vec<_> = row.cells.iter().filter(|c| c.style != 0).collect();
        assert_eq!(styled.len(), 3, "three red cells");
        let id = styled[0].style;
        assert!(styled.iter().all(|c| c.style == id));
        let style = snapshot.styles.get(&id).expect("style resolved in side table");
        assert_eq!(style.fg, Some(Color::Indexed(1)));
    }

    #[test]
    fn style_ids_are_stable_across_captures() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "\x1b[31ma");
        let first = term.snapshot(false);
        let id_first = first.captured[0].cells[0].style;

        feed(&mut term, "\x1b[31mb");
        let second = term.snapshot(false);
        let id_second = second.captured[0].cells[1].style;
        assert_eq!(id_first, id_second);
    }

    #[test]
    fn synchronized_output_mode_tracked() {
        let mut term = Term::new(24, 80);
        assert!(!term.synchronized_output());
        feed(&mut term, "\x1b[?2026h");
        assert!(term.synchronized_output());
        feed(&mut term, "\x1b[?2026l");
        assert!(!term.synchronized_output());
    }

    #[test]
    fn application_cursor_mode_tracked() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "\x1b[?1h");
        assert!(term.application_cursor());
    }

    #[test]
    fn cursor_position_report_reply() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "hi");
        let replies = feed(&mut term, "\x1b[6n");
        assert_eq!(replies, b"\x1b[1;3R", "cursor after 'hi' is row 1 col 3");
    }

    #[test]
    fn status_and_device_attribute_replies() {
        let mut term = Term::new(24, 80);
        assert_eq!(feed(&mut term, "\x1b[5n"), b"\x1b[0n");
        assert_eq!(feed(&mut term, "\x1b[c"), b"\x1b[?6c");
    }

    #[test]
    fn split_utf8_sequence_reassembled() {
        let mut term = Term::new(24, 80);
        let bytes = "é".as_bytes(); // two bytes
        term.feed(&bytes[..1], |_| {});
        term.feed(&bytes[1..], |_| {});

        let snapshot = term.snapshot(false);
        assert!(row_text(&snapshot, 0).starts_with('é'));
    }

    #[test]
    fn wide_glyph_has_wide_flag_and_spacer() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "好");

        let snapshot = term.snapshot(false);
        let row = &snapshot.captured[0];
        assert_eq!(row.cells[0].text, "好");
        assert!(row.cells[0].wide);
        assert_eq!(row.cells[1].text, "");
        assert_eq!(row.cells[1].style, 0);
    }

    #[test]
    fn cursor_shape_reaches_snapshot() {
        let mut term = Term::new(24, 80);
        feed(&mut term, "\x1b[5 q");
        let snapshot = term.snapshot(false);
        assert_eq!(snapshot.cursor_shape, CursorShape::Beam);
    }
}
