//! Redraw notification builder.
//!
//! Translates a screen [`Snapshot`] into one `redraw` notification for one
//! client: an ordered sequence of sub-events
//! (`resize`, `style`, `write`, `cursor_pos`, `cursor_shape`, `flush`).
//!
//! Per-client state feeds in through the seen-styles cache: a style ID is
//! defined at most once per client, the first time a redraw references it.
//! Rows compress by run-length encoding consecutive cells with identical
//! grapheme and style, and a cell's style ID is omitted when it equals the
//! last ID emitted in the same row (initial implied ID 0).

use rmpv::Value;
use std::collections::HashSet;

use crate::rpc::Message;
use crate::term::snapshot::{RowCapture, Snapshot};
use crate::term::style::Style;

/// Build the `redraw` notification for one client.
///
/// `full` selects the full-redraw shape (leading `resize` event, every
/// captured row); otherwise only dirty rows are emitted. `seen_styles` is
/// the client's cache; IDs defined by this notification are added to it.
pub fn build(
    snapshot: &Snapshot,
    session_id: u64,
    full: bool,
    seen_styles: &mut HashSet<u16>,
) -> Message {
    let pty = Value::from(session_id);
    let mut events: Vec<Value> = Vec::new();

    if full {
        events.push(event(
            "resize",
            vec![
                pty.clone(),
                Value::from(snapshot.rows as u64),
                Value::from(snapshot.cols as u64),
            ],
        ));
    }

    let rows: Vec<&RowCapture> = snapshot
        .captured
        .iter()
        .filter(|row| full || row.dirty)
        .collect();

    // Define styles before first use, in first-use order.
    let mut defined: Vec<u16> = Vec::new();
    for row in &rows {
        for cell in &row.cells {
            if cell.style != 0
                && !seen_styles.contains(&cell.style)
                && !defined.contains(&cell.style)
            {
                defined.push(cell.style);
            }
        }
    }
    for id in &defined {
        if let Some(style) = snapshot.styles.get(id) {
            events.push(event(
                "style",
                vec![Value::from(*id as u64), style_value(style)],
            ));
        }
    }

    for row in &rows {
        if let Some(cells) = encode_row(row) {
            events.push(event(
                "write",
                vec![
                    pty.clone(),
                    Value::from(row.index as u64),
                    Value::from(0u64),
                    Value::Array(cells),
                ],
            ));
        }
    }

    events.push(event(
        "cursor_pos",
        vec![
            pty.clone(),
            Value::from(snapshot.cursor_row as u64),
            Value::from(snapshot.cursor_col as u64),
        ],
    ));
    events.push(event(
        "cursor_shape",
        vec![pty, Value::from(snapshot.cursor_shape.wire_code())],
    ));
    events.push(event("flush", vec![]));

    seen_styles.extend(defined);

    Message::Notification {
        method: "redraw".to_string(),
        params: Value::Array(events),
    }
}

fn event(name: &str, args: Vec<Value>) -> Value {
    Value::Array(vec![Value::from(name), Value::Array(args)])
}

/// Run-length encode one row. Returns `None` for a row with no non-empty
/// cell (nothing to write).
fn encode_row(row: &RowCapture) -> Option<Vec<Value>> {
    let mut out: Vec<Value> = Vec::new();
    let mut last_id: u16 = 0;
    let mut run: Option<(&str, u16, u64)> = None;

    let mut flush = |run: &mut Option<(&str, u16, u64)>, last_id: &mut u16, out: &mut Vec<Value>| {
        if let Some((text, id, count)) = run.take() {
            let mut cell = vec![Value::from(text)];
            if count > 1 {
                cell.push(Value::from(id as u64));
                cell.push(Value::from(count));
            } else if id != *last_id {
                cell.push(Value::from(id as u64));
            }
            *last_id = id;
            out.push(Value::Array(cell));
        }
    };

    for cell in &row.cells {
        // Spacer tails carry no text; the preceding wide grapheme accounts
        // for the column.
        if cell.text.is_empty() {
            continue;
        }
        match &mut run {
            Some((text, id, count)) if *text == cell.text && *id == cell.style => {
                *count += 1;
            }
            _ => {
                flush(&mut run, &mut last_id, &mut out);
                run = Some((&cell.text, cell.style, 1));
            }
        }
    }
    flush(&mut run, &mut last_id, &mut out);

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Style attributes as the wire map. Only present fields are sent; RGB
/// packs as 0x00RRGGBB, palette colors use the `_idx` keys.
fn style_value(style: &Style) -> Value {
    let mut map: Vec<(Value, Value)> = Vec::new();

    if let Some(fg) = style.fg {
        if let Some(rgb) = fg.packed_rgb() {
            map.push((Value::from("fg"), Value::from(rgb)));
        } else if let Some(idx) = fg.palette_index() {
            map.push((Value::from("fg_idx"), Value::from(idx)));
        }
    }
    if let Some(bg) = style.bg {
        if let Some(rgb) = bg.packed_rgb() {
            map.push((Value::from("bg"), Value::from(rgb)));
        } else if let Some(idx) = bg.palette_index() {
            map.push((Value::from("bg_idx"), Value::from(idx)));
        }
    }

    for (name, set) in [
        ("bold", style.bold),
        ("dim", style.dim),
        ("italic", style.italic),
        ("underline", style.underline),
        ("reverse", style.reverse),
        ("blink", style.blink),
    ] {
        if set {
            map.push((Value::from(name), Value::Boolean(true)));
        }
    }

    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::modes::CursorShape;
    use crate::term::snapshot::Cell;
    use crate::term::style::Color;
    use std::collections::HashMap;

    fn cell(text: &str, style: u16) -> Cell {
        Cell {
            text: text.to_string(),
            style,
            wide: false,
        }
    }

    fn snapshot_with_rows(rows: Vec<RowCapture>, styles: HashMap<u16, Style>) -> Snapshot {
        Snapshot {
            rows: 24,
            cols: 80,
            cursor_row: 3,
            cursor_col: 7,
            cursor_shape: CursorShape::Beam,
            promoted: false,
            captured: rows,
            styles,
        }
    }

    fn events_of(msg: &Message) -> Vec<(String, Vec<Value>)> {
        let Message::Notification { method, params } = msg else {
            panic!("expected notification, got {msg:?}");
        };
        assert_eq!(method, "redraw");
        params
            .as_array()
            .unwrap()
            .iter()
            .map(|ev| {
                let parts = ev.as_array().unwrap();
                (
                    parts[0].as_str().unwrap().to_string(),
                    parts[1].as_array().unwrap().clone(),
                )
            })
            .collect()
    }

    #[test]
    fn full_redraw_shape() {
        let row = RowCapture {
            index: 0,
            dirty: true,
            cells: vec![cell("h", 0), cell("i", 0)],
        };
        let snapshot = snapshot_with_rows(vec![row], HashMap::new());
        let mut seen = HashSet::new();
        let msg = build(&snapshot, 0, true, &mut seen);

        let events = events_of(&msg);
        assert_eq!(events.first().unwrap().0, "resize");
        assert_eq!(
            events.first().unwrap().1,
            vec![Value::from(0u64), Value::from(24u64), Value::from(80u64)]
        );
        assert_eq!(events.last().unwrap().0, "flush");
        assert!(events.iter().any(|(n, _)| n == "write"));
        assert!(events.iter().any(|(n, _)| n == "cursor_pos"));
        assert!(events.iter().any(|(n, _)| n == "cursor_shape"));
    }

    #[test]
    fn incremental_redraw_has_no_resize_and_skips_clean_rows() {
        let rows = vec![
            RowCapture {
                index: 0,
                dirty: false,
                cells: vec![cell("a", 0)],
            },
            RowCapture {
                index: 5,
                dirty: true,
                cells: vec![cell("b", 0)],
            },
        ];
        let snapshot = snapshot_with_rows(rows, HashMap::new());
        let mut seen = HashSet::new();
        let msg = build(&snapshot, 2, false, &mut seen);

        let events = events_of(&msg);
        assert!(events.iter().all(|(n, _)| n != "resize"));
        let writes: Vec<_> = events.iter().filter(|(n, _)| n == "write").collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1[1], Value::from(5u64), "only the dirty row");
    }

    #[test]
    fn cursor_events_on_every_redraw() {
        let snapshot = snapshot_with_rows(vec![], HashMap::new());
        let mut seen = HashSet::new();
        let msg = build(&snapshot, 1, false, &mut seen);
        let events = events_of(&msg);

        let cursor_pos = events.iter().find(|(n, _)| n == "cursor_pos").unwrap();
        assert_eq!(
            cursor_pos.1,
            vec![Value::from(1u64), Value::from(3u64), Value::from(7u64)]
        );
        let cursor_shape = events.iter().find(|(n, _)| n == "cursor_shape").unwrap();
        assert_eq!(cursor_shape.1[1], Value::from(1u64), "beam is 1");
        assert_eq!(events.last().unwrap().0, "flush");
    }

    #[test]
    fn run_length_encoding_merges_identical_cells() {
        let row = RowCapture {
            index: 0,
            dirty: true,
            cells: vec![cell("a", 0), cell("a", 0), cell("a", 0), cell("b", 0)],
        };
        let snapshot = snapshot_with_rows(vec![row], HashMap::new());
        let mut seen = HashSet::new();
        let events = events_of(&build(&snapshot, 0, false, &mut seen));

        let write = events.iter().find(|(n, _)| n == "write").unwrap();
        let cells = write.1[3].as_array().unwrap();
        assert_eq!(cells.len(), 2);
        // Three 'a's: repeat needs the positional style field.
        assert_eq!(
            cells[0].as_array().unwrap().as_slice(),
            &[Value::from("a"), Value::from(0u64), Value::from(3u64)]
        );
        // One 'b' with the same style as the last emitted: grapheme only.
        assert_eq!(cells[1].as_array().unwrap().as_slice(), &[Value::from("b")]);
    }

    #[test]
    fn style_id_omitted_when_unchanged_within_row() {
        let mut styles = HashMap::new();
        styles.insert(
            1,
            Style {
                bold: true,
                ..Style::default()
            },
        );
        let row = RowCapture {
            index: 0,
            dirty: true,
            cells: vec![cell("x", 1), cell("y", 1), cell("z", 0)],
        };
        let snapshot = snapshot_with_rows(vec![row], styles);
        let mut seen = HashSet::new();
        let events = events_of(&build(&snapshot, 0, false, &mut seen));

        let write = events.iter().find(|(n, _)| n == "write").unwrap();
        let cells = write.1[3].as_array().unwrap();
        // 'x' switches to style 1; 'y' inherits it; 'z' switches back to 0.
        assert_eq!(
            cells[0].as_array().unwrap().as_slice(),
            &[Value::from("x"), Value::from(1u64)]
        );
        assert_eq!(cells[1].as_array().unwrap().as_slice(), &[Value::from("y")]);
        assert_eq!(
            cells[2].as_array().unwrap().as_slice(),
            &[Value::from("z"), Value::from(0u64)]
        );
    }

    #[test]
    fn styles_defined_once_per_client() {
        let mut styles = HashMap::new();
        styles.insert(
            4,
            Style {
                fg: Some(Color::Indexed(2)),
                ..Style::default()
            },
        );
        let row = || RowCapture {
            index: 0,
            dirty: true,
            cells: vec![cell("g", 4)],
        };

        let mut seen = HashSet::new();
        let first = snapshot_with_rows(vec![row()], styles.clone());
        let events = events_of(&build(&first, 0, true, &mut seen));
        let style_events: Vec<_> = events.iter().filter(|(n, _)| n == "style").collect();
        assert_eq!(style_events.len(), 1);
        assert_eq!(style_events[0].1[0], Value::from(4u64));
        assert!(seen.contains(&4));

        // Second redraw referencing the same ID: no style event.
        let second = snapshot_with_rows(vec![row()], styles);
        let events = events_of(&build(&second, 0, false, &mut seen));
        assert!(events.iter().all(|(n, _)| n != "style"));
    }

    #[test]
    fn style_events_precede_writes() {
        let mut styles = HashMap::new();
        styles.insert(
            2,
            Style {
                italic: true,
                ..Style::default()
            },
        );
        let row = RowCapture {
            index: 1,
            dirty: true,
            cells: vec![cell("s", 2)],
        };
        let snapshot = snapshot_with_rows(vec![row], styles);
        let mut seen = HashSet::new();
        let events = events_of(&build(&snapshot, 0, true, &mut seen));

        let style_pos = events.iter().position(|(n, _)| n == "style").unwrap();
        let write_pos = events.iter().position(|(n, _)| n == "write").unwrap();
        assert!(style_pos < write_pos);
    }

    #[test]
    fn spacer_tails_are_skipped() {
        let row = RowCapture {
            index: 0,
            dirty: true,
            cells: vec![
                Cell {
                    text: "好".to_string(),
                    style: 0,
                    wide: true,
                },
                cell("", 0),
                cell("!", 0),
            ],
        };
        let snapshot = snapshot_with_rows(vec![row], HashMap::new());
        let mut seen = HashSet::new();
        let events = events_of(&build(&snapshot, 0, false, &mut seen));

        let write = events.iter().find(|(n, _)| n == "write").unwrap();
        let cells = write.1[3].as_array().unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].as_array().unwrap()[0], Value::from("好"));
        assert_eq!(cells[1].as_array().unwrap()[0], Value::from("!"));
    }

    #[test]
    fn style_wire_map_fields() {
        let style = Style {
            fg: Some(Color::Rgb {
                r: 0xff,
                g: 0x80,
                b: 0x00,
            }),
            bg: Some(Color::Indexed(17)),
            bold: true,
            ..Style::default()
        };
        let value = style_value(&style);
        let map = value.as_map().unwrap();
        let get = |key: &str| {
            map.iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("fg"), Some(Value::from(0xff8000u64)));
        assert_eq!(get("bg_idx"), Some(Value::from(17u64)));
        assert_eq!(get("bold"), Some(Value::Boolean(true)));
        assert_eq!(get("italic"), None);
        assert_eq!(get("fg_idx"), None);
    }

    #[test]
    fn all_referenced_styles_are_defined_or_seen() {
        // Invariant: any style ID in a write was default, previously seen,
        // or defined earlier in the same notification.
        let mut styles = HashMap::new();
        for id in [1u16, 2, 3] {
            styles.insert(
                id,
                Style {
                    fg: Some(Color::Indexed(id as u8)),
                    ..Style::default()
                },
            );
        }
        let row = RowCapture {
            index: 0,
            dirty: true,
            cells: vec![cell("a", 1), cell("b", 2), cell("c", 3), cell("d", 1)],
        };
        let snapshot = snapshot_with_rows(vec![row], styles);
        let mut seen = HashSet::from([2u16]);
        let events = events_of(&build(&snapshot, 0, true, &mut seen));

        let mut known: HashSet<u16> = HashSet::from([0, 2]);
        for (name, args) in &events {
            match name.as_str() {
                "style" => {
                    known.insert(args[0].as_u64().unwrap() as u16);
                }
                "write" => {
                    for cell in args[3].as_array().unwrap() {
                        let parts = cell.as_array().unwrap();
                        if parts.len() >= 2 {
                            let id = parts[1].as_u64().unwrap() as u16;
                            assert!(known.contains(&id), "style {id} used before defined");
                        }
                    }
                }
                _ => {}
            }
        }
        // Style 2 was already seen by the client: not redefined.
        assert_eq!(
            events.iter().filter(|(n, _)| n == "style").count(),
            2,
            "only styles 1 and 3 need definitions"
        );
    }
}
