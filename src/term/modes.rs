//! Chunk-boundary-safe scanner for the control sequences the emulator
//! library does not surface.
//!
//! The emulator handles screen and cell state, but the daemon needs a few
//! things it does not expose: DEC private mode transitions (synchronized
//! output, application cursor keys, alternate screen), the DECSCUSR cursor
//! shape, and replies to device status queries. PTY output arrives in
//! arbitrary-sized chunks that may split an escape sequence (e.g. `\x1b` in
//! one chunk, `[?2026h` in the next), so the scanner buffers partial
//! sequences across calls.

/// Cursor shape as selected by DECSCUSR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CursorShape {
    #[default]
    Block,
    Beam,
    Underline,
}

impl CursorShape {
    /// Wire encoding: 0 block, 1 beam, 2 underline.
    pub fn wire_code(self) -> u64 {
        match self {
            CursorShape::Block => 0,
            CursorShape::Beam => 1,
            CursorShape::Underline => 2,
        }
    }
}

/// Terminal modes the daemon tracks alongside the emulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeState {
    /// DEC private mode 47/1047/1049.
    pub alternate_screen: bool,
    /// DECCKM (mode 1): arrows and Home/End send SS3 sequences.
    pub application_cursor: bool,
    /// Mode 2026: the application is batching updates; suppress wakes.
    pub synchronized_output: bool,
    pub cursor_shape: CursorShape,
}

/// Something the scanner observed in the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    AlternateScreen(bool),
    ApplicationCursor(bool),
    SynchronizedOutput(bool),
    CursorShape(CursorShape),
    /// DSR 5: the application asked for terminal status.
    ReplyStatus,
    /// DSR 6: the application asked for the cursor position.
    ReplyCursorPosition,
    /// DA1: the application asked for device attributes.
    ReplyDeviceAttributes,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Not inside any escape sequence.
    Ground,
    /// Seen ESC (0x1b), waiting for '['.
    Esc,
    /// Inside CSI, collecting parameter and intermediate bytes.
    Csi,
}

/// Stateful scanner carrying partial sequences across chunk boundaries.
pub struct SeqScanner {
    state: ScanState,
    params: Vec<u8>,
    intermediates: Vec<u8>,
}

impl SeqScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Ground,
            params: Vec::new(),
            intermediates: Vec::new(),
        }
    }

    /// Scan a chunk of PTY output, returning the events observed in order.
    pub fn scan(&mut self, chunk: &[u8]) -> Vec<ScanEvent> {
        let mut events = Vec::new();

        for &byte in chunk {
            match self.state {
                ScanState::Ground => {
                    if byte == 0x1b {
                        self.state = ScanState::Esc;
                    }
                }

                ScanState::Esc => {
                    if byte == b'[' {
                        self.params.clear();
                        self.intermediates.clear();
                        self.state = ScanState::Csi;
                    } else if byte == 0x1b {
                        // Stay: a fresh ESC restarts the sequence.
                    } else {
                        self.state = ScanState::Ground;
                    }
                }

                ScanState::Csi => match byte {
                    0x30..=0x3f => {
                        // Parameter byte (digits, ';', '?', ...). Intermediates
                        // must come after params; a param byte after an
                        // intermediate is invalid, abandon the sequence.
                        if self.intermediates.is_empty() {
                            // Cap pathological param runs; real sequences are short.
                            if self.params.len() < 64 {
                                self.params.push(byte);
                            }
                        } else {
                            self.state = ScanState::Ground;
                        }
                    }
                    0x20..=0x2f => {
                        if self.intermediates.len() < 4 {
                            self.intermediates.push(byte);
                        }
                    }
                    0x40..=0x7e => {
                        self.dispatch(byte, &mut events);
                        self.state = ScanState::Ground;
                    }
                    0x1b => {
                        self.state = ScanState::Esc;
                    }
                    _ => {
                        // C0 controls inside CSI are tolerated by real
                        // terminals; anything else abandons the sequence.
                        if byte >= 0x20 {
                            self.state = ScanState::Ground;
                        }
                    }
                },
            }
        }

        events
    }

    /// Interpret a complete CSI sequence.
    fn dispatch(&self, final_byte: u8, events: &mut Vec<ScanEvent>) {
        let private = self.params.first() == Some(&b'?');
        let numbers = parse_params(if private {
            &self.params[1..]
        } else {
            &self.params[..]
        });

        match (private, final_byte) {
            (true, b'h') | (true, b'l') => {
                let set = final_byte == b'h';
                for n in numbers {
                    match n {
                        1 => events.push(ScanEvent::ApplicationCursor(set)),
                        47 | 1047 | 1049 => events.push(ScanEvent::AlternateScreen(set)),
                        2026 => events.push(ScanEvent::SynchronizedOutput(set)),
                        _ => {}
                    }
                }
            }
            (false, b'n') => match numbers.first().copied() {
                Some(5) => events.push(ScanEvent::ReplyStatus),
                Some(6) => events.push(ScanEvent::ReplyCursorPosition),
                _ => {}
            },
            (false, b'c') => {
                if numbers.is_empty() || numbers == [0] {
                    events.push(ScanEvent::ReplyDeviceAttributes);
                }
            }
            (false, b'q') if self.intermediates == [b' '] => {
                let shape = match numbers.first().copied().unwrap_or(0) {
                    0 | 1 | 2 => CursorShape::Block,
                    3 | 4 => CursorShape::Underline,
                    5 | 6 => CursorShape::Beam,
                    _ => return,
                };
                events.push(ScanEvent::CursorShape(shape));
            }
            _ => {}
        }
    }
}

impl Default for SeqScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_params(raw: &[u8]) -> Vec<u32> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(|&b| b == b';')
        .filter_map(|part| std::str::from_utf8(part).ok()?.parse::<u32>().ok())
        .collect()
}
