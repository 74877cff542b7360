//! Bundled emulator
//!
//! `VtEngine` ties the parser and the terminal state together behind the
//! [`Engine`] trait: it decodes UTF-8 (keeping split sequences between
//! feeds), collects replies for the process, reports cursor motion once per
//! feed and flushes damage before returning.

use super::input::{encode_char, encode_key, MouseState};
use super::parser::VtParser;
use super::state::TerminalState;
use super::{CursorInfo, Engine, EngineEvent, Key, Modifiers, MouseTracking, Pos, ScreenCell};
use crate::color::TermColor;

pub struct VtEngine {
    state: TerminalState,
    parser: VtParser,
    /// Incomplete UTF-8 sequence from the previous feed
    pending: Vec<u8>,
    output: Vec<u8>,
    mouse: MouseState,
    /// Cursor position and visibility last reported
    reported_cursor: (Pos, bool),
}

impl VtEngine {
    pub fn new(rows: u16, cols: u16, default_fg: TermColor, default_bg: TermColor) -> Self {
        let state = TerminalState::new(cols, rows, default_fg, default_bg);
        let reported_cursor = (state.cursor_pos(), state.cursor_visible);
        Self {
            state,
            parser: VtParser::new(),
            pending: Vec::new(),
            output: Vec::new(),
            mouse: MouseState::default(),
            reported_cursor,
        }
    }

    fn feed_char(&mut self, ch: char) {
        if let Some(response) = self.parser.feed(ch, &mut self.state) {
            self.output.extend_from_slice(&response.to_bytes());
        }
    }

    /// Length of the UTF-8 sequence introduced by `b`, 0 if `b` cannot start one
    fn sequence_len(b: u8) -> usize {
        if b & 0xE0 == 0xC0 {
            2
        } else if b & 0xF0 == 0xE0 {
            3
        } else if b & 0xF8 == 0xF0 {
            4
        } else {
            0
        }
    }

    fn decode_and_feed(&mut self, bytes: &[u8]) {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            if b < 0x80 {
                self.feed_char(b as char);
                i += 1;
                continue;
            }

            let seq_len = Self::sequence_len(b);
            if seq_len == 0 {
                // Stray continuation byte
                i += 1;
                continue;
            }
            if i + seq_len > data.len() {
                self.pending = data[i..].to_vec();
                break;
            }
            match std::str::from_utf8(&data[i..i + seq_len]) {
                Ok(s) => {
                    for ch in s.chars() {
                        self.feed_char(ch);
                    }
                    i += seq_len;
                }
                Err(_) => i += 1,
            }
        }
    }

    fn report_cursor(&mut self) {
        let now = (self.state.cursor_pos(), self.state.cursor_visible);
        if now != self.reported_cursor {
            let old = self.reported_cursor.0;
            self.reported_cursor = now;
            self.state.push_event(EngineEvent::MoveCursor {
                pos: now.0,
                old,
                visible: now.1,
            });
        }
    }
}

impl Engine for VtEngine {
    fn feed(&mut self, bytes: &[u8]) {
        self.decode_and_feed(bytes);
        self.report_cursor();
        self.state.flush_damage();
    }

    fn take_events(&mut self) -> Vec<EngineEvent> {
        self.state.take_events()
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    fn size(&self) -> (u16, u16) {
        (self.state.rows, self.state.cols)
    }

    fn set_size(&mut self, rows: u16, cols: u16) {
        if (rows, cols) == self.size() || rows == 0 || cols == 0 {
            return;
        }
        self.state.resize(cols, rows);
        self.report_cursor();
        self.state.flush_damage();
    }

    fn cell(&self, row: u16, col: u16) -> Option<ScreenCell> {
        self.state.cell(row, col)
    }

    fn screen_text(&self, row: u16) -> Option<String> {
        self.state.row_text(row)
    }

    fn cursor(&self) -> CursorInfo {
        CursorInfo {
            pos: self.state.cursor_pos(),
            visible: self.state.cursor_visible,
            blink: self.state.cursor_blink,
            shape: self.state.cursor_shape,
        }
    }

    fn default_colors(&self) -> (TermColor, TermColor) {
        (self.state.default_fg, self.state.default_bg)
    }

    fn set_default_colors(&mut self, fg: TermColor, bg: TermColor) {
        self.state.default_fg = fg;
        self.state.default_bg = bg;
        self.state.mark_all_dirty();
    }

    fn keyboard_key(&mut self, key: Key, mods: Modifiers) {
        let bytes = encode_key(key, mods, &self.state.modes);
        self.output.extend_from_slice(&bytes);
    }

    fn keyboard_unichar(&mut self, ch: char, mods: Modifiers) {
        self.output.extend_from_slice(&encode_char(ch, mods));
    }

    fn mouse_move(&mut self, row: u16, col: u16, mods: Modifiers) {
        let bytes = self.mouse.moved(row, col, mods, &self.state.modes);
        self.output.extend_from_slice(&bytes);
    }

    fn mouse_button(&mut self, button: u8, pressed: bool, mods: Modifiers) {
        let bytes = self.mouse.button(button, pressed, mods, &self.state.modes);
        self.output.extend_from_slice(&bytes);
    }

    fn mouse_tracking(&self) -> MouseTracking {
        self.state.modes.mouse_tracking
    }

    fn start_paste(&mut self) {
        if self.state.modes.bracketed_paste {
            self.output.extend_from_slice(b"\x1b[200~");
        }
    }

    fn end_paste(&mut self) {
        if self.state.modes.bracketed_paste {
            self.output.extend_from_slice(b"\x1b[201~");
        }
    }

    fn using_alt_screen(&self) -> bool {
        self.state.using_alternate
    }

    fn set_cursor_blink(&mut self, blink: bool) {
        self.state.cursor_blink = blink;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::INDEX_DEFAULT;
    use crate::core::term::{Property, Rect};

    fn engine(rows: u16, cols: u16) -> VtEngine {
        VtEngine::new(
            rows,
            cols,
            TermColor::new(255, 255, 255, INDEX_DEFAULT),
            TermColor::new(0, 0, 0, INDEX_DEFAULT),
        )
    }

    #[test]
    fn test_split_utf8_sequence() {
        let mut e = engine(2, 10);
        let bytes = "é".as_bytes();
        e.feed(&bytes[..1]);
        assert_eq!(e.screen_text(0).as_deref(), Some(""));
        e.feed(&bytes[1..]);
        assert_eq!(e.screen_text(0).as_deref(), Some("é"));
    }

    #[test]
    fn test_feed_reports_cursor_and_damage() {
        let mut e = engine(3, 10);
        e.feed(b"hi");
        let events = e.take_events();
        assert!(events.contains(&EngineEvent::MoveCursor {
            pos: Pos::new(0, 2),
            old: Pos::new(0, 0),
            visible: true,
        }));
        assert!(events.contains(&EngineEvent::Damage(Rect::rows(0, 1, 10))));
        assert!(e.take_events().is_empty());
    }

    #[test]
    fn test_replies_go_to_output() {
        let mut e = engine(3, 10);
        e.feed(b"\x1b[6n");
        assert_eq!(e.take_output(), b"\x1b[1;1R".to_vec());
        assert!(e.take_output().is_empty());
    }

    #[test]
    fn test_bracketed_paste() {
        let mut e = engine(3, 10);
        e.start_paste();
        assert!(e.take_output().is_empty());

        e.feed(b"\x1b[?2004h");
        e.start_paste();
        e.keyboard_unichar('x', Modifiers::empty());
        e.end_paste();
        assert_eq!(e.take_output(), b"\x1b[200~x\x1b[201~".to_vec());
    }

    #[test]
    fn test_set_size_emits_resize() {
        let mut e = engine(3, 10);
        e.set_size(5, 20);
        assert_eq!(e.size(), (5, 20));
        assert!(e
            .take_events()
            .contains(&EngineEvent::Resize { rows: 5, cols: 20 }));
        e.set_size(5, 20);
        assert!(e.take_events().is_empty());
    }

    #[test]
    fn test_properties() {
        let mut e = engine(3, 10);
        e.feed(b"\x1b[?25l\x1b[5 q");
        let events = e.take_events();
        assert!(events.contains(&EngineEvent::SetProperty(Property::CursorVisible(false))));
        assert!(events.contains(&EngineEvent::SetProperty(Property::CursorBlink(true))));
        assert!(!e.cursor().visible);
    }
}
