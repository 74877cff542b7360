//! VT sequence parser
//!
//! Parses ANSI/VT escape sequences and updates terminal state. Input is
//! already UTF-8 decoded, so the parser works on `char`s and multi-byte
//! text inside OSC strings survives intact.

use super::state::{Color, TerminalState};
use crate::color::StyleFlags;

/// Reply the application asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(u16, u16),
    /// Operating status: ESC [ 0 n
    StatusOk,
    DeviceAttributes,
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::StatusOk => b"\x1b[0n".to_vec(),
            // VT220
            Response::DeviceAttributes => b"\x1b[?62;c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

/// Parser state machine
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    osc_string: String,
}

#[derive(Clone, Copy, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    /// ESC received within OSC, waiting for backslash
    EscapeInOsc,
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc_string: String::new(),
        }
    }

    /// Feed a single character to the parser
    pub fn feed(&mut self, ch: char, state: &mut TerminalState) -> Option<Response> {
        let in_osc = matches!(self.state, ParserState::OscString | ParserState::EscapeInOsc);
        if (ch as u32) < 0x20 && !in_osc {
            match ch {
                '\x1b' => self.enter_escape(),
                '\x08' => state.backspace(),
                '\x09' => state.horizontal_tab(),
                '\x0a' | '\x0b' | '\x0c' => state.linefeed(),
                '\x0d' => state.carriage_return(),
                // BEL and the rest are ignored
                _ => {}
            }
            return None;
        }

        match self.state {
            ParserState::Ground => {
                if ch != '\x7f' {
                    state.put_char(ch);
                }
                None
            }
            ParserState::Escape => self.escape(ch, state),
            ParserState::EscapeIntermediate => self.escape_intermediate(ch),
            ParserState::CsiEntry => self.csi_entry(ch, state),
            ParserState::CsiParam => self.csi_param(ch, state),
            ParserState::CsiIntermediate => self.csi_intermediate(ch, state),
            ParserState::OscString => self.osc_string_state(ch, state),
            ParserState::EscapeInOsc => self.escape_in_osc(ch, state),
        }
    }

    fn escape_in_osc(&mut self, ch: char, state: &mut TerminalState) -> Option<Response> {
        self.execute_osc(state);
        if ch == '\\' {
            self.state = ParserState::Ground;
            None
        } else {
            // Not ST: the ESC starts a new sequence
            self.enter_escape();
            self.escape(ch, state)
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn escape(&mut self, ch: char, state: &mut TerminalState) -> Option<Response> {
        self.state = ParserState::Ground;
        match ch {
            '[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            ']' => {
                self.state = ParserState::OscString;
                self.osc_string.clear();
            }
            // DECSC / DECRC
            '7' => state.save_cursor(),
            '8' => state.restore_cursor(),
            // IND
            'D' => state.index(),
            // NEL
            'E' => {
                state.carriage_return();
                state.index();
            }
            // RI
            'M' => state.reverse_index(),
            // DECKPAM / DECKPNM
            '=' => state.modes.application_keypad = true,
            '>' => state.modes.application_keypad = false,
            // RIS
            'c' => state.reset(),
            '\x20'..='\x2f' => {
                self.intermediates.push(ch as u8);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => {}
        }
        None
    }

    fn escape_intermediate(&mut self, ch: char) -> Option<Response> {
        match ch {
            '\x20'..='\x2f' => self.intermediates.push(ch as u8),
            // Charset selections and the like are ignored
            _ => self.state = ParserState::Ground,
        }
        None
    }

    fn csi_entry(&mut self, ch: char, state: &mut TerminalState) -> Option<Response> {
        match ch {
            '0'..='9' => {
                self.current_param = Some(ch as u16 - '0' as u16);
                self.state = ParserState::CsiParam;
            }
            ';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            '?' | '>' | '!' | '=' => self.intermediates.push(ch as u8),
            '\x20'..='\x2f' => {
                self.intermediates.push(ch as u8);
                self.state = ParserState::CsiIntermediate;
            }
            '\x40'..='\x7e' => return self.execute_csi(ch as u8, state),
            _ => self.state = ParserState::Ground,
        }
        None
    }

    fn csi_param(&mut self, ch: char, state: &mut TerminalState) -> Option<Response> {
        match ch {
            '0'..='9' => {
                let digit = ch as u16 - '0' as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            // ':' separates SGR subparameters; treated like ';'
            ';' | ':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            '\x20'..='\x2f' => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(ch as u8);
                self.state = ParserState::CsiIntermediate;
            }
            '\x40'..='\x7e' => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                return self.execute_csi(ch as u8, state);
            }
            _ => self.state = ParserState::Ground,
        }
        None
    }

    fn csi_intermediate(&mut self, ch: char, state: &mut TerminalState) -> Option<Response> {
        match ch {
            '\x20'..='\x2f' => self.intermediates.push(ch as u8),
            '\x40'..='\x7e' => return self.execute_csi(ch as u8, state),
            _ => self.state = ParserState::Ground,
        }
        None
    }

    fn osc_string_state(&mut self, ch: char, state: &mut TerminalState) -> Option<Response> {
        match ch {
            '\x07' | '\u{9c}' => {
                self.execute_osc(state);
                self.state = ParserState::Ground;
            }
            '\x1b' => self.state = ParserState::EscapeInOsc,
            _ => self.osc_string.push(ch),
        }
        None
    }

    fn param(&self, idx: usize, default: u16) -> u16 {
        match self.params.get(idx).copied() {
            Some(0) | None => default,
            Some(p) => p,
        }
    }

    fn execute_csi(&mut self, final_byte: u8, state: &mut TerminalState) -> Option<Response> {
        self.state = ParserState::Ground;
        let is_private = self.intermediates.contains(&b'?');
        let is_gt = self.intermediates.contains(&b'>');
        let n = self.param(0, 1);

        match (is_private, is_gt, final_byte) {
            (false, false, b'A') => state.cursor_up(n),
            (false, false, b'B') => state.cursor_down(n),
            (false, false, b'C') => state.cursor_forward(n),
            (false, false, b'D') => state.cursor_backward(n),
            // CNL / CPL
            (false, false, b'E') => {
                state.cursor_down(n);
                state.carriage_return();
            }
            (false, false, b'F') => {
                state.cursor_up(n);
                state.carriage_return();
            }
            // CHA
            (false, false, b'G') | (false, false, b'`') => state.set_cursor_col(n),
            // CUP
            (false, false, b'H') | (false, false, b'f') => {
                state.cursor_position(self.param(0, 1), self.param(1, 1));
            }
            // VPA
            (false, false, b'd') => state.set_cursor_row(n),

            (false, false, b'J') => state.erase_in_display(self.param(0, 0)),
            (false, false, b'K') => state.erase_in_line(self.param(0, 0)),
            (false, false, b'L') => state.insert_lines(n),
            (false, false, b'M') => state.delete_lines(n),
            (false, false, b'@') => state.insert_chars(n),
            (false, false, b'P') => state.delete_chars(n),
            (false, false, b'X') => state.erase_chars(n),
            (false, false, b'S') => state.scroll_up(n),
            (false, false, b'T') => state.scroll_down(n),

            // DECSTBM
            (false, false, b'r') => {
                let rows = state.rows;
                state.set_scroll_region(self.param(0, 1), self.param(1, rows));
                state.cursor_position(1, 1);
            }

            (false, false, b'm') => {
                let params = std::mem::take(&mut self.params);
                self.execute_sgr(&params, state);
            }

            (false, false, b's') => state.save_cursor(),
            (false, false, b'u') => state.restore_cursor(),

            // Window manipulation: only "resize to rows;cols" is honoured
            (false, false, b't') => {
                if self.params.first() == Some(&8) {
                    let rows = self.param(1, state.rows);
                    let cols = self.param(2, state.cols);
                    if rows != state.rows || cols != state.cols {
                        state.resize(cols, rows);
                    }
                }
            }

            // DSR
            (false, false, b'n') => match self.params.first() {
                Some(5) => return Some(Response::StatusOk),
                Some(6) => {
                    let pos = state.cursor_pos();
                    return Some(Response::CursorPosition(pos.row + 1, pos.col + 1));
                }
                _ => {}
            },

            (false, false, b'c') => return Some(Response::DeviceAttributes),
            (false, true, b'c') => return Some(Response::SecondaryDeviceAttributes),

            (true, false, b'h') | (true, false, b'l') => {
                let enable = final_byte == b'h';
                for &p in &self.params {
                    state.set_private_mode(p, enable);
                }
            }

            (false, false, b'h') | (false, false, b'l') => {
                let enable = final_byte == b'h';
                for &p in &self.params {
                    match p {
                        4 => state.modes.insert_mode = enable,
                        20 => state.modes.linefeed_newline = enable,
                        _ => {}
                    }
                }
            }

            // DECSCUSR (CSI Ps SP q)
            (false, false, b'q') if self.intermediates.contains(&b' ') => {
                state.set_cursor_style(self.params.first().copied().unwrap_or(0));
            }

            _ => {
                tracing::debug!(
                    "Unknown CSI: intermediates={:?}, params={:?}, final={:?}",
                    self.intermediates,
                    self.params,
                    final_byte as char
                );
            }
        }
        None
    }

    fn execute_sgr(&self, params: &[u16], state: &mut TerminalState) {
        if params.is_empty() {
            state.current_attrs.reset();
            return;
        }

        let attrs = &mut state.current_attrs;
        let mut iter = params.iter();

        while let Some(&param) = iter.next() {
            match param {
                0 => attrs.reset(),
                1 => attrs.flags |= StyleFlags::BOLD,
                3 => attrs.flags |= StyleFlags::ITALIC,
                4 => attrs.flags |= StyleFlags::UNDERLINE,
                7 => attrs.flags |= StyleFlags::INVERSE,
                9 => attrs.flags |= StyleFlags::STRIKETHROUGH,

                22 => attrs.flags.remove(StyleFlags::BOLD),
                23 => attrs.flags.remove(StyleFlags::ITALIC),
                24 => attrs.flags.remove(StyleFlags::UNDERLINE),
                27 => attrs.flags.remove(StyleFlags::INVERSE),
                29 => attrs.flags.remove(StyleFlags::STRIKETHROUGH),

                30..=37 => attrs.fg = Color::Indexed((param - 30) as u8),
                38 => {
                    if let Some(color) = Self::extended_color(&mut iter) {
                        attrs.fg = color;
                    }
                }
                39 => attrs.fg = Color::Default,

                40..=47 => attrs.bg = Color::Indexed((param - 40) as u8),
                48 => {
                    if let Some(color) = Self::extended_color(&mut iter) {
                        attrs.bg = color;
                    }
                }
                49 => attrs.bg = Color::Default,

                90..=97 => attrs.fg = Color::Indexed((param - 90 + 8) as u8),
                100..=107 => attrs.bg = Color::Indexed((param - 100 + 8) as u8),

                // dim, blink, hidden and friends have no cell flag
                _ => {}
            }
        }
    }

    /// `5;n` or `2;r;g;b` after 38/48
    fn extended_color(iter: &mut std::slice::Iter<'_, u16>) -> Option<Color> {
        match iter.next().copied()? {
            5 => iter.next().map(|&n| Color::Indexed(n.min(255) as u8)),
            2 => {
                let mut channel = || iter.next().copied().unwrap_or(0).min(255) as u8;
                let r = channel();
                let g = channel();
                let b = channel();
                Some(Color::Rgb(r, g, b))
            }
            _ => None,
        }
    }

    fn execute_osc(&mut self, state: &mut TerminalState) {
        let osc = std::mem::take(&mut self.osc_string);
        let (code, text) = match osc.split_once(';') {
            Some((code, text)) => (code, text),
            None => (osc.as_str(), ""),
        };

        match code {
            "0" | "1" | "2" => state.set_title(text),
            "12" => state.set_property(super::Property::CursorColor(text.to_string())),
            "112" => state.set_property(super::Property::CursorColor(String::new())),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{TermColor, INDEX_DEFAULT};
    use crate::core::term::{EngineEvent, Property};

    fn new_state() -> TerminalState {
        TerminalState::new(
            80,
            24,
            TermColor::new(255, 255, 255, INDEX_DEFAULT),
            TermColor::new(0, 0, 0, INDEX_DEFAULT),
        )
    }

    fn feed_str(parser: &mut VtParser, state: &mut TerminalState, s: &str) -> Vec<Response> {
        s.chars().filter_map(|ch| parser.feed(ch, state)).collect()
    }

    #[test]
    fn test_cursor_movement() {
        let mut state = new_state();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut state, "\x1b[5;10H");
        assert_eq!(state.active_cursor().row, 4);
        assert_eq!(state.active_cursor().col, 9);
    }

    #[test]
    fn test_sgr_colors() {
        let mut state = new_state();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut state, "\x1b[31m");
        assert_eq!(state.current_attrs.fg, Color::Indexed(1));

        feed_str(&mut parser, &mut state, "\x1b[1;48;2;10;20;30m");
        assert!(state.current_attrs.flags.contains(StyleFlags::BOLD));
        assert_eq!(state.current_attrs.bg, Color::Rgb(10, 20, 30));
    }

    #[test]
    fn test_title_with_utf8() {
        let mut state = new_state();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut state, "\x1b]2;héllo\x07");
        assert_eq!(state.title, "héllo");
        assert!(state
            .take_events()
            .contains(&EngineEvent::SetProperty(Property::Title("héllo".into()))));
    }

    #[test]
    fn test_cursor_report() {
        let mut state = new_state();
        let mut parser = VtParser::new();

        let replies = feed_str(&mut parser, &mut state, "\x1b[3;7H\x1b[6n");
        assert_eq!(replies, vec![Response::CursorPosition(3, 7)]);
    }

    #[test]
    fn test_resize_request() {
        let mut state = new_state();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut state, "\x1b[8;10;40t");
        assert_eq!((state.rows, state.cols), (10, 40));
        assert!(state
            .take_events()
            .contains(&EngineEvent::Resize { rows: 10, cols: 40 }));
    }

    #[test]
    fn test_mouse_modes() {
        let mut state = new_state();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut state, "\x1b[?1002h\x1b[?1006h");
        assert_eq!(state.modes.mouse_tracking, super::super::MouseTracking::Drag);
        assert_eq!(state.modes.mouse_encoding, super::super::MouseEncoding::Sgr);
        feed_str(&mut parser, &mut state, "\x1b[?1002l");
        assert_eq!(state.modes.mouse_tracking, super::super::MouseTracking::Off);
    }
}
