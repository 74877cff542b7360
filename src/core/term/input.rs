//! Keyboard and mouse encoding
//!
//! Turns injected keys, characters and mouse reports into the byte sequences
//! an xterm-compatible application expects, honouring the modes the
//! application has switched on.

use bitflags::bitflags;

use super::state::TerminalModes;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

/// Named keys the engine knows how to encode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Backspace,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Insert,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    /// F1..F12
    Function(u8),
    /// Keypad digit 0..=9
    Keypad(u8),
    KeypadMultiply,
    KeypadPlus,
    KeypadComma,
    KeypadMinus,
    KeypadPeriod,
    KeypadDivide,
    KeypadEnter,
    KeypadEqual,
}

/// Mouse tracking requested by the application
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MouseTracking {
    /// No tracking; the host may use the mouse for itself
    #[default]
    Off,
    /// Press and release
    Click,
    /// Press, release and motion with a button held
    Drag,
    /// All motion
    Move,
}

/// Wire format of mouse reports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MouseEncoding {
    #[default]
    X10,
    Sgr,
    Urxvt,
}

/// Encode a named key.
pub fn encode_key(key: Key, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
    match key {
        Key::Enter => {
            if modes.linefeed_newline {
                vec![0x0D, 0x0A]
            } else {
                vec![0x0D]
            }
        }
        Key::Backspace => {
            if mods.contains(Modifiers::ALT) {
                vec![0x1B, 0x7F]
            } else {
                vec![0x7F]
            }
        }
        Key::Tab => {
            if mods.contains(Modifiers::SHIFT) {
                b"\x1b[Z".to_vec()
            } else {
                vec![0x09]
            }
        }
        Key::Escape => vec![0x1B],
        Key::Up => arrow_key(b'A', mods, modes),
        Key::Down => arrow_key(b'B', mods, modes),
        Key::Right => arrow_key(b'C', mods, modes),
        Key::Left => arrow_key(b'D', mods, modes),
        Key::Home => special_key(b'H', mods, modes),
        Key::End => special_key(b'F', mods, modes),
        Key::PageUp => tilde_key(5, mods),
        Key::PageDown => tilde_key(6, mods),
        Key::Insert => tilde_key(2, mods),
        Key::Delete => tilde_key(3, mods),
        Key::Function(n) => function_key(n, mods),
        Key::Keypad(d) => keypad_key(b'p' + d.min(9), (b'0' + d.min(9)) as char, modes),
        Key::KeypadMultiply => keypad_key(b'j', '*', modes),
        Key::KeypadPlus => keypad_key(b'k', '+', modes),
        Key::KeypadComma => keypad_key(b'l', ',', modes),
        Key::KeypadMinus => keypad_key(b'm', '-', modes),
        Key::KeypadPeriod => keypad_key(b'n', '.', modes),
        Key::KeypadDivide => keypad_key(b'o', '/', modes),
        Key::KeypadEnter => {
            if modes.application_keypad {
                b"\x1bOM".to_vec()
            } else {
                encode_key(Key::Enter, mods, modes)
            }
        }
        Key::KeypadEqual => keypad_key(b'X', '=', modes),
    }
}

/// Encode a character with modifiers
pub fn encode_char(ch: char, mods: Modifiers) -> Vec<u8> {
    // Ctrl + letter = control character
    if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
        if ch.is_ascii_alphabetic() {
            return vec![(ch.to_ascii_lowercase() as u8) - b'a' + 1];
        }
        match ch {
            '@' | '`' | ' ' => return vec![0x00],
            '[' => return vec![0x1B],
            '\\' => return vec![0x1C],
            ']' => return vec![0x1D],
            '^' | '~' => return vec![0x1E],
            '_' | '?' => return vec![0x1F],
            _ => {}
        }
    }

    // Ctrl + Alt + letter
    if mods.contains(Modifiers::CTRL | Modifiers::ALT) && ch.is_ascii_alphabetic() {
        return vec![0x1B, (ch.to_ascii_lowercase() as u8) - b'a' + 1];
    }

    let mut bytes = Vec::with_capacity(5);
    if mods.contains(Modifiers::ALT) {
        bytes.push(0x1B);
    }
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
    bytes
}

fn arrow_key(key: u8, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
    if !mods.is_empty() {
        format!("\x1b[1;{}{}", modifier_code(mods), key as char).into_bytes()
    } else if modes.application_cursor {
        vec![0x1B, b'O', key]
    } else {
        vec![0x1B, b'[', key]
    }
}

fn special_key(key: u8, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
    if !mods.is_empty() {
        format!("\x1b[1;{}{}", modifier_code(mods), key as char).into_bytes()
    } else if modes.application_cursor {
        vec![0x1B, b'O', key]
    } else {
        vec![0x1B, b'[', key]
    }
}

fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
    if mods.is_empty() {
        format!("\x1b[{}~", code).into_bytes()
    } else {
        format!("\x1b[{};{}~", code, modifier_code(mods)).into_bytes()
    }
}

fn keypad_key(app: u8, plain: char, modes: &TerminalModes) -> Vec<u8> {
    if modes.application_keypad {
        vec![0x1B, b'O', app]
    } else {
        vec![plain as u8]
    }
}

fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
    let code: u8 = match n {
        1..=4 => {
            let key = b'P' + (n - 1);
            return if mods.is_empty() {
                vec![0x1B, b'O', key]
            } else {
                format!("\x1b[1;{}{}", modifier_code(mods), key as char).into_bytes()
            };
        }
        5 => 15,
        6..=10 => n + 11,
        11 | 12 => n + 12,
        _ => return Vec::new(),
    };
    tilde_key(code, mods)
}

/// xterm modifier parameter
fn modifier_code(mods: Modifiers) -> u8 {
    1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
        + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
        + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
}

fn mouse_modifier_bits(mods: Modifiers) -> u16 {
    let mut cb = 0;
    if mods.contains(Modifiers::SHIFT) {
        cb += 4;
    }
    if mods.contains(Modifiers::ALT) {
        cb += 8;
    }
    if mods.contains(Modifiers::CTRL) {
        cb += 16;
    }
    cb
}

/// Pointer state the engine keeps between mouse calls
#[derive(Clone, Copy, Debug, Default)]
pub struct MouseState {
    pub row: u16,
    pub col: u16,
    /// Bit n set while button n + 1 is held
    pub buttons: u8,
}

impl MouseState {
    /// Record a move; returns the report to send, if any.
    pub fn moved(&mut self, row: u16, col: u16, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
        if row == self.row && col == self.col {
            return Vec::new();
        }
        self.row = row;
        self.col = col;

        let held = (0..3u8).find(|b| self.buttons & (1 << b) != 0);
        let report = match (modes.mouse_tracking, held) {
            (MouseTracking::Move, None) => Some(3),
            (MouseTracking::Move | MouseTracking::Drag, Some(b)) => Some(b as u16),
            _ => None,
        };
        match report {
            Some(code) => encode_mouse(
                code + 32 + mouse_modifier_bits(mods),
                true,
                row,
                col,
                modes.mouse_encoding,
            ),
            None => Vec::new(),
        }
    }

    /// Record a button change; returns the report to send, if any.
    pub fn button(&mut self, button: u8, pressed: bool, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
        let code = match button {
            1..=3 => {
                let bit = 1 << (button - 1);
                if pressed {
                    self.buttons |= bit;
                } else {
                    self.buttons &= !bit;
                }
                (button - 1) as u16
            }
            4 | 5 => {
                if !pressed {
                    return Vec::new();
                }
                64 + (button - 4) as u16
            }
            _ => return Vec::new(),
        };
        if modes.mouse_tracking == MouseTracking::Off {
            return Vec::new();
        }

        let cb = code + mouse_modifier_bits(mods);
        encode_mouse(cb, pressed, self.row, self.col, modes.mouse_encoding)
    }
}

/// Encode one mouse report at a zero-based cell position.
///
/// X10 and urxvt reports have no release form for a specific button, so a
/// release is reported as button code 3 there.
pub fn encode_mouse(cb: u16, pressed: bool, row: u16, col: u16, encoding: MouseEncoding) -> Vec<u8> {
    let x = col.saturating_add(1);
    let y = row.saturating_add(1);
    let legacy_cb = if pressed || cb >= 64 { cb } else { (cb & !3) | 3 };

    match encoding {
        MouseEncoding::Sgr => {
            let suffix = if pressed { 'M' } else { 'm' };
            format!("\x1b[<{};{};{}{}", cb, x, y, suffix).into_bytes()
        }
        MouseEncoding::Urxvt => format!("\x1b[{};{};{}M", legacy_cb + 32, x, y).into_bytes(),
        MouseEncoding::X10 => {
            // Coordinates beyond 223 cannot be represented
            if x <= 223 && y <= 223 {
                vec![0x1b, b'[', b'M', (legacy_cb + 32) as u8, (x + 32) as u8, (y + 32) as u8]
            } else {
                Vec::new()
            }
        }
    }
}
