//! Input translation for terminal sessions
//!
//! Host key and mouse events are turned into engine injections; the bytes
//! the engine produces are then written to the job. The prefix keys
//! (CTRL-W and CTRL-\) are recognized here before anything reaches the job.
//!
//! ```text
//! KeyEvent --> TermKeys::feed --> KeyAction --> send_key --> Engine --> job
//! MouseEvent --> MouseRouter --> engine (tracking on)
//!                            \-> Selection (tracking off)
//! ```

use std::collections::HashMap;

use crossterm::event::{
    KeyCode, KeyEvent, KeyEventKind, KeyEventState, KeyModifiers, MouseButton, MouseEvent,
    MouseEventKind,
};

use crate::core::session::Session;
use crate::core::term::{Key, Modifiers, MouseTracking, Pos};

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// What a host key becomes for the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Converted {
    /// Named key, encoded by the engine
    Key(Key, Modifiers),
    /// Character, encoded by the engine
    Char(char, Modifiers),
    /// Not sent anywhere
    Dropped,
}

/// Map a host key to an engine key or character.
///
/// Backspace becomes `backspace`, the erase character of the pty, since
/// remote shells disagree on what it should be.
pub fn convert_key(event: &KeyEvent, backspace: u8) -> Converted {
    if event.kind == KeyEventKind::Release {
        return Converted::Dropped;
    }
    let mods = Modifiers::from(event.modifiers);
    let keypad = event.state.contains(KeyEventState::KEYPAD);

    match event.code {
        KeyCode::Backspace => Converted::Char(char::from(backspace), mods),
        KeyCode::Enter if keypad => Converted::Key(Key::KeypadEnter, mods),
        // Plain CR: the engine's Enter may add a line feed
        KeyCode::Enter => Converted::Char('\r', mods),
        KeyCode::Tab => Converted::Key(Key::Tab, mods),
        KeyCode::BackTab => Converted::Key(Key::Tab, mods | Modifiers::SHIFT),
        KeyCode::Esc => Converted::Key(Key::Escape, mods),
        KeyCode::Delete => Converted::Key(Key::Delete, mods),
        KeyCode::Insert => Converted::Key(Key::Insert, mods),
        KeyCode::Up => Converted::Key(Key::Up, mods),
        KeyCode::Down => Converted::Key(Key::Down, mods),
        KeyCode::Left => Converted::Key(Key::Left, mods),
        KeyCode::Right => Converted::Key(Key::Right, mods),
        KeyCode::Home => Converted::Key(Key::Home, mods),
        KeyCode::End => Converted::Key(Key::End, mods),
        KeyCode::PageUp => Converted::Key(Key::PageUp, mods),
        KeyCode::PageDown => Converted::Key(Key::PageDown, mods),
        KeyCode::F(n @ 1..=12) => Converted::Key(Key::Function(n), mods),
        KeyCode::Char(ch) if keypad => match keypad_key(ch) {
            Some(key) => Converted::Key(key, mods),
            None => Converted::Char(ch, mods),
        },
        KeyCode::Char(ch) => Converted::Char(ch, mods),
        // Lock keys, media keys, bare modifiers, F13 and up
        _ => Converted::Dropped,
    }
}

fn keypad_key(ch: char) -> Option<Key> {
    let key = match ch {
        '0'..='9' => Key::Keypad(ch as u8 - b'0'),
        '*' => Key::KeypadMultiply,
        '+' => Key::KeypadPlus,
        ',' => Key::KeypadComma,
        '-' => Key::KeypadMinus,
        '.' => Key::KeypadPeriod,
        '/' => Key::KeypadDivide,
        '=' => Key::KeypadEqual,
        _ => return None,
    };
    Some(key)
}

/// Inject one key into the session's engine and write the result to the
/// job. Returns false when the key was dropped.
pub fn send_key(session: &mut Session, event: &KeyEvent) -> bool {
    let converted = convert_key(event, session.backspace());
    let Some(engine) = session.engine_mut() else {
        return false;
    };
    match converted {
        Converted::Key(key, mods) => engine.keyboard_key(key, mods),
        Converted::Char(ch, mods) => engine.keyboard_unichar(ch, mods),
        Converted::Dropped => return false,
    }
    session.flush_engine_output();
    true
}

/// Send literal text through the key path, one character at a time.
pub fn send_text(session: &mut Session, text: &str) {
    let Some(engine) = session.engine_mut() else {
        return;
    };
    for ch in text.chars() {
        match ch {
            '\n' | '\r' => engine.keyboard_unichar('\r', Modifiers::empty()),
            '\t' => engine.keyboard_key(Key::Tab, Modifiers::empty()),
            '\x1b' => engine.keyboard_key(Key::Escape, Modifiers::empty()),
            _ => engine.keyboard_unichar(ch, Modifiers::empty()),
        }
    }
    session.flush_engine_output();
}

/// Paste text, bracketed when the application asked for it.
pub fn send_paste(session: &mut Session, text: &str) {
    let Some(engine) = session.engine_mut() else {
        return;
    };
    engine.start_paste();
    for ch in text.chars() {
        let ch = if ch == '\n' { '\r' } else { ch };
        engine.keyboard_unichar(ch, Modifiers::empty());
    }
    engine.end_paste();
    session.flush_engine_output();
}

/// Screen area of a view, in host cells
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Area {
    pub row: u16,
    pub col: u16,
    pub rows: u16,
    pub cols: u16,
}

impl Area {
    pub fn contains(&self, row: u16, col: u16) -> bool {
        row >= self.row
            && row < self.row.saturating_add(self.rows)
            && col >= self.col
            && col < self.col.saturating_add(self.cols)
    }
}

/// Result of routing one mouse event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseOutcome {
    /// Reported to the job
    Sent,
    /// Went to the modeless selection
    Selection,
    /// Selection finished; the host may copy it
    SelectionDone,
    /// Middle click without tracking: paste the clipboard
    PasteClipboard,
    /// Outside the view; the host handles it
    Host,
    Dropped,
}

/// Modeless text selection used while the application does not track the
/// mouse
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    anchor: Option<Pos>,
    head: Option<Pos>,
}

impl Selection {
    pub fn start(&mut self, pos: Pos) {
        self.anchor = Some(pos);
        self.head = Some(pos);
    }

    /// Move the free end; starts a selection if there is none.
    pub fn extend(&mut self, pos: Pos) {
        if self.anchor.is_none() {
            self.anchor = Some(pos);
        }
        self.head = Some(pos);
    }

    pub fn clear(&mut self) {
        self.anchor = None;
        self.head = None;
    }

    pub fn is_empty(&self) -> bool {
        self.anchor.is_none() || self.anchor == self.head
    }

    /// Start and end in reading order, end inclusive
    pub fn range(&self) -> Option<(Pos, Pos)> {
        let (a, b) = (self.anchor?, self.head?);
        if (a.row, a.col) <= (b.row, b.col) {
            Some((a, b))
        } else {
            Some((b, a))
        }
    }

    pub fn contains(&self, row: u16, col: u16) -> bool {
        let Some((start, end)) = self.range() else {
            return false;
        };
        (row, col) >= (start.row, start.col) && (row, col) <= (end.row, end.col)
    }

    /// Selected text, rows joined with newlines and trailing blanks removed.
    pub fn text(&self, line: impl Fn(u16) -> Option<String>) -> String {
        let Some((start, end)) = self.range() else {
            return String::new();
        };
        let mut rows = Vec::new();
        for row in start.row..=end.row {
            let text = line(row).unwrap_or_default();
            let from = if row == start.row { start.col as usize } else { 0 };
            let to = if row == end.row { end.col as usize + 1 } else { usize::MAX };
            let part: String = text
                .chars()
                .skip(from)
                .take(to.saturating_sub(from))
                .collect();
            rows.push(part.trim_end().to_string());
        }
        rows.join("\n")
    }
}

/// Decides where mouse events go
#[derive(Debug)]
pub struct MouseRouter {
    /// Drags and releases without a preceding press are ignored
    ignore_drag_release: bool,
    /// Click that gave the view focus, handled on the first drag
    enter_pos: Option<Pos>,
    /// The last event was outside the view
    was_outside: bool,
}

impl Default for MouseRouter {
    fn default() -> Self {
        Self {
            ignore_drag_release: true,
            enter_pos: None,
            was_outside: false,
        }
    }
}

impl MouseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the click that focused the view, in view coordinates.
    pub fn focus_click(&mut self, pos: Pos) {
        self.enter_pos = Some(pos);
    }

    /// Route a mouse event for the view at `area`.
    pub fn route(
        &mut self,
        session: &mut Session,
        event: &MouseEvent,
        area: Area,
        selection: &mut Selection,
    ) -> MouseOutcome {
        let dragging_outside = matches!(event.kind, MouseEventKind::Drag(_)) && self.was_outside;
        if !area.contains(event.row, event.column) || dragging_outside {
            self.was_outside = true;
            return MouseOutcome::Host;
        }
        self.was_outside = false;

        let pos = Pos::new(event.row - area.row, event.column - area.col);
        let mods = Modifiers::from(event.modifiers);
        let tracking = session
            .engine()
            .map_or(MouseTracking::Off, |engine| engine.mouse_tracking());

        let outcome = match event.kind {
            MouseEventKind::ScrollUp => forward(session, pos, 4, true, mods),
            MouseEventKind::ScrollDown => forward(session, pos, 5, true, mods),
            MouseEventKind::ScrollLeft | MouseEventKind::ScrollRight => MouseOutcome::Dropped,
            _ if tracking == MouseTracking::Off => {
                let outcome = self.modeless(event.kind, pos, selection);
                self.enter_pos = None;
                return outcome;
            }
            MouseEventKind::Down(button) => forward(session, pos, button_number(button), true, mods),
            MouseEventKind::Drag(button) => forward(session, pos, button_number(button), true, mods),
            MouseEventKind::Up(button) => forward(session, pos, button_number(button), false, mods),
            MouseEventKind::Moved => forward(session, pos, 0, false, mods),
        };
        self.enter_pos = None;
        outcome
    }

    fn modeless(&mut self, kind: MouseEventKind, pos: Pos, selection: &mut Selection) -> MouseOutcome {
        match kind {
            MouseEventKind::Drag(MouseButton::Left | MouseButton::Right)
            | MouseEventKind::Up(MouseButton::Left | MouseButton::Right) => {
                if self.ignore_drag_release {
                    let Some(start) = self.enter_pos else {
                        return MouseOutcome::Dropped;
                    };
                    // the click that focused the view starts the selection
                    selection.start(start);
                }
                selection.extend(pos);
                if matches!(kind, MouseEventKind::Up(_)) {
                    self.ignore_drag_release = true;
                    MouseOutcome::SelectionDone
                } else {
                    self.ignore_drag_release = false;
                    MouseOutcome::Selection
                }
            }
            MouseEventKind::Down(MouseButton::Left) => {
                self.ignore_drag_release = false;
                selection.start(pos);
                MouseOutcome::Selection
            }
            MouseEventKind::Down(MouseButton::Right) => {
                self.ignore_drag_release = false;
                selection.extend(pos);
                MouseOutcome::Selection
            }
            MouseEventKind::Down(MouseButton::Middle) => MouseOutcome::PasteClipboard,
            _ => MouseOutcome::Dropped,
        }
    }
}

fn button_number(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 1,
        MouseButton::Middle => 2,
        MouseButton::Right => 3,
    }
}

/// Position first, then the button.
fn forward(session: &mut Session, pos: Pos, button: u8, pressed: bool, mods: Modifiers) -> MouseOutcome {
    let Some(engine) = session.engine_mut() else {
        return MouseOutcome::Dropped;
    };
    engine.mouse_move(pos.row, pos.col, mods);
    if button != 0 {
        engine.mouse_button(button, pressed, mods);
    }
    session.flush_engine_output();
    MouseOutcome::Sent
}

/// Contents of one register
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register {
    pub lines: Vec<String>,
    pub linewise: bool,
}

impl Register {
    /// Bytes sent to the job: lines separated by CR, a final CR when
    /// linewise.
    pub fn paste_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            bytes.extend_from_slice(line.as_bytes());
            if i + 1 < self.lines.len() || self.linewise {
                bytes.push(b'\r');
            }
        }
        bytes
    }
}

/// Named registers plus the system clipboard as `*` and `+`
#[derive(Debug, Default)]
pub struct Registers {
    named: HashMap<char, Register>,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: char, text: &str) {
        let linewise = text.ends_with('\n');
        let lines = text.trim_end_matches('\n').split('\n').map(str::to_string).collect();
        self.named.insert(name, Register { lines, linewise });
    }

    pub fn get(&self, name: char) -> Option<Register> {
        match name {
            '*' | '+' => {
                let text = read_clipboard()?;
                let linewise = text.ends_with('\n');
                Some(Register {
                    lines: text.trim_end_matches('\n').split('\n').map(str::to_string).collect(),
                    linewise,
                })
            }
            _ => self.named.get(&name).cloned(),
        }
    }

    /// Store a selection in the unnamed register and the clipboard.
    pub fn yank_selection(&mut self, text: &str) {
        self.set('"', text);
        if let Err(e) = write_clipboard(text) {
            tracing::debug!("Clipboard not available: {}", e);
        }
    }
}

fn read_clipboard() -> Option<String> {
    match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.get_text()) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::debug!("Clipboard not available: {}", e);
            None
        }
    }
}

fn write_clipboard(text: &str) -> Result<(), arboard::Error> {
    let mut clipboard = arboard::Clipboard::new()?;
    clipboard.set_text(text.to_string())
}

/// What the terminal loop must do after a key
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// Send these keys to the job
    Send(Vec<KeyEvent>),
    /// Waiting for the key after a prefix
    Pending,
    /// Enter normal mode
    NormalMode,
    /// Stop the job with "kill", then send the key
    Stop(KeyEvent),
    /// Paste the named register
    PasteRegister(char),
    /// Not for the job; the host handles these keys as a command
    Host(Vec<KeyEvent>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pending {
    None,
    /// Prefix typed; holds the prefix key
    Prefix(KeyEvent),
    /// Prefix and `"` typed
    Register,
}

/// Prefix key state of the terminal loop
#[derive(Debug)]
pub struct TermKeys {
    /// Custom prefix; CTRL-W when unset
    termkey: Option<KeyEvent>,
    pending: Pending,
}

impl TermKeys {
    /// `termkey` is a key name such as `<C-X>`; empty means CTRL-W.
    pub fn new(termkey: &str) -> Self {
        let parsed = parse_key(termkey);
        if parsed.is_none() && !termkey.trim().is_empty() {
            tracing::warn!("Unrecognized termkey '{}', using CTRL-W", termkey);
        }
        Self {
            termkey: parsed,
            pending: Pending::None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending != Pending::None
    }

    fn prefix(&self) -> KeyEvent {
        self.termkey.unwrap_or_else(|| ctrl('w'))
    }

    /// The prefix key, for hosts handling keys outside job mode
    pub fn is_prefix(&self, key: &KeyEvent) -> bool {
        same_key(key, &self.prefix())
    }

    /// Handle one typed key.
    pub fn feed(&mut self, key: KeyEvent) -> KeyAction {
        if key.kind == KeyEventKind::Release {
            return KeyAction::Pending;
        }
        match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::None => {
                if same_key(&key, &self.prefix()) || is_ctrl_backslash(&key) {
                    self.pending = Pending::Prefix(key);
                    KeyAction::Pending
                } else {
                    KeyAction::Send(vec![key])
                }
            }
            Pending::Register => match key.code {
                KeyCode::Char(name) => KeyAction::PasteRegister(name),
                _ => KeyAction::Send(Vec::new()),
            },
            Pending::Prefix(prev) if is_ctrl_backslash(&prev) => {
                if same_key(&key, &ctrl('n')) {
                    KeyAction::NormalMode
                } else {
                    KeyAction::Send(vec![prev, key])
                }
            }
            Pending::Prefix(prev) => {
                if same_key(&key, &ctrl('c')) {
                    KeyAction::Stop(key)
                } else if self.termkey.is_none() && is_plain(&key, '.') {
                    KeyAction::Send(vec![ctrl('w')])
                } else if is_plain(&key, 'N') {
                    KeyAction::NormalMode
                } else if is_plain(&key, '"') {
                    self.pending = Pending::Register;
                    KeyAction::Pending
                } else if self.termkey.is_some() && same_key(&key, &prev) {
                    // the prefix twice sends it
                    KeyAction::Send(vec![key])
                } else {
                    KeyAction::Host(vec![prev, key])
                }
            }
        }
    }
}

/// CTRL plus a letter
pub fn ctrl(ch: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
}

fn is_plain(key: &KeyEvent, ch: char) -> bool {
    key.code == KeyCode::Char(ch) && !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
}

fn is_ctrl_backslash(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('\\') | KeyCode::Char('4'))
}

/// Compare keys, ignoring case of CTRL letters and the SHIFT flag on
/// characters.
fn same_key(a: &KeyEvent, b: &KeyEvent) -> bool {
    let relevant = KeyModifiers::CONTROL | KeyModifiers::ALT;
    match (a.code, b.code) {
        (KeyCode::Char(x), KeyCode::Char(y)) => {
            let ctrl = a.modifiers.contains(KeyModifiers::CONTROL);
            let same_char = if ctrl {
                x.eq_ignore_ascii_case(&y)
            } else {
                x == y
            };
            same_char && (a.modifiers & relevant) == (b.modifiers & relevant)
        }
        (x, y) => x == y && a.modifiers == b.modifiers,
    }
}

/// Parse a key name: `<C-x>`, `<M-x>`, `<Esc>`, `<F5>` or a single
/// character.
pub fn parse_key(name: &str) -> Option<KeyEvent> {
    let name = name.trim();
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return Some(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE));
    }
    let inner = name.strip_prefix('<')?.strip_suffix('>')?;
    let mut mods = KeyModifiers::NONE;
    let mut rest = inner;
    loop {
        let lower = rest.to_ascii_lowercase();
        if lower.starts_with("c-") {
            mods |= KeyModifiers::CONTROL;
        } else if lower.starts_with("m-") || lower.starts_with("a-") {
            mods |= KeyModifiers::ALT;
        } else if lower.starts_with("s-") {
            mods |= KeyModifiers::SHIFT;
        } else {
            break;
        }
        rest = &rest[2..];
    }
    let code = match rest.to_ascii_lowercase().as_str() {
        "esc" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "cr" | "enter" => KeyCode::Enter,
        "bs" => KeyCode::Backspace,
        "space" => KeyCode::Char(' '),
        lower => {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) if mods.contains(KeyModifiers::CONTROL) => {
                    KeyCode::Char(ch.to_ascii_lowercase())
                }
                (Some(ch), None) => KeyCode::Char(ch),
                _ => {
                    let n: u8 = lower.strip_prefix('f')?.parse().ok()?;
                    KeyCode::F(n)
                }
            }
        }
    };
    Some(KeyEvent::new(code, mods))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{TermColor, INDEX_DEFAULT};
    use crate::config::SessionOptions;
    use crate::core::term::VtEngine;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    fn session() -> Session {
        let engine = VtEngine::new(
            5,
            10,
            TermColor::new(255, 255, 255, INDEX_DEFAULT),
            TermColor::new(0, 0, 0, INDEX_DEFAULT),
        );
        Session::new("!test", &SessionOptions::default(), Box::new(engine))
    }

    fn mouse(kind: MouseEventKind, row: u16, column: u16) -> MouseEvent {
        MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    #[test]
    fn test_convert_named_keys() {
        let event = key_event(KeyCode::Up, KeyModifiers::SHIFT);
        assert_eq!(convert_key(&event, 0x7f), Converted::Key(Key::Up, Modifiers::SHIFT));

        let event = key_event(KeyCode::BackTab, KeyModifiers::NONE);
        assert_eq!(convert_key(&event, 0x7f), Converted::Key(Key::Tab, Modifiers::SHIFT));

        let event = key_event(KeyCode::F(5), KeyModifiers::NONE);
        assert_eq!(convert_key(&event, 0x7f), Converted::Key(Key::Function(5), Modifiers::empty()));
    }

    #[test]
    fn test_backspace_uses_pty_erase_char() {
        let event = key_event(KeyCode::Backspace, KeyModifiers::NONE);
        assert_eq!(convert_key(&event, 0x08), Converted::Char('\x08', Modifiers::empty()));
        assert_eq!(convert_key(&event, 0x7f), Converted::Char('\x7f', Modifiers::empty()));
    }

    #[test]
    fn test_reserved_keys_are_dropped() {
        for code in [KeyCode::CapsLock, KeyCode::Menu, KeyCode::Null, KeyCode::F(21)] {
            assert_eq!(convert_key(&key_event(code, KeyModifiers::NONE), 0x7f), Converted::Dropped);
        }
        let mut release = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        assert_eq!(convert_key(&release, 0x7f), Converted::Dropped);
    }

    #[test]
    fn test_keypad_keys() {
        let event = KeyEvent::new_with_kind_and_state(
            KeyCode::Char('7'),
            KeyModifiers::NONE,
            KeyEventKind::Press,
            KeyEventState::KEYPAD,
        );
        assert_eq!(convert_key(&event, 0x7f), Converted::Key(Key::Keypad(7), Modifiers::empty()));
    }

    #[test]
    fn test_send_key_without_engine_is_noop() {
        let mut s = session();
        s.free_engine();
        assert!(!send_key(&mut s, &key_event(KeyCode::Char('a'), KeyModifiers::NONE)));
    }

    #[test]
    fn test_prefix_normal_mode() {
        let mut keys = TermKeys::new("");
        assert_eq!(keys.feed(ctrl('w')), KeyAction::Pending);
        assert!(keys.is_pending());
        let n = key_event(KeyCode::Char('N'), KeyModifiers::SHIFT);
        assert_eq!(keys.feed(n), KeyAction::NormalMode);
        assert!(!keys.is_pending());

        assert_eq!(keys.feed(ctrl('\\')), KeyAction::Pending);
        assert_eq!(keys.feed(ctrl('n')), KeyAction::NormalMode);
    }

    #[test]
    fn test_ctrl_backslash_other_key_sends_both() {
        let mut keys = TermKeys::new("");
        keys.feed(ctrl('\\'));
        let x = key_event(KeyCode::Char('x'), KeyModifiers::NONE);
        assert_eq!(keys.feed(x), KeyAction::Send(vec![ctrl('\\'), x]));
    }

    #[test]
    fn test_prefix_commands() {
        let mut keys = TermKeys::new("");
        keys.feed(ctrl('w'));
        assert_eq!(keys.feed(ctrl('c')), KeyAction::Stop(ctrl('c')));

        keys.feed(ctrl('w'));
        let dot = key_event(KeyCode::Char('.'), KeyModifiers::NONE);
        assert_eq!(keys.feed(dot), KeyAction::Send(vec![ctrl('w')]));

        keys.feed(ctrl('w'));
        assert_eq!(keys.feed(key_event(KeyCode::Char('"'), KeyModifiers::SHIFT)), KeyAction::Pending);
        assert_eq!(
            keys.feed(key_event(KeyCode::Char('a'), KeyModifiers::NONE)),
            KeyAction::PasteRegister('a')
        );

        keys.feed(ctrl('w'));
        let q = key_event(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(keys.feed(q), KeyAction::Host(vec![ctrl('w'), q]));
    }

    #[test]
    fn test_custom_termkey() {
        let mut keys = TermKeys::new("<C-X>");
        let a = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(keys.feed(a), KeyAction::Send(vec![a]));
        assert_eq!(keys.feed(ctrl('w')), KeyAction::Send(vec![ctrl('w')]));

        assert_eq!(keys.feed(ctrl('x')), KeyAction::Pending);
        assert_eq!(keys.feed(ctrl('x')), KeyAction::Send(vec![ctrl('x')]));

        keys.feed(ctrl('x'));
        let dot = key_event(KeyCode::Char('.'), KeyModifiers::NONE);
        assert_eq!(keys.feed(dot), KeyAction::Host(vec![ctrl('x'), dot]));
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("<C-W>"), Some(ctrl('w')));
        assert_eq!(parse_key("<F5>"), Some(key_event(KeyCode::F(5), KeyModifiers::NONE)));
        assert_eq!(parse_key("x"), Some(key_event(KeyCode::Char('x'), KeyModifiers::NONE)));
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("<bogus>"), None);
    }

    #[test]
    fn test_register_paste_bytes() {
        let mut regs = Registers::new();
        regs.set('a', "one\ntwo\n");
        let reg = regs.get('a').unwrap();
        assert!(reg.linewise);
        assert_eq!(reg.paste_bytes(), b"one\rtwo\r");

        regs.set('b', "word");
        assert_eq!(regs.get('b').unwrap().paste_bytes(), b"word");
        assert!(regs.get('z').is_none());
    }

    #[test]
    fn test_mouse_outside_goes_to_host() {
        let mut s = session();
        let mut router = MouseRouter::new();
        let mut sel = Selection::default();
        let area = Area { row: 1, col: 0, rows: 5, cols: 10 };

        let click = mouse(MouseEventKind::Down(MouseButton::Left), 0, 0);
        assert_eq!(router.route(&mut s, &click, area, &mut sel), MouseOutcome::Host);
        // a drag that started outside stays with the host
        let drag = mouse(MouseEventKind::Drag(MouseButton::Left), 2, 2);
        assert_eq!(router.route(&mut s, &drag, area, &mut sel), MouseOutcome::Host);
    }

    #[test]
    fn test_modeless_selection_ignores_unpaired_release() {
        let mut s = session();
        let mut router = MouseRouter::new();
        let mut sel = Selection::default();
        let area = Area { row: 0, col: 0, rows: 5, cols: 10 };

        let release = mouse(MouseEventKind::Up(MouseButton::Left), 1, 1);
        assert_eq!(router.route(&mut s, &release, area, &mut sel), MouseOutcome::Dropped);
        assert!(sel.range().is_none());

        let down = mouse(MouseEventKind::Down(MouseButton::Left), 0, 1);
        let drag = mouse(MouseEventKind::Drag(MouseButton::Left), 1, 3);
        let up = mouse(MouseEventKind::Up(MouseButton::Left), 1, 4);
        assert_eq!(router.route(&mut s, &down, area, &mut sel), MouseOutcome::Selection);
        assert_eq!(router.route(&mut s, &drag, area, &mut sel), MouseOutcome::Selection);
        assert_eq!(router.route(&mut s, &up, area, &mut sel), MouseOutcome::SelectionDone);
        assert_eq!(sel.range(), Some((Pos::new(0, 1), Pos::new(1, 4))));

        // the next release without a press is ignored again
        let mut other = Selection::default();
        assert_eq!(router.route(&mut s, &up, area, &mut other), MouseOutcome::Dropped);
    }

    #[test]
    fn test_focus_click_starts_selection() {
        let mut s = session();
        let mut router = MouseRouter::new();
        let mut sel = Selection::default();
        let area = Area { row: 0, col: 0, rows: 5, cols: 10 };

        router.focus_click(Pos::new(2, 2));
        let drag = mouse(MouseEventKind::Drag(MouseButton::Left), 3, 5);
        assert_eq!(router.route(&mut s, &drag, area, &mut sel), MouseOutcome::Selection);
        assert_eq!(sel.range(), Some((Pos::new(2, 2), Pos::new(3, 5))));
    }

    #[test]
    fn test_mouse_forwarded_when_tracking() {
        let mut s = session();
        // SGR click tracking
        s.write_job_output(b"\x1b[?1000h\x1b[?1006h");
        let mut router = MouseRouter::new();
        let mut sel = Selection::default();
        let area = Area { row: 0, col: 0, rows: 5, cols: 10 };

        let down = mouse(MouseEventKind::Down(MouseButton::Left), 2, 3);
        assert_eq!(router.route(&mut s, &down, area, &mut sel), MouseOutcome::Sent);
        assert!(sel.range().is_none());
    }

    #[test]
    fn test_selection_text() {
        let mut sel = Selection::default();
        sel.start(Pos::new(1, 2));
        sel.extend(Pos::new(0, 3));
        let lines = ["hello world", "second line"];
        let text = sel.text(|row| lines.get(row as usize).map(|s| s.to_string()));
        assert_eq!(text, "lo world\nsec");
        assert!(sel.contains(0, 5));
        assert!(!sel.contains(1, 3));
    }
}
