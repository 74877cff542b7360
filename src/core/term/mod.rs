//! Terminal emulation engine
//!
//! The session host talks to the emulator only through the [`Engine`] trait.
//! Everything the emulator wants to tell the host comes back as a list of
//! [`EngineEvent`]s drained after each feed, so the host never runs inside
//! the parser and cannot feed bytes re-entrantly.
//!
//! ```text
//! bytes --> Engine::feed --> parser --> TerminalState
//!                                          |
//!            Engine::take_events <---------+ (damage, moves, props, resize,
//!                                               pushed lines)
//!            Engine::take_output <------------ (replies, encoded keys/mouse)
//! ```

pub mod engine;
pub mod input;
pub mod parser;
pub mod state;

use crate::color::{StyleFlags, TermColor};

pub use engine::VtEngine;
pub use input::{Key, Modifiers, MouseEncoding, MouseTracking};
pub use state::CursorShape;

/// One cell as the engine exposes it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScreenCell {
    /// Glyph plus combining characters; empty for a blank cell
    pub chars: String,
    /// 1 or 2 for a glyph, 0 for the right half of a wide glyph
    pub width: u8,
    pub flags: StyleFlags,
    pub fg: TermColor,
    pub bg: TermColor,
}

impl ScreenCell {
    pub fn blank(fg: TermColor, bg: TermColor) -> Self {
        Self {
            chars: String::new(),
            width: 1,
            flags: StyleFlags::empty(),
            fg,
            bg,
        }
    }

    /// Right half of `wide`
    pub fn continuation(wide: &ScreenCell) -> Self {
        Self {
            chars: String::new(),
            width: 0,
            flags: wide.flags,
            fg: wide.fg,
            bg: wide.bg,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }
}

/// Zero-based screen position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pos {
    pub row: u16,
    pub col: u16,
}

impl Pos {
    pub fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

/// Rectangle with exclusive ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub start_row: u16,
    pub end_row: u16,
    pub start_col: u16,
    pub end_col: u16,
}

impl Rect {
    pub fn rows(start_row: u16, end_row: u16, cols: u16) -> Self {
        Self {
            start_row,
            end_row,
            start_col: 0,
            end_col: cols,
        }
    }
}

/// Cursor as seen by the host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorInfo {
    pub pos: Pos,
    pub visible: bool,
    pub blink: bool,
    pub shape: CursorShape,
}

/// Terminal property changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Property {
    Title(String),
    CursorVisible(bool),
    CursorBlink(bool),
    CursorShape(CursorShape),
    CursorColor(String),
    AltScreen(bool),
}

/// Notifications produced while feeding bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// Cells in the rectangle changed
    Damage(Rect),
    /// The contents of `src` now live at `dest`
    MoveRect { dest: Rect, src: Rect },
    MoveCursor { pos: Pos, old: Pos, visible: bool },
    SetProperty(Property),
    /// The screen size changed
    Resize { rows: u16, cols: u16 },
    /// A row scrolled off the top of the primary screen
    PushLine(Vec<ScreenCell>),
}

/// The terminal emulator as used by a session
pub trait Engine {
    /// Parse process output. Damage is flushed before this returns.
    fn feed(&mut self, bytes: &[u8]);

    /// Events produced since the last call
    fn take_events(&mut self) -> Vec<EngineEvent>;

    /// Bytes the emulator wants to send to the process
    fn take_output(&mut self) -> Vec<u8>;

    /// (rows, cols)
    fn size(&self) -> (u16, u16);

    fn set_size(&mut self, rows: u16, cols: u16);

    fn cell(&self, row: u16, col: u16) -> Option<ScreenCell>;

    /// Plain text of a row with trailing blanks removed
    fn screen_text(&self, row: u16) -> Option<String>;

    fn cursor(&self) -> CursorInfo;

    fn default_colors(&self) -> (TermColor, TermColor);

    fn set_default_colors(&mut self, fg: TermColor, bg: TermColor);

    fn keyboard_key(&mut self, key: Key, mods: Modifiers);

    fn keyboard_unichar(&mut self, ch: char, mods: Modifiers);

    fn mouse_move(&mut self, row: u16, col: u16, mods: Modifiers);

    /// Buttons are numbered 1..=3 for left/middle/right, 4 and 5 for the wheel
    fn mouse_button(&mut self, button: u8, pressed: bool, mods: Modifiers);

    fn mouse_tracking(&self) -> MouseTracking;

    fn start_paste(&mut self);

    fn end_paste(&mut self);

    fn using_alt_screen(&self) -> bool;

    fn set_cursor_blink(&mut self, blink: bool);
}
