//! Rendering of sessions into panes, and panes onto the host terminal
//!
//! The [`Coordinator`] applies the updates a session returns from its engine
//! events to every pane showing it, negotiates the session size from those
//! panes and repaints dirty rows. The [`Screen`] puts panes on the host
//! terminal with crossterm.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, SetCursorStyle, Show},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};

use crate::color::{ColorContext, DisplayAttr, StyleFlags};
use crate::core::registry::{Registry, SessionId};
use crate::core::scrollback::{glyphs, CellAttr};
use crate::core::session::{CursorProps, Session, ViewUpdate};
use crate::core::term::{CursorShape, Pos};
use crate::wm::{Pane, WindowManager};

/// Cursor appearance as last sent to the host terminal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorStyle {
    pub shape: CursorShape,
    pub blink: bool,
    pub color: Option<String>,
}

impl From<&CursorProps> for CursorStyle {
    fn from(props: &CursorProps) -> Self {
        Self {
            shape: props.shape,
            blink: props.blink,
            color: props.color.clone(),
        }
    }
}

/// Keeps panes in step with their sessions
pub struct Coordinator {
    colors: ColorContext,
}

impl Coordinator {
    pub fn new(colors: ColorContext) -> Self {
        Self { colors }
    }

    pub fn colors(&self) -> &ColorContext {
        &self.colors
    }

    fn resolve(&self, attr: &CellAttr) -> DisplayAttr {
        self.colors.cell_to_attr(attr.flags, &attr.fg, &attr.bg)
    }

    /// Apply `updates` from `session` to every pane showing it.
    pub fn apply(&self, id: SessionId, session: &Session, wm: &mut WindowManager, updates: &[ViewUpdate]) {
        let text_mode = session.is_normal_mode() || session.is_finished();
        for update in updates {
            match update {
                ViewUpdate::ScrollUp { row, count, clear } => {
                    if text_mode {
                        continue;
                    }
                    let clear = self.resolve(clear);
                    for pane in wm.showing_mut(id) {
                        pane.delete_lines(*row, *count, clear);
                    }
                }
                ViewUpdate::Cursor { pos, visible } => {
                    if text_mode {
                        continue;
                    }
                    for pane in wm.showing_mut(id) {
                        pane.position_cursor(*pos);
                        pane.cursor_visible = *visible;
                    }
                }
                ViewUpdate::Resize { rows, cols } => {
                    tracing::debug!("Job resized '{}' to {}x{}", session.name(), cols, rows);
                    for pane in wm.showing_mut(id) {
                        pane.resize(*cols, *rows);
                    }
                }
                ViewUpdate::TextChanged { last_line } => {
                    for pane in wm.showing_mut(id) {
                        if text_mode && !session.is_normal_mode() {
                            // finished: follow the end of the text
                            pane.cursor_line = *last_line;
                            pane.scroll_to_cursor_line();
                        }
                        pane.needs_full |= text_mode;
                    }
                }
                ViewUpdate::NormalMode { line, col, top_line } => {
                    for pane in wm.showing_mut(id) {
                        pane.top_line = *top_line;
                        pane.cursor_line = *line;
                        pane.scroll_to_cursor_line();
                        let row = pane.cursor_line.saturating_sub(pane.top_line);
                        pane.position_cursor(Pos::new(row as u16, *col));
                        pane.needs_full = true;
                    }
                }
                ViewUpdate::Repaint => {
                    if text_mode {
                        for pane in wm.showing_mut(id) {
                            pane.needs_full = true;
                        }
                    }
                }
                ViewUpdate::CursorStyle | ViewUpdate::Title => {}
            }
        }
    }

    /// Size the session to the smallest pane showing it, per unpinned axis.
    /// Returns the updates of the resize, `None` when the size was kept.
    pub fn negotiate_size(
        &self,
        id: SessionId,
        session: &mut Session,
        wm: &WindowManager,
    ) -> Option<Vec<ViewUpdate>> {
        if session.is_finished() {
            return None;
        }
        let panes: Vec<&Pane> = wm.showing(id).into_iter().filter_map(|p| wm.get(p)).collect();
        let (rows, cols) = session.size();
        let (rows_fixed, cols_fixed) = session.fixed();
        let differs = panes
            .iter()
            .any(|p| (!rows_fixed && p.height != rows) || (!cols_fixed && p.width != cols));
        if !differs {
            return None;
        }
        let (Some(min_rows), Some(min_cols)) = (
            panes.iter().map(|p| p.height).min(),
            panes.iter().map(|p| p.width).min(),
        ) else {
            return None;
        };
        let new_rows = if rows_fixed { rows } else { min_rows };
        let new_cols = if cols_fixed { cols } else { min_cols };
        if (new_rows, new_cols) == (rows, cols) || new_rows == 0 || new_cols == 0 {
            return None;
        }
        tracing::info!("Resizing terminal '{}' to {} lines", session.name(), new_rows);
        Some(session.set_size(new_rows, new_cols))
    }

    /// Negotiate the size and repaint every pane showing the session. The
    /// dirty range is reset afterwards.
    pub fn update_session(&self, id: SessionId, session: &mut Session, wm: &mut WindowManager) {
        if let Some(updates) = self.negotiate_size(id, session, wm) {
            for pane in wm.showing_mut(id) {
                pane.needs_full = true;
            }
            self.apply(id, session, wm, &updates);
        }
        let text_mode = session.is_normal_mode() || session.is_finished();
        let range = session.dirty.take();
        for pane in wm.showing_mut(id) {
            if text_mode {
                if pane.needs_full {
                    self.paint_text(session, pane);
                }
            } else {
                self.paint_live(session, pane, range);
            }
            pane.needs_full = false;
        }
    }

    fn paint_live(&self, session: &Session, pane: &mut Pane, range: Option<(u16, u16)>) {
        let Some(engine) = session.engine() else {
            return;
        };
        let (rows, cols) = engine.size();
        let default = self.resolve(session.default_attr());

        for row in 0..pane.height {
            let dirty = range.is_some_and(|(start, end)| row >= start && row < end);
            if !(pane.needs_full || dirty) {
                continue;
            }
            if row >= rows {
                pane.clear_row_from(row, 0, default);
                continue;
            }
            let mut col = 0;
            let width = pane.width.min(cols);
            while col < width {
                let Some(cell) = engine.cell(row, col) else {
                    break;
                };
                if cell.is_continuation() {
                    col += 1;
                    continue;
                }
                let text = if cell.chars.is_empty() { " " } else { cell.chars.as_str() };
                let attr = self.colors.cell_to_attr(cell.flags, &cell.fg, &cell.bg);
                let next = pane.put_glyph(row, col, text, attr);
                col = next.max(col + cell.width.max(1) as u16);
            }
            pane.clear_row_from(row, col, default);
        }
    }

    /// Paint from the text lines, attributes from history.
    fn paint_text(&self, session: &Session, pane: &mut Pane) {
        let default = self.resolve(session.default_attr());
        for row in 0..pane.height {
            let lnum = pane.top_line + row as usize;
            let Some(text) = session.text.line(lnum) else {
                pane.clear_row_from(row, 0, default);
                continue;
            };
            let mut col = 0;
            for glyph in glyphs(text) {
                if col >= pane.width {
                    break;
                }
                let attr = self.resolve(&session.get_attr(lnum, col as usize));
                col = pane.put_glyph(row, col, glyph, attr);
            }
            // past the text the line fill shows
            let fill = self.resolve(&session.get_attr(lnum, col as usize));
            pane.clear_row_from(row, col, fill);
        }
    }
}

/// The host terminal
pub struct Screen {
    /// Whether the terminal has been initialized
    initialized: bool,
    /// Cursor style last sent; `None` until something was sent
    last_cursor: Option<CursorStyle>,
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

impl Screen {
    pub fn new() -> Self {
        Self {
            initialized: false,
            last_cursor: None,
        }
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            crossterm::event::EnableMouseCapture,
            crossterm::event::EnableBracketedPaste,
            crossterm::event::EnableFocusChange,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        stdout.flush()?;
        self.initialized = true;
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        if self.last_cursor.take().is_some() {
            let _ = execute!(stdout, SetCursorStyle::DefaultUserShape, Print("\x1b]112\x07"));
        }
        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            crossterm::event::DisableFocusChange,
            crossterm::event::DisableBracketedPaste,
            crossterm::event::DisableMouseCapture,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();
        terminal::disable_raw_mode()?;
        Ok(())
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Returns the style to send when `props` differ from what was sent last.
    pub fn cursor_style_change(&mut self, props: &CursorProps) -> Option<CursorStyle> {
        let wanted = CursorStyle::from(props);
        if self.last_cursor.as_ref() == Some(&wanted) {
            return None;
        }
        self.last_cursor = Some(wanted.clone());
        Some(wanted)
    }

    /// Draw every pane, the status line of the focused pane on `status_row`,
    /// and the cursor.
    pub fn draw<W: Write>(
        &mut self,
        out: &mut W,
        wm: &WindowManager,
        registry: &mut Registry,
        status_row: Option<u16>,
    ) -> io::Result<()> {
        // synchronized update
        write!(out, "\x1b[?2026h")?;
        queue!(out, Hide)?;

        for pane in wm.panes() {
            draw_pane(out, pane)?;
        }

        let focused = wm.focused();
        if let (Some(row), Some(pane)) = (status_row, focused) {
            let status = registry
                .get_mut(pane.session)
                .map(|s| s.status_text())
                .unwrap_or_default();
            queue!(out, MoveTo(0, row), ResetColor, SetAttribute(Attribute::Reset))?;
            queue!(out, SetAttribute(Attribute::Reverse))?;
            let width = wm.width as usize;
            let line: String = status.chars().take(width).collect();
            write!(out, "{:<width$}", line, width = width)?;
            queue!(out, SetAttribute(Attribute::Reset))?;
        }

        if let Some(pane) = focused {
            let active = registry.active() == Some(pane.session);
            if let Some(session) = registry.get(pane.session) {
                let text_mode = session.is_normal_mode() || session.is_finished();
                let visible = text_mode || (pane.cursor_visible && session.cursor_props().visible);
                if active && !text_mode {
                    if let Some(style) = self.cursor_style_change(session.cursor_props()) {
                        apply_cursor_style(out, &style)?;
                    }
                }
                if visible {
                    queue!(
                        out,
                        MoveTo(pane.x + pane.cursor.col, pane.y + pane.cursor.row),
                        Show
                    )?;
                }
            }
        }

        write!(out, "\x1b[?2026l")?;
        out.flush()
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn draw_pane<W: Write>(out: &mut W, pane: &Pane) -> io::Result<()> {
    let mut line = String::with_capacity(256);
    for (row, cells) in pane.rows().iter().enumerate() {
        queue!(out, MoveTo(pane.x, pane.y + row as u16))?;
        let mut current: Option<DisplayAttr> = None;
        line.clear();
        for cell in cells {
            if cell.text.is_empty() {
                // right half of a wide glyph
                continue;
            }
            if current != Some(cell.attr) {
                if let Some(attr) = current {
                    apply_attrs(out, &attr)?;
                    write!(out, "{}", line)?;
                    line.clear();
                }
                current = Some(cell.attr);
            }
            line.push_str(&cell.text);
        }
        if let Some(attr) = current {
            apply_attrs(out, &attr)?;
            write!(out, "{}", line)?;
        }
    }
    queue!(out, ResetColor, SetAttribute(Attribute::Reset))
}

/// Apply cell attributes
fn apply_attrs<W: Write>(out: &mut W, attr: &DisplayAttr) -> io::Result<()> {
    // Reset first
    queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;

    if attr.flags.contains(StyleFlags::BOLD) {
        queue!(out, SetAttribute(Attribute::Bold))?;
    }
    if attr.flags.contains(StyleFlags::ITALIC) {
        queue!(out, SetAttribute(Attribute::Italic))?;
    }
    if attr.flags.contains(StyleFlags::UNDERLINE) {
        queue!(out, SetAttribute(Attribute::Underlined))?;
    }
    if attr.flags.contains(StyleFlags::INVERSE) {
        queue!(out, SetAttribute(Attribute::Reverse))?;
    }
    if attr.flags.contains(StyleFlags::STRIKETHROUGH) {
        queue!(out, SetAttribute(Attribute::CrossedOut))?;
    }

    let fg = attr.fg_crossterm();
    if fg != crossterm::style::Color::Reset {
        queue!(out, SetForegroundColor(fg))?;
    }
    let bg = attr.bg_crossterm();
    if bg != crossterm::style::Color::Reset {
        queue!(out, SetBackgroundColor(bg))?;
    }
    Ok(())
}

fn apply_cursor_style<W: Write>(out: &mut W, style: &CursorStyle) -> io::Result<()> {
    let shape = match (style.shape, style.blink) {
        (CursorShape::Block, true) => SetCursorStyle::BlinkingBlock,
        (CursorShape::Block, false) => SetCursorStyle::SteadyBlock,
        (CursorShape::Underline, true) => SetCursorStyle::BlinkingUnderScore,
        (CursorShape::Underline, false) => SetCursorStyle::SteadyUnderScore,
        (CursorShape::Bar, true) => SetCursorStyle::BlinkingBar,
        (CursorShape::Bar, false) => SetCursorStyle::SteadyBar,
    };
    queue!(out, shape)?;
    match &style.color {
        Some(color) => write!(out, "\x1b]12;{}\x07", color),
        None => write!(out, "\x1b]112\x07"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{TermColor, INDEX_DEFAULT};
    use crate::config::SessionOptions;
    use crate::core::term::VtEngine;

    fn session(rows: u16, cols: u16) -> Session {
        let engine = VtEngine::new(
            rows,
            cols,
            TermColor::new(255, 255, 255, INDEX_DEFAULT),
            TermColor::new(0, 0, 0, INDEX_DEFAULT),
        );
        Session::new("!test", &SessionOptions::default(), Box::new(engine))
    }

    fn setup(rows: u16, cols: u16) -> (Registry, WindowManager, SessionId) {
        let mut registry = Registry::new();
        let id = registry.insert(session(rows, cols));
        let wm = WindowManager::new(cols, rows);
        (registry, wm, id)
    }

    fn feed(coord: &Coordinator, registry: &mut Registry, wm: &mut WindowManager, id: SessionId, bytes: &[u8]) {
        let session = registry.get_mut(id).unwrap();
        let updates = session.write_job_output(bytes);
        coord.apply(id, session, wm, &updates);
        coord.update_session(id, session, wm);
    }

    #[test]
    fn test_repaint_dirty_rows() {
        let (mut registry, mut wm, id) = setup(3, 10);
        let pane = wm.open_full(id);
        let coord = Coordinator::new(ColorContext::default());

        feed(&coord, &mut registry, &mut wm, id, b"hello\r\nworld");
        let pane = wm.get(pane).unwrap();
        assert_eq!(pane.row_text(0), "hello     ");
        assert_eq!(pane.row_text(1), "world     ");
        assert_eq!(pane.cursor, Pos::new(1, 5));
        assert!(registry.get(id).unwrap().dirty.is_empty());
    }

    #[test]
    fn test_scroll_moves_pane_lines() {
        let (mut registry, mut wm, id) = setup(2, 4);
        let pane = wm.open_full(id);
        let coord = Coordinator::new(ColorContext::default());

        feed(&coord, &mut registry, &mut wm, id, b"a\r\nb\r\nc");
        let pane = wm.get(pane).unwrap();
        assert_eq!(pane.row_text(0), "b   ");
        assert_eq!(pane.row_text(1), "c   ");
    }

    #[test]
    fn test_size_follows_smallest_pane() {
        let (mut registry, mut wm, id) = setup(24, 80);
        wm.open(id, 0, 0, 80, 24);
        wm.open(id, 0, 0, 60, 30);
        let coord = Coordinator::new(ColorContext::default());

        let session = registry.get_mut(id).unwrap();
        assert!(coord.negotiate_size(id, session, &wm).is_some());
        assert_eq!(session.size(), (24, 60));
        assert!(coord.negotiate_size(id, session, &wm).is_none());
    }

    #[test]
    fn test_host_shrink_repaints_and_moves_cursor() {
        let (mut registry, mut wm, id) = setup(4, 10);
        let pane = wm.open_full(id);
        let coord = Coordinator::new(ColorContext::default());
        feed(&coord, &mut registry, &mut wm, id, b"abc\r\ndef\r\nghi\r\njkl");

        wm.resize(10, 2);
        let session = registry.get_mut(id).unwrap();
        coord.update_session(id, session, &mut wm);

        assert_eq!(session.size(), (2, 10));
        assert!(session.dirty.is_empty());
        let pane = wm.get(pane).unwrap();
        assert_eq!(pane.row_text(0), "abc       ");
        assert_eq!(pane.row_text(1), "def       ");
        assert_eq!(pane.cursor, Pos::new(1, 3));
    }

    #[test]
    fn test_fixed_axis_is_kept() {
        let (mut registry, mut wm, id) = setup(24, 80);
        wm.open(id, 0, 0, 40, 10);
        let coord = Coordinator::new(ColorContext::default());

        let session = registry.get_mut(id).unwrap();
        session.set_fixed(true, false);
        coord.negotiate_size(id, session, &wm);
        assert_eq!(session.size(), (24, 40));
    }

    #[test]
    fn test_job_resize_resizes_panes() {
        let (mut registry, mut wm, id) = setup(5, 10);
        let pane = wm.open_full(id);
        let coord = Coordinator::new(ColorContext::default());

        let session = registry.get_mut(id).unwrap();
        let updates = session.write_job_output(b"\x1b[8;4;12t");
        coord.apply(id, session, &mut wm, &updates);
        assert_eq!(wm.get(pane).map(|p| (p.width, p.height)), Some((12, 4)));
    }

    #[test]
    fn test_normal_mode_paints_text() {
        let (mut registry, mut wm, id) = setup(3, 8);
        let pane = wm.open_full(id);
        let coord = Coordinator::new(ColorContext::default());
        feed(&coord, &mut registry, &mut wm, id, b"\x1b[31mred\x1b[0m ok");

        let session = registry.get_mut(id).unwrap();
        let updates = session.enter_normal_mode().unwrap();
        coord.apply(id, session, &mut wm, &updates);
        coord.update_session(id, session, &mut wm);

        let pane = wm.get(pane).unwrap();
        assert_eq!(pane.row_text(0), "red ok  ");
        let red = pane.cell(0, 0).unwrap().attr;
        let plain = pane.cell(0, 4).unwrap().attr;
        assert_ne!(red, plain);
        assert_eq!(pane.cursor, Pos::new(0, 6));
    }

    #[test]
    fn test_cursor_style_sent_once() {
        let mut screen = Screen::new();
        let props = CursorProps::default();
        assert!(screen.cursor_style_change(&props).is_some());
        assert!(screen.cursor_style_change(&props).is_none());

        let blinking = CursorProps {
            blink: true,
            ..CursorProps::default()
        };
        assert_eq!(
            screen.cursor_style_change(&blinking).map(|s| s.blink),
            Some(true)
        );
    }

    #[test]
    fn test_draw_writes_pane_text() {
        let (mut registry, mut wm, id) = setup(2, 6);
        wm.open_full(id);
        registry.set_active(Some(id));
        let coord = Coordinator::new(ColorContext::default());
        feed(&coord, &mut registry, &mut wm, id, b"hi");

        let mut screen = Screen::new();
        let mut out = Vec::new();
        screen.draw(&mut out, &wm, &mut registry, None).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("hi"));
    }
}
