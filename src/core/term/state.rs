//! Terminal state management
//!
//! This module defines the screen grids, cursor state and modes. Every change
//! that the host needs to know about is queued as an [`EngineEvent`]:
//! - rows that change are collected into a damage range, flushed per feed
//! - scrolling reports a moved rectangle, and on the primary screen the row
//!   leaving the top is handed out as a pushed line
//! - mode switches that change the cursor or the screen are reported as
//!   properties

use unicode_width::UnicodeWidthChar;

use super::input::{MouseEncoding, MouseTracking};
use super::{EngineEvent, Pos, Property, Rect, ScreenCell};
use crate::color::{index_to_rgb, StyleFlags, TermColor, INDEX_DEFAULT};

/// Terminal state holding all screen data
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    primary: Vec<Row>,
    alternate: Vec<Row>,
    pub using_alternate: bool,
    primary_cursor: CursorState,
    alternate_cursor: CursorState,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    pub title: String,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    pub scroll_region: (u16, u16),
    pub cursor_visible: bool,
    pub cursor_blink: bool,
    pub cursor_shape: CursorShape,
    /// Colors used for `Color::Default`
    pub default_fg: TermColor,
    pub default_bg: TermColor,
    events: Vec<EngineEvent>,
    /// Dirty rows [start, end)
    damage: Option<(u16, u16)>,
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16, default_fg: TermColor, default_bg: TermColor) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            primary: (0..rows).map(|_| Row::new(cols)).collect(),
            alternate: (0..rows).map(|_| Row::new(cols)).collect(),
            using_alternate: false,
            primary_cursor: CursorState::default(),
            alternate_cursor: CursorState::default(),
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            title: String::new(),
            scroll_region: (0, rows - 1),
            cursor_visible: true,
            cursor_blink: false,
            cursor_shape: CursorShape::Block,
            default_fg,
            default_bg,
            events: Vec::new(),
            damage: None,
        }
    }

    /// Full reset (RIS), keeping size and default colors
    pub fn reset(&mut self) {
        let was_alternate = self.using_alternate;
        *self = Self::new(self.cols, self.rows, self.default_fg, self.default_bg);
        if was_alternate {
            self.set_property(Property::AltScreen(false));
        }
        self.mark_all_dirty();
    }

    fn grid(&self) -> &Vec<Row> {
        if self.using_alternate {
            &self.alternate
        } else {
            &self.primary
        }
    }

    fn grid_mut(&mut self) -> &mut Vec<Row> {
        if self.using_alternate {
            &mut self.alternate
        } else {
            &mut self.primary
        }
    }

    pub fn active_cursor(&self) -> &CursorState {
        if self.using_alternate {
            &self.alternate_cursor
        } else {
            &self.primary_cursor
        }
    }

    pub fn active_cursor_mut(&mut self) -> &mut CursorState {
        if self.using_alternate {
            &mut self.alternate_cursor
        } else {
            &mut self.primary_cursor
        }
    }

    /// Cursor position, clamped to the screen
    pub fn cursor_pos(&self) -> Pos {
        let cursor = self.active_cursor();
        Pos::new(
            cursor.row.min(self.rows - 1),
            cursor.col.min(self.cols - 1),
        )
    }

    /// Resize the terminal
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        for grid in [&mut self.primary, &mut self.alternate] {
            grid.resize_with(rows as usize, || Row::new(cols));
            for row in grid.iter_mut() {
                row.resize(cols);
            }
        }
        self.cols = cols;
        self.rows = rows;
        self.scroll_region = (0, rows - 1);

        let max_col = cols - 1;
        let max_row = rows - 1;
        for cursor in [&mut self.primary_cursor, &mut self.alternate_cursor] {
            cursor.col = cursor.col.min(max_col);
            cursor.row = cursor.row.min(max_row);
        }

        self.events.push(EngineEvent::Resize { rows, cols });
        self.mark_all_dirty();
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;

        if width == 0 {
            // Combining character - append to previous cell
            self.append_to_previous_cell(ch);
            return;
        }

        let cursor_col = self.active_cursor().col;
        let wraps = cursor_col >= self.cols || (width == 2 && cursor_col + 1 >= self.cols);
        if wraps {
            if self.modes.auto_wrap {
                let row = self.active_cursor().row as usize;
                self.grid_mut()[row].wrapped = true;
                self.active_cursor_mut().col = 0;
                self.linefeed();
            } else {
                self.active_cursor_mut().col = self.cols.saturating_sub(width);
            }
        }

        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        if col >= self.cols as usize {
            return;
        }

        self.handle_wide_char_overwrite(row, col);

        let attrs = self.current_attrs;
        let cols = self.cols as usize;
        let grid = self.grid_mut();
        grid[row].cells[col] = Cell {
            grapheme: ch.to_string(),
            width: width as u8,
            attrs,
        };
        if width == 2 && col + 1 < cols {
            grid[row].cells[col + 1] = Cell::continuation(&attrs);
        }

        self.mark_dirty(row as u16);
        self.active_cursor_mut().col += width;
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        if col == 0 {
            return;
        }
        let grid = self.grid_mut();
        let mut target = (col - 1).min(grid[row].cells.len() - 1);
        if grid[row].cells[target].is_continuation() && target > 0 {
            target -= 1;
        }
        grid[row].cells[target].grapheme.push(ch);
        self.mark_dirty(row as u16);
    }

    fn handle_wide_char_overwrite(&mut self, row: usize, col: usize) {
        let attrs = self.current_attrs;
        let cols = self.cols as usize;
        let cells = &mut self.grid_mut()[row].cells;

        // Right half of a wide char
        if col > 0 && cells[col].is_continuation() {
            cells[col - 1] = Cell::blank(&attrs);
        }
        // Left half of a wide char
        if cells[col].width == 2 && col + 1 < cols {
            cells[col + 1] = Cell::blank(&attrs);
        }
    }

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        self.active_cursor_mut().col = 0;
    }

    /// Line feed - move cursor down, scroll if needed
    pub fn linefeed(&mut self) {
        let cursor_row = self.active_cursor().row;
        let scroll_bottom = self.scroll_region.1;

        if cursor_row == scroll_bottom {
            self.scroll_up(1);
        } else if cursor_row < self.rows - 1 {
            self.active_cursor_mut().row += 1;
        }
        if self.modes.linefeed_newline {
            self.carriage_return();
        }
    }

    /// Backspace - move cursor left
    pub fn backspace(&mut self) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.min(cols - 1).saturating_sub(1);
    }

    /// Horizontal tab, stops every 8 columns
    pub fn horizontal_tab(&mut self) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = (((cursor.col / 8) + 1) * 8).min(cols - 1);
    }

    /// Scroll the region up by n lines
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let height = bottom - top + 1;
        let n = n.min(height);
        if n == 0 {
            return;
        }
        let cols = self.cols;
        let push = !self.using_alternate && top == 0;

        for _ in 0..n {
            let removed = self.grid_mut().remove(top as usize);
            if push {
                let cells = self.row_cells(&removed);
                self.events.push(EngineEvent::PushLine(cells));
            }
            self.grid_mut().insert(bottom as usize, Row::new(cols));
        }

        if n < height {
            self.events.push(EngineEvent::MoveRect {
                dest: Rect::rows(top, bottom + 1 - n, cols),
                src: Rect::rows(top + n, bottom + 1, cols),
            });
        }
        self.mark_rows_dirty(bottom + 1 - n, bottom + 1);
    }

    /// Scroll the region down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let height = bottom - top + 1;
        let n = n.min(height);
        if n == 0 {
            return;
        }
        let cols = self.cols;

        for _ in 0..n {
            self.grid_mut().remove(bottom as usize);
            self.grid_mut().insert(top as usize, Row::new(cols));
        }

        if n < height {
            self.events.push(EngineEvent::MoveRect {
                dest: Rect::rows(top + n, bottom + 1, cols),
                src: Rect::rows(top, bottom + 1 - n, cols),
            });
        }
        self.mark_rows_dirty(top, top + n);
    }

    pub fn cursor_up(&mut self, n: u16) {
        let cursor = self.active_cursor_mut();
        cursor.row = cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        let rows = self.rows;
        let cursor = self.active_cursor_mut();
        cursor.row = cursor.row.saturating_add(n).min(rows - 1);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.saturating_add(n).min(cols - 1);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.min(cols - 1).saturating_sub(n);
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        let rows = self.rows;
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.row = row.saturating_sub(1).min(rows - 1);
        cursor.col = col.saturating_sub(1).min(cols - 1);
    }

    pub fn set_cursor_col(&mut self, col: u16) {
        let cols = self.cols;
        self.active_cursor_mut().col = col.saturating_sub(1).min(cols - 1);
    }

    pub fn set_cursor_row(&mut self, row: u16) {
        let rows = self.rows;
        self.active_cursor_mut().row = row.saturating_sub(1).min(rows - 1);
    }

    /// Erase in display
    pub fn erase_in_display(&mut self, mode: u16) {
        let cursor_row = self.active_cursor().row;
        let attrs = self.current_attrs;
        match mode {
            0 => {
                self.erase_in_line(0);
                for r in (cursor_row + 1)..self.rows {
                    self.grid_mut()[r as usize].clear(&attrs);
                }
                self.mark_rows_dirty(cursor_row, self.rows);
            }
            1 => {
                for r in 0..cursor_row {
                    self.grid_mut()[r as usize].clear(&attrs);
                }
                self.erase_in_line(1);
                self.mark_rows_dirty(0, cursor_row + 1);
            }
            2 | 3 => {
                for r in 0..self.rows {
                    self.grid_mut()[r as usize].clear(&attrs);
                }
                self.mark_all_dirty();
            }
            _ => {}
        }
    }

    /// Erase in line
    pub fn erase_in_line(&mut self, mode: u16) {
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col.min(self.cols - 1) as usize)
        };
        let attrs = self.current_attrs;
        let cells = &mut self.grid_mut()[row].cells;
        let len = cells.len();

        match mode {
            0 => cells[col..].iter_mut().for_each(|c| c.clear(&attrs)),
            1 => cells[..=col.min(len - 1)].iter_mut().for_each(|c| c.clear(&attrs)),
            2 => cells.iter_mut().for_each(|c| c.clear(&attrs)),
            _ => return,
        }
        self.mark_dirty(row as u16);
    }

    /// Insert lines at cursor position, within the scroll region
    pub fn insert_lines(&mut self, n: u16) {
        let cursor_row = self.active_cursor().row;
        let (top, bottom) = self.scroll_region;
        if cursor_row < top || cursor_row > bottom {
            return;
        }
        let cols = self.cols;
        let n = n.min(bottom - cursor_row + 1);
        for _ in 0..n {
            self.grid_mut().remove(bottom as usize);
            self.grid_mut().insert(cursor_row as usize, Row::new(cols));
        }
        self.mark_rows_dirty(cursor_row, bottom + 1);
    }

    /// Delete lines at cursor position, within the scroll region
    pub fn delete_lines(&mut self, n: u16) {
        let cursor_row = self.active_cursor().row;
        let (top, bottom) = self.scroll_region;
        if cursor_row < top || cursor_row > bottom {
            return;
        }
        let cols = self.cols;
        let n = n.min(bottom - cursor_row + 1);
        for _ in 0..n {
            self.grid_mut().remove(cursor_row as usize);
            self.grid_mut().insert(bottom as usize, Row::new(cols));
        }
        self.mark_rows_dirty(cursor_row, bottom + 1);
    }

    /// ICH - shift the rest of the line right
    pub fn insert_chars(&mut self, n: u16) {
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let cells = &mut self.grid_mut()[row].cells;
        if col >= cells.len() {
            return;
        }
        for _ in 0..n.min(cells.len() as u16) {
            cells.pop();
            cells.insert(col, Cell::default());
        }
        self.mark_dirty(row as u16);
    }

    /// DCH - shift the rest of the line left
    pub fn delete_chars(&mut self, n: u16) {
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let cells = &mut self.grid_mut()[row].cells;
        if col >= cells.len() {
            return;
        }
        for _ in 0..n.min(cells.len() as u16) {
            cells.remove(col);
            cells.push(Cell::default());
        }
        self.mark_dirty(row as u16);
    }

    /// ECH - blank n cells from the cursor
    pub fn erase_chars(&mut self, n: u16) {
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let attrs = self.current_attrs;
        let cells = &mut self.grid_mut()[row].cells;
        for cell in cells.iter_mut().skip(col).take(n as usize) {
            cell.clear(&attrs);
        }
        self.mark_dirty(row as u16);
    }

    /// Set scroll region (1-indexed, inclusive)
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let rows = self.rows;
        let top = top.saturating_sub(1).min(rows - 1);
        let bottom = bottom.saturating_sub(1).min(rows - 1);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    pub fn save_cursor(&mut self) {
        let (col, row) = {
            let cursor = self.active_cursor();
            (cursor.col, cursor.row)
        };
        let attrs = self.current_attrs;
        self.active_cursor_mut().saved = Some(SavedCursor { col, row, attrs });
    }

    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.active_cursor().saved {
            let cursor = self.active_cursor_mut();
            cursor.col = saved.col;
            cursor.row = saved.row;
            self.current_attrs = saved.attrs;
        }
    }

    /// Reverse index - cursor up, scroll if at top
    pub fn reverse_index(&mut self) {
        if self.active_cursor().row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    /// Index - cursor down, scroll if at bottom
    pub fn index(&mut self) {
        let lnm = self.modes.linefeed_newline;
        self.modes.linefeed_newline = false;
        self.linefeed();
        self.modes.linefeed_newline = lnm;
    }

    fn switch_screen(&mut self, alternate: bool) {
        if self.using_alternate == alternate {
            return;
        }
        if alternate {
            let cols = self.cols;
            self.alternate = (0..self.rows).map(|_| Row::new(cols)).collect();
        }
        self.using_alternate = alternate;
        self.set_property(Property::AltScreen(alternate));
        self.mark_all_dirty();
    }

    /// Set private mode
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => self.modes.auto_wrap = enable,
            9 | 1000 => self.set_mouse_tracking(MouseTracking::Click, enable),
            1002 => self.set_mouse_tracking(MouseTracking::Drag, enable),
            1003 => self.set_mouse_tracking(MouseTracking::Move, enable),
            1006 => self.set_mouse_encoding(MouseEncoding::Sgr, enable),
            1015 => self.set_mouse_encoding(MouseEncoding::Urxvt, enable),
            12 => {
                if self.cursor_blink != enable {
                    self.cursor_blink = enable;
                    self.set_property(Property::CursorBlink(enable));
                }
            }
            25 => {
                if self.cursor_visible != enable {
                    self.cursor_visible = enable;
                    self.set_property(Property::CursorVisible(enable));
                }
            }
            47 | 1047 => self.switch_screen(enable),
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.save_cursor();
                    self.alternate_cursor = CursorState::default();
                    self.switch_screen(true);
                } else {
                    self.switch_screen(false);
                    self.restore_cursor();
                }
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => {} // Ignore unknown modes
        }
    }

    fn set_mouse_tracking(&mut self, tracking: MouseTracking, enable: bool) {
        self.modes.mouse_tracking = if enable { tracking } else { MouseTracking::Off };
    }

    fn set_mouse_encoding(&mut self, encoding: MouseEncoding, enable: bool) {
        if enable {
            self.modes.mouse_encoding = encoding;
        } else if self.modes.mouse_encoding == encoding {
            self.modes.mouse_encoding = MouseEncoding::X10;
        }
    }

    /// DECSCUSR
    pub fn set_cursor_style(&mut self, param: u16) {
        let (shape, blink) = CursorShape::from_decscusr(param);
        if shape != self.cursor_shape {
            self.cursor_shape = shape;
            self.set_property(Property::CursorShape(shape));
        }
        if blink != self.cursor_blink {
            self.cursor_blink = blink;
            self.set_property(Property::CursorBlink(blink));
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
        self.set_property(Property::Title(title.to_string()));
    }

    pub fn set_property(&mut self, prop: Property) {
        self.events.push(EngineEvent::SetProperty(prop));
    }

    /// Report a moved cursor; called by the engine once per feed
    pub fn push_event(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn resolve_color(&self, color: Color, foreground: bool) -> TermColor {
        match color {
            Color::Default => {
                let base = if foreground {
                    self.default_fg
                } else {
                    self.default_bg
                };
                TermColor {
                    index: INDEX_DEFAULT,
                    ..base
                }
            }
            Color::Indexed(n) => index_to_rgb(n),
            Color::Rgb(r, g, b) => TermColor::rgb(r, g, b),
        }
    }

    fn screen_cell(&self, cell: &Cell) -> ScreenCell {
        ScreenCell {
            chars: cell.grapheme.clone(),
            width: cell.width,
            flags: cell.attrs.flags,
            fg: self.resolve_color(cell.attrs.fg, true),
            bg: self.resolve_color(cell.attrs.bg, false),
        }
    }

    fn row_cells(&self, row: &Row) -> Vec<ScreenCell> {
        row.cells.iter().map(|c| self.screen_cell(c)).collect()
    }

    /// Cell at a screen position of the active screen
    pub fn cell(&self, row: u16, col: u16) -> Option<ScreenCell> {
        self.grid()
            .get(row as usize)
            .and_then(|r| r.cells.get(col as usize))
            .map(|c| self.screen_cell(c))
    }

    /// Row text with trailing blanks removed
    pub fn row_text(&self, row: u16) -> Option<String> {
        let row = self.grid().get(row as usize)?;
        let mut text = String::new();
        for cell in row.cells.iter().filter(|c| !c.is_continuation()) {
            text.push_str(cell.display_char());
        }
        let trimmed = text.trim_end_matches(' ').len();
        text.truncate(trimmed);
        Some(text)
    }

    pub fn mark_dirty(&mut self, row: u16) {
        self.mark_rows_dirty(row, row + 1);
    }

    pub fn mark_rows_dirty(&mut self, start: u16, end: u16) {
        let end = end.min(self.rows);
        if start >= end {
            return;
        }
        self.damage = Some(match self.damage {
            Some((s, e)) => (s.min(start), e.max(end)),
            None => (start, end),
        });
    }

    pub fn mark_all_dirty(&mut self) {
        self.damage = Some((0, self.rows));
    }

    /// Queue the pending damage as an event
    pub fn flush_damage(&mut self) {
        if let Some((start, end)) = self.damage.take() {
            let cols = self.cols;
            self.events.push(EngineEvent::Damage(Rect::rows(start, end, cols)));
        }
    }

    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }
}

/// A single row
#[derive(Clone)]
pub struct Row {
    pub cells: Vec<Cell>,
    pub wrapped: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
        }
    }

    pub fn resize(&mut self, new_cols: u16) {
        self.cells.resize(new_cols as usize, Cell::default());
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        for cell in &mut self.cells {
            cell.clear(attrs);
        }
        self.wrapped = false;
    }
}

/// A single cell
#[derive(Clone)]
pub struct Cell {
    pub grapheme: String,
    pub width: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    /// Erased cell keeps only the background of `attrs`
    fn blank(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs {
                bg: attrs.bg,
                ..CellAttrs::default()
            },
        }
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        *self = Self::blank(attrs);
    }

    pub fn continuation(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            attrs: *attrs,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// Get the display character (space if empty)
    pub fn display_char(&self) -> &str {
        if self.grapheme.is_empty() {
            " "
        } else {
            &self.grapheme
        }
    }
}

/// Cell attributes
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: StyleFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Color as selected by SGR
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// Cursor shape
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorShape {
    #[default]
    Block,
    Underline,
    Bar,
}

impl CursorShape {
    /// Shape number reported to the host: 1 block, 2 underline, 3 bar
    pub fn number(&self) -> u8 {
        match self {
            CursorShape::Block => 1,
            CursorShape::Underline => 2,
            CursorShape::Bar => 3,
        }
    }

    /// Convert to DECSCUSR parameter (for \x1b[N q sequence)
    pub fn to_decscusr(&self, blink: bool) -> u8 {
        let base = match self {
            CursorShape::Block => 1,
            CursorShape::Underline => 3,
            CursorShape::Bar => 5,
        };
        if blink {
            base
        } else {
            base + 1
        }
    }

    /// Shape and blink from a DECSCUSR parameter
    pub fn from_decscusr(n: u16) -> (Self, bool) {
        match n {
            2 => (CursorShape::Block, false),
            3 => (CursorShape::Underline, true),
            4 => (CursorShape::Underline, false),
            5 => (CursorShape::Bar, true),
            6 => (CursorShape::Bar, false),
            _ => (CursorShape::Block, true),
        }
    }
}

/// Cursor state
#[derive(Clone, Default)]
pub struct CursorState {
    pub col: u16,
    pub row: u16,
    pub saved: Option<SavedCursor>,
}

/// Saved cursor state
#[derive(Clone, Copy)]
pub struct SavedCursor {
    pub col: u16,
    pub row: u16,
    pub attrs: CellAttrs,
}

/// Terminal modes
#[derive(Clone)]
pub struct TerminalModes {
    pub application_cursor: bool,
    pub application_keypad: bool,
    pub auto_wrap: bool,
    pub insert_mode: bool,
    pub linefeed_newline: bool,
    pub bracketed_paste: bool,
    pub mouse_tracking: MouseTracking,
    pub mouse_encoding: MouseEncoding,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            application_keypad: false,
            auto_wrap: true,
            insert_mode: false,
            linefeed_newline: false,
            bracketed_paste: false,
            mouse_tracking: MouseTracking::Off,
            mouse_encoding: MouseEncoding::X10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(cols: u16, rows: u16) -> TerminalState {
        TerminalState::new(
            cols,
            rows,
            TermColor::new(255, 255, 255, INDEX_DEFAULT),
            TermColor::new(0, 0, 0, INDEX_DEFAULT),
        )
    }

    fn type_str(state: &mut TerminalState, s: &str) {
        for ch in s.chars() {
            state.put_char(ch);
        }
    }

    #[test]
    fn test_scroll_pushes_line() {
        let mut st = state(4, 2);
        type_str(&mut st, "ab");
        st.linefeed();
        st.carriage_return();
        type_str(&mut st, "cd");
        st.take_events();

        st.linefeed();
        let events = st.take_events();
        let pushed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::PushLine(cells) => Some(cells),
                _ => None,
            })
            .collect();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0][0].chars, "a");
        assert_eq!(pushed[0].len(), 4);
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::MoveRect { dest, src } if dest.start_row == 0 && src.start_row == 1
        )));
        assert_eq!(st.row_text(0).as_deref(), Some("cd"));
    }

    #[test]
    fn test_alternate_screen_does_not_push() {
        let mut st = state(4, 2);
        st.set_private_mode(1049, true);
        st.linefeed();
        st.linefeed();
        let events = st.take_events();
        assert!(events.contains(&EngineEvent::SetProperty(Property::AltScreen(true))));
        assert!(!events.iter().any(|e| matches!(e, EngineEvent::PushLine(_))));
    }

    #[test]
    fn test_wide_char() {
        let mut st = state(6, 2);
        type_str(&mut st, "a漢b");
        assert_eq!(st.cell(0, 1).map(|c| c.width), Some(2));
        assert_eq!(st.cell(0, 2).map(|c| c.width), Some(0));
        assert_eq!(st.row_text(0).as_deref(), Some("a漢b"));
        assert_eq!(st.cursor_pos(), Pos::new(0, 4));
    }

    #[test]
    fn test_damage_is_merged() {
        let mut st = state(5, 5);
        st.mark_dirty(3);
        st.mark_dirty(1);
        st.flush_damage();
        assert_eq!(
            st.take_events(),
            vec![EngineEvent::Damage(Rect::rows(1, 4, 5))]
        );
        st.flush_damage();
        assert!(st.take_events().is_empty());
    }

    #[test]
    fn test_default_color_keeps_default_index() {
        let mut st = state(3, 1);
        st.default_fg = index_to_rgb(3);
        let cell = st.cell(0, 0).unwrap();
        assert_eq!(cell.fg.index, INDEX_DEFAULT);
        assert_eq!(cell.fg.r, 224);
    }

    #[test]
    fn test_cursor_style() {
        let mut st = state(3, 1);
        st.set_cursor_style(6);
        assert_eq!(st.cursor_shape, CursorShape::Bar);
        assert!(!st.cursor_blink);
        assert_eq!(CursorShape::Bar.to_decscusr(false), 6);
        assert_eq!(CursorShape::from_decscusr(3), (CursorShape::Underline, true));
    }
}
