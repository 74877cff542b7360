//! Pane - a host window showing one session

use unicode_width::UnicodeWidthStr;

use crate::color::DisplayAttr;
use crate::core::registry::SessionId;
use crate::core::term::Pos;
use crate::ui::keymapper::Area;

/// Unique identifier for a pane
pub type PaneId = u64;

/// One cell of a pane's display buffer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayCell {
    /// Glyph; empty for the right half of a wide glyph
    pub text: String,
    pub attr: DisplayAttr,
}

impl DisplayCell {
    pub fn blank(attr: DisplayAttr) -> Self {
        Self {
            text: " ".to_string(),
            attr,
        }
    }
}

/// A pane showing a session, either the live screen or its text lines
pub struct Pane {
    /// Unique identifier
    pub id: PaneId,
    /// Session shown in the pane
    pub session: SessionId,
    /// Position (column, row) on the host screen
    pub x: u16,
    pub y: u16,
    /// Size (width, height)
    pub width: u16,
    pub height: u16,
    /// Whether this pane is focused
    pub focused: bool,
    grid: Vec<Vec<DisplayCell>>,
    /// Cursor within the pane
    pub cursor: Pos,
    pub cursor_visible: bool,
    /// First text line shown when painting text
    pub top_line: usize,
    /// Cursor line in the text lines
    pub cursor_line: usize,
    /// Repaint every row on the next update
    pub needs_full: bool,
}

impl Pane {
    /// Create a new pane
    pub fn new(id: PaneId, session: SessionId, x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            id,
            session,
            x,
            y,
            width,
            height,
            focused: false,
            grid: vec![vec![DisplayCell::default(); width as usize]; height as usize],
            cursor: Pos::default(),
            cursor_visible: true,
            top_line: 0,
            cursor_line: 0,
            needs_full: true,
        }
    }

    /// Screen area covered by the pane
    pub fn area(&self) -> Area {
        Area {
            row: self.y,
            col: self.x,
            rows: self.height,
            cols: self.width,
        }
    }

    /// Resize the pane; the contents are repainted on the next update
    pub fn resize(&mut self, width: u16, height: u16) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.grid.resize(height as usize, Vec::new());
        for row in &mut self.grid {
            row.resize(width as usize, DisplayCell::default());
        }
        self.position_cursor(self.cursor);
        self.needs_full = true;
    }

    /// Check if a position is inside this pane
    pub fn contains(&self, col: u16, row: u16) -> bool {
        self.area().contains(row, col)
    }

    /// Put the cursor at `pos`, kept inside the pane
    pub fn position_cursor(&mut self, pos: Pos) {
        self.cursor = Pos::new(
            pos.row.min(self.height.saturating_sub(1)),
            pos.col.min(self.width.saturating_sub(1)),
        );
    }

    pub fn cell(&self, row: u16, col: u16) -> Option<&DisplayCell> {
        self.grid.get(row as usize)?.get(col as usize)
    }

    pub fn set_cell(&mut self, row: u16, col: u16, cell: DisplayCell) {
        if let Some(slot) = self.grid.get_mut(row as usize).and_then(|r| r.get_mut(col as usize)) {
            *slot = cell;
        }
    }

    /// Write `text` from column `col`, wide glyphs taking two columns.
    /// Returns the column after the last glyph.
    pub fn put_glyph(&mut self, row: u16, col: u16, text: &str, attr: DisplayAttr) -> u16 {
        let width = UnicodeWidthStr::width(text).clamp(1, 2) as u16;
        if col.saturating_add(width) > self.width {
            // a wide glyph that does not fit
            self.set_cell(row, col, DisplayCell::blank(attr));
            return self.width;
        }
        self.set_cell(
            row,
            col,
            DisplayCell {
                text: text.to_string(),
                attr,
            },
        );
        if width == 2 {
            self.set_cell(row, col + 1, DisplayCell { text: String::new(), attr });
        }
        col + width
    }

    /// Blank `row` from column `col` to the end
    pub fn clear_row_from(&mut self, row: u16, col: u16, attr: DisplayAttr) {
        if let Some(cells) = self.grid.get_mut(row as usize) {
            for cell in cells.iter_mut().skip(col as usize) {
                *cell = DisplayCell::blank(attr);
            }
        }
    }

    /// Delete `count` lines at `row`, inserting blank lines at the bottom
    pub fn delete_lines(&mut self, row: u16, count: u16, attr: DisplayAttr) {
        let row = row as usize;
        let height = self.grid.len();
        if row >= height {
            return;
        }
        let count = (count as usize).min(height - row);
        self.grid.drain(row..row + count);
        let blank = vec![DisplayCell::blank(attr); self.width as usize];
        for _ in 0..count {
            self.grid.push(blank.clone());
        }
    }

    /// Row contents as text, for status and tests
    pub fn row_text(&self, row: u16) -> String {
        self.grid
            .get(row as usize)
            .map(|cells| cells.iter().map(|c| c.text.as_str()).collect::<String>())
            .unwrap_or_default()
    }

    pub fn rows(&self) -> &[Vec<DisplayCell>] {
        &self.grid
    }

    /// Scroll the text view so `cursor_line` is visible
    pub fn scroll_to_cursor_line(&mut self) {
        let height = self.height.max(1) as usize;
        if self.cursor_line < self.top_line {
            self.top_line = self.cursor_line;
        } else if self.cursor_line >= self.top_line + height {
            self.top_line = self.cursor_line + 1 - height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn session_id() -> SessionId {
        SessionId::from(KeyData::from_ffi(1))
    }

    #[test]
    fn test_delete_lines() {
        let mut pane = Pane::new(1, session_id(), 0, 0, 3, 3);
        for row in 0..3 {
            pane.put_glyph(row, 0, &row.to_string(), DisplayAttr::default());
        }
        pane.delete_lines(0, 1, DisplayAttr::default());
        assert!(pane.row_text(0).starts_with('1'));
        assert!(pane.row_text(1).starts_with('2'));
        assert_eq!(pane.row_text(2), "   ");
    }

    #[test]
    fn test_wide_glyph_at_edge() {
        let mut pane = Pane::new(1, session_id(), 0, 0, 3, 1);
        let next = pane.put_glyph(0, 0, "漢", DisplayAttr::default());
        assert_eq!(next, 2);
        assert_eq!(pane.cell(0, 1).map(|c| c.text.as_str()), Some(""));
        assert_eq!(pane.put_glyph(0, 2, "字", DisplayAttr::default()), 3);
        assert_eq!(pane.cell(0, 2).map(|c| c.text.as_str()), Some(" "));
    }

    #[test]
    fn test_resize_clamps_cursor() {
        let mut pane = Pane::new(1, session_id(), 0, 0, 10, 5);
        pane.needs_full = false;
        pane.position_cursor(Pos::new(4, 9));
        pane.resize(4, 2);
        assert_eq!(pane.cursor, Pos::new(1, 3));
        assert!(pane.needs_full);
        assert_eq!(pane.rows().len(), 2);
    }

    #[test]
    fn test_scroll_to_cursor_line() {
        let mut pane = Pane::new(1, session_id(), 0, 0, 10, 3);
        pane.cursor_line = 7;
        pane.scroll_to_cursor_line();
        assert_eq!(pane.top_line, 5);
        pane.cursor_line = 2;
        pane.scroll_to_cursor_line();
        assert_eq!(pane.top_line, 2);
    }
}
