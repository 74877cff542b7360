//! Scrollback storage
//!
//! History rows are kept as two parallel pieces:
//! - `Scrollback`: one `SbLine` per row holding cell attributes only
//! - `TextBuffer`: the glyphs of the same rows as plain text lines
//!
//! A row that only differs from the previous one by trailing blanks is
//! stored with no cells at all and a fill attribute.

use unicode_width::UnicodeWidthChar;

use crate::color::{StyleFlags, TermColor};
use crate::core::term::ScreenCell;

/// Attributes of one cell, without the glyph
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellAttr {
    /// Display columns used by the glyph (1 or 2)
    pub width: u8,
    pub flags: StyleFlags,
    pub fg: TermColor,
    pub bg: TermColor,
}

impl CellAttr {
    /// Attribute for blank cells drawn with the given colors
    pub fn with_colors(fg: TermColor, bg: TermColor) -> Self {
        Self {
            width: 1,
            flags: StyleFlags::empty(),
            fg,
            bg,
        }
    }

    /// Fill comparison: only the RGB channels of both colors count.
    pub fn same_fill(&self, other: &CellAttr) -> bool {
        self.fg.same_rgb(&other.fg) && self.bg.same_rgb(&other.bg)
    }
}

impl From<&ScreenCell> for CellAttr {
    fn from(cell: &ScreenCell) -> Self {
        Self {
            width: cell.width,
            flags: cell.flags,
            fg: cell.fg,
            bg: cell.bg,
        }
    }
}

/// One row of history
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SbLine {
    cells: Option<Vec<CellAttr>>,
    fill: CellAttr,
}

impl SbLine {
    pub fn new(cells: Vec<CellAttr>, fill: CellAttr) -> Self {
        Self {
            cells: if cells.is_empty() { None } else { Some(cells) },
            fill,
        }
    }

    /// Line without any stored cells
    pub fn blank(fill: CellAttr) -> Self {
        Self { cells: None, fill }
    }

    /// Number of stored cells
    pub fn cols(&self) -> usize {
        self.cells.as_ref().map_or(0, Vec::len)
    }

    pub fn cells(&self) -> &[CellAttr] {
        self.cells.as_deref().unwrap_or(&[])
    }

    pub fn fill(&self) -> &CellAttr {
        &self.fill
    }

    /// Attribute at `col`, falling back to the fill past the stored cells
    pub fn attr_at(&self, col: usize) -> &CellAttr {
        self.cells().get(col).unwrap_or(&self.fill)
    }
}

/// Ordered history rows
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scrollback {
    lines: Vec<SbLine>,
}

impl Scrollback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn push(&mut self, line: SbLine) {
        self.lines.push(line);
    }

    /// Insert before `idx`, or append when `idx` is past the end.
    pub fn insert(&mut self, idx: usize, line: SbLine) {
        if idx < self.lines.len() {
            self.lines.insert(idx, line);
        } else {
            self.lines.push(line);
        }
    }

    /// Add a cell-less line with `fill`, at `at` or at the tail.
    pub fn add_blank(&mut self, fill: CellAttr, at: Option<usize>) {
        let line = SbLine::blank(fill);
        match at {
            Some(idx) if idx < self.lines.len() => self.lines.insert(idx, line),
            _ => self.lines.push(line),
        }
    }

    pub fn get(&self, idx: usize) -> Option<&SbLine> {
        self.lines.get(idx)
    }

    pub fn lines(&self) -> &[SbLine] {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut [SbLine] {
        &mut self.lines
    }

    pub fn pop(&mut self) -> Option<SbLine> {
        self.lines.pop()
    }

    pub fn truncate(&mut self, len: usize) {
        self.lines.truncate(len);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Text lines shown for a session once the live screen is not in charge
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextBuffer {
    pub name: String,
    lines: Vec<String>,
}

impl TextBuffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn append(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    pub fn insert(&mut self, idx: usize, text: impl Into<String>) {
        let idx = idx.min(self.lines.len());
        self.lines.insert(idx, text.into());
    }

    /// Line by 0-based index
    pub fn line(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(String::as_str)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut [String] {
        &mut self.lines
    }

    pub fn pop(&mut self) -> Option<String> {
        self.lines.pop()
    }

    pub fn truncate(&mut self, len: usize) {
        self.lines.truncate(len);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Split text into glyphs, each with its combining characters.
pub fn glyphs(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, ch) in text.char_indices() {
        let combining = ch.width() == Some(0) && start.is_some();
        if !combining {
            if let Some(s) = start {
                out.push(&text[s..i]);
            }
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push(&text[s..]);
    }
    out
}

/// A screen row reduced to what history stores
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrimmedRow {
    pub line: SbLine,
    pub text: String,
}

impl TrimmedRow {
    /// True when the row had no glyph at all
    pub fn is_blank(&self) -> bool {
        self.line.cols() == 0
    }
}

/// How the fill of a trimmed row is chosen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillRule {
    /// Attribute of the last blank cell in the row
    LastBlank,
    /// Attribute of the last blank cell after the last glyph, else the default
    TrailingBlank,
}

/// Trim trailing blank columns and encode glyphs of one row.
///
/// Cells are indexed by column; the second half of a wide glyph repeats the
/// attribute of its first half. An empty glyph is written as a space.
pub fn trim_row(cells: &[ScreenCell], default: &CellAttr, rule: FillRule) -> TrimmedRow {
    let mut len = 0;
    let mut fill = *default;
    for (col, cell) in cells.iter().enumerate() {
        if cell.is_continuation() {
            // right half of a wide glyph
            len = col + 1;
            continue;
        }
        if !cell.chars.is_empty() {
            len = col + 1;
            if rule == FillRule::TrailingBlank {
                fill = *default;
            }
        } else {
            fill = CellAttr::from(cell);
        }
    }

    let mut attrs = Vec::with_capacity(len);
    let mut text = String::new();
    let mut col = 0;
    while col < len {
        let cell = &cells[col];
        let attr = CellAttr::from(cell);
        if cell.chars.is_empty() {
            text.push(' ');
        } else {
            text.push_str(&cell.chars);
        }
        let width = cell.width.max(1) as usize;
        for _ in 0..width {
            attrs.push(attr);
        }
        col += width;
    }
    attrs.truncate(len);

    TrimmedRow {
        line: SbLine::new(attrs, fill),
        text,
    }
}
