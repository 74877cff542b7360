//! Screen dumps
//!
//! A dump is a text snapshot of the live screen, one line per row:
//!
//! ```text
//! |a+0#ff000010#00000020|b>c@3\n
//! ^ cell     ^ fg        ^ bg  ^ cursor cell, then 3 repeats
//! ```
//!
//! - `|` starts a cell, `>` starts the cell under the cursor
//! - the glyph follows; a blank cell is written as a space
//! - when width, style or colors change from the previous cell a suffix
//!   follows: `+` or `*` (double width), then the style as `&` (same) or a
//!   number, then fg and bg as `&` (same) or `#rrggbb<index>`
//! - `@N` repeats the previous cell N times
//!
//! Reading never fails on bad input: the text `CORRUPT` is inserted into the
//! affected line and decoding carries on. Two dumps can be combined into a
//! diff view, top file above bottom file with a comparison block between.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::color::{dump_color, StyleFlags, TermColor};
use crate::core::scrollback::{glyphs, CellAttr, SbLine, Scrollback, TextBuffer};
use crate::core::term::{Engine, ScreenCell};

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("E953: File exists: {0}")]
    FileExists(String),

    #[error("Cannot create file {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write dump: {0}")]
    Write(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DumpError>;

const CORRUPT: &str = "CORRUPT";

/// Limits for writing a dump; 0 means no limit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DumpOptions {
    pub rows: usize,
    pub columns: usize,
}

fn same_attr(a: &ScreenCell, b: &ScreenCell) -> bool {
    a.flags.to_hl() == b.flags.to_hl() && a.fg.same_color(&b.fg) && a.bg.same_color(&b.bg)
}

/// Serialize the live screen of `engine`.
pub fn encode_screen(engine: &dyn Engine, opts: DumpOptions) -> String {
    let (rows, cols) = engine.size();
    let cursor = engine.cursor().pos;
    let mut out = String::new();
    let mut prev = ScreenCell {
        width: 0,
        ..ScreenCell::default()
    };

    let max_rows = if opts.rows == 0 { rows as usize } else { opts.rows.min(rows as usize) };
    let max_cols = if opts.columns == 0 { cols as usize } else { opts.columns.min(cols as usize) };

    for row in 0..max_rows as u16 {
        let mut repeat = 0;
        for col in 0..max_cols as u16 {
            let cell = engine.cell(row, col).unwrap_or(ScreenCell {
                width: 0,
                ..ScreenCell::default()
            });
            if cell.is_continuation() && col > 0 {
                continue;
            }
            let is_cursor = cursor.row == row && cursor.col == col;
            let attr_same = same_attr(&cell, &prev);

            if cell.chars == prev.chars && cell.width == prev.width && attr_same && !is_cursor {
                repeat += 1;
                continue;
            }

            if repeat > 0 {
                out.push_str(&format!("@{}", repeat));
                repeat = 0;
            }
            out.push(if is_cursor { '>' } else { '|' });
            if cell.chars.is_empty() {
                out.push(' ');
            } else {
                out.push_str(&cell.chars);
            }

            // Only differing glyphs: the next separator implies the same attributes
            if cell.width != prev.width || !attr_same {
                out.push(if cell.width == 2 { '*' } else { '+' });
                if attr_same {
                    // style, fg and bg unchanged
                    out.push_str("&&&");
                } else {
                    out.push_str(&cell.flags.to_hl().to_string());
                    for (now, before) in [(&cell.fg, &prev.fg), (&cell.bg, &prev.bg)] {
                        if now.same_color(before) {
                            out.push('&');
                        } else {
                            out.push('#');
                            out.push_str(&dump_color(now));
                        }
                    }
                }
            }
            prev = cell;
        }
        if repeat > 0 {
            out.push_str(&format!("@{}", repeat));
        }
        out.push('\n');
    }
    out
}

/// Write a dump of `engine` to a new file.
pub fn write_dump(engine: &dyn Engine, path: &Path, opts: DumpOptions) -> Result<()> {
    let name = path.display().to_string();
    if fs::metadata(path).is_ok() {
        return Err(DumpError::FileExists(name));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| DumpError::Create { path: name, source })?;
    file.write_all(encode_screen(engine, opts).as_bytes())?;
    tracing::debug!("Dump written to {}", path.display());
    Ok(())
}

/// One decoded row: its text and one attribute per glyph
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DumpRow {
    pub text: String,
    pub cells: Vec<CellAttr>,
}

/// A decoded dump file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DumpImage {
    pub rows: Vec<DumpRow>,
    /// (row, glyph index) of the `>` cell
    pub cursor: Option<(usize, usize)>,
    /// Most cells in any row
    pub max_cells: usize,
}

impl DumpImage {
    pub fn is_corrupt(&self) -> bool {
        self.rows.iter().any(|r| r.text.contains(CORRUPT))
    }

    /// (row, screen column) of the `>` cell
    pub fn cursor_column(&self) -> Option<(usize, usize)> {
        let (row, glyph) = self.cursor?;
        let col = self
            .rows
            .get(row)
            .map_or(glyph, |r| r.cells.iter().take(glyph).map(|c| c.width.max(1) as usize).sum());
        Some((row, col))
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn next(&mut self) -> Option<u8> {
        let c = self.data.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }
}

fn hex_value(c: Option<u8>) -> u8 {
    c.and_then(|c| (c as char).to_digit(16)).unwrap_or(0) as u8
}

fn is_digit(c: Option<u8>) -> bool {
    matches!(c, Some(b'0'..=b'9'))
}

/// Accumulate digits starting at `*c`; leaves `*c` on the first non-digit.
fn read_number(reader: &mut Reader<'_>, c: &mut Option<u8>) -> u32 {
    let mut n: u32 = 0;
    while let Some(d @ b'0'..=b'9') = *c {
        n = n.saturating_mul(10).saturating_add((d - b'0') as u32);
        *c = reader.next();
    }
    n
}

/// Decode dump text.
pub fn decode(data: &[u8]) -> DumpImage {
    let mut reader = Reader { data, pos: 0 };
    let mut image = DumpImage::default();
    let mut text: Vec<u8> = Vec::new();
    // An empty line is only suspicious before anything was read
    let mut seen_text = false;
    let mut cells: Vec<CellAttr> = Vec::new();
    let mut cell = CellAttr::default();
    let mut prev_char: Option<Vec<u8>> = None;

    let corrupt = |text: &mut Vec<u8>| text.extend_from_slice(CORRUPT.as_bytes());

    let mut c = reader.next();
    while let Some(ch) = c {
        match ch {
            b'\n' => {
                if !seen_text {
                    corrupt(&mut text);
                    seen_text = true;
                }
                image.max_cells = image.max_cells.max(cells.len());
                image.rows.push(DumpRow {
                    text: String::from_utf8_lossy(&text).into_owned(),
                    cells: std::mem::take(&mut cells),
                });
                text.clear();
                c = reader.next();
            }
            b'|' | b'>' => {
                let prev_len = text.len();
                if ch == b'>' {
                    if image.cursor.is_some() {
                        // duplicate cursor
                        corrupt(&mut text);
                    }
                    image.cursor = Some((image.rows.len(), cells.len()));
                }

                // glyph bytes up to the next separator
                if let Some(first) = reader.next() {
                    text.push(first);
                }
                loop {
                    c = reader.next();
                    match c {
                        None | Some(b'+' | b'*' | b'|' | b'>' | b'@' | b'&' | b'\n') => break,
                        Some(b) => text.push(b),
                    }
                }
                seen_text = true;
                prev_char = Some(text[prev_len..].to_vec());

                match c {
                    Some(b'@' | b'|' | b'>' | b'\n') => {}
                    Some(b'&') => c = reader.next(),
                    Some(sep @ (b'+' | b'*')) => {
                        cell.width = if sep == b'+' { 1 } else { 2 };

                        c = reader.next();
                        if c == Some(b'&') {
                            c = reader.next();
                        } else if is_digit(c) {
                            let hl = read_number(&mut reader, &mut c);
                            cell.flags = StyleFlags::from_hl(hl);
                        } else {
                            corrupt(&mut text);
                        }

                        for is_bg in [false, true] {
                            if c == Some(b'&') {
                                c = reader.next();
                            } else if c == Some(b'#') {
                                let mut channels = [0u8; 3];
                                for channel in channels.iter_mut() {
                                    let hi = hex_value(reader.next());
                                    let lo = hex_value(reader.next());
                                    *channel = (hi << 4) | lo;
                                }
                                c = reader.next();
                                if !is_digit(c) {
                                    corrupt(&mut text);
                                }
                                let index = read_number(&mut reader, &mut c).min(255) as u8;
                                let color = TermColor::new(channels[0], channels[1], channels[2], index);
                                if is_bg {
                                    cell.bg = color;
                                } else {
                                    cell.fg = color;
                                }
                            } else {
                                corrupt(&mut text);
                            }
                        }
                    }
                    _ => corrupt(&mut text),
                }
                cells.push(cell);
            }
            b'@' => match &prev_char {
                None => {
                    corrupt(&mut text);
                    seen_text = true;
                    c = reader.next();
                }
                Some(glyph) => {
                    c = reader.next();
                    let count = read_number(&mut reader, &mut c);
                    for _ in 0..count {
                        text.extend_from_slice(glyph);
                        cells.push(cell);
                    }
                }
            },
            _ => {
                corrupt(&mut text);
                seen_text = true;
                c = reader.next();
            }
        }
    }

    if !text.is_empty() {
        // trailing characters after the last newline
        corrupt(&mut text);
        image.max_cells = image.max_cells.max(cells.len());
        image.rows.push(DumpRow {
            text: String::from_utf8_lossy(&text).into_owned(),
            cells,
        });
    }

    if image.is_corrupt() {
        tracing::warn!("Dump is corrupt");
    }
    image
}

/// Read and decode a dump file.
pub fn read_dump(path: &Path) -> Result<DumpImage> {
    let data = fs::read(path).map_err(|source| DumpError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(decode(&data))
}

/// Append the rows of `image` to history. Returns the number of rows added.
///
/// History is indexed by screen column, so a double width cell is stored
/// twice.
pub fn append_image(image: &DumpImage, fill: &CellAttr, sb: &mut Scrollback, text: &mut TextBuffer) -> usize {
    for row in &image.rows {
        let cells = row
            .cells
            .iter()
            .flat_map(|cell| std::iter::repeat(*cell).take(cell.width.max(1) as usize))
            .collect();
        sb.push(SbLine::new(cells, *fill));
        text.append(row.text.clone());
    }
    image.rows.len()
}

/// Comparison line for row `row` present in both dumps.
fn compare_row(
    row: usize,
    top: &DumpRow,
    bottom: &DumpRow,
    cursors: (Option<(usize, usize)>, Option<(usize, usize)>),
    width: usize,
) -> String {
    let g1 = glyphs(&top.text);
    let g2 = glyphs(&bottom.text);
    let cursor_moved = cursors.0 != cursors.1;
    let mut line = String::with_capacity(width);

    let mut col = 0;
    while col < width && col < g1.len() && col < g2.len() {
        let mark = if g1[col] != g2[col] {
            'X'
        } else if cursor_moved && cursors.0 == Some((row, col)) {
            '>'
        } else if cursor_moved && cursors.1 == Some((row, col)) {
            '<'
        } else {
            match (top.cells.get(col), bottom.cells.get(col)) {
                (Some(a), Some(b)) if a.width != b.width => 'w',
                (Some(a), Some(b)) if !a.fg.same_color(&b.fg) => 'f',
                (Some(a), Some(b)) if !a.bg.same_color(&b.bg) => 'b',
                (Some(a), Some(b)) if a.flags.to_hl() != b.flags.to_hl() => 'a',
                _ => ' ',
            }
        };
        line.push(mark);
        col += 1;
    }

    let (mut i1, mut i2) = (col, col);
    while col < width {
        if i1 >= g1.len() && i2 >= g2.len() {
            line.push('?');
        } else if i1 >= g1.len() {
            line.push('+');
            i2 += 1;
        } else {
            line.push('-');
            i1 += 1;
        }
        col += 1;
    }
    line
}

/// Row counts of a diff view
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffRows {
    pub top: usize,
    pub bottom: usize,
    /// Width of the separator and comparison rows
    pub width: usize,
}

/// Build the diff layout of two dumps into empty history:
///
/// ```text
/// top rows
/// ====
/// comparison rows
/// ====
/// bottom rows
/// ```
pub fn build_diff(
    first: &DumpImage,
    second: &DumpImage,
    fill: &CellAttr,
    sb: &mut Scrollback,
    text: &mut TextBuffer,
) -> DiffRows {
    let width = first.max_cells.max(second.max_cells);
    let top = append_image(first, fill, sb, text);

    let separator = "=".repeat(width);
    sb.add_blank(*fill, None);
    text.append(separator.clone());

    let cursors = (first.cursor, second.cursor);
    for row in 0..top.max(second.rows.len()) {
        let line = match (first.rows.get(row), second.rows.get(row)) {
            (Some(a), Some(b)) => compare_row(row, a, b, cursors, width),
            // bottom part has fewer rows
            (Some(_), None) => "-".repeat(width),
            // bottom part has more rows
            _ => "+".repeat(width),
        };
        sb.add_blank(*fill, None);
        text.append(line);
    }

    sb.add_blank(*fill, None);
    text.append(separator);

    let bottom = append_image(second, fill, sb, text);
    DiffRows { top, bottom, width }
}

/// Exchange the top and bottom blocks of a diff view, keeping the middle.
/// Returns false when there is nothing to swap.
pub fn swap_diff(sb: &mut Scrollback, text: &mut TextBuffer, rows: &mut DiffRows) -> bool {
    let total = text.len();
    if rows.top == 0 || sb.is_empty() || rows.top + rows.bottom > total || sb.len() != total {
        return false;
    }
    let (top, bottom) = (rows.top, rows.bottom);
    let middle = total - top - bottom;

    // [T][M][B] -> [M][B][T] -> [B][M][T]
    let lines = text.lines_mut();
    lines.rotate_left(top);
    lines[..middle + bottom].rotate_left(middle);

    let cells = sb.lines_mut();
    cells.rotate_left(top);
    cells[..middle + bottom].rotate_left(middle);

    rows.top = bottom;
    rows.bottom = top;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::INDEX_DEFAULT;
    use crate::core::term::VtEngine;

    fn engine(rows: u16, cols: u16) -> VtEngine {
        VtEngine::new(
            rows,
            cols,
            TermColor::new(255, 255, 255, INDEX_DEFAULT),
            TermColor::new(0, 0, 0, INDEX_DEFAULT),
        )
    }

    fn fill() -> CellAttr {
        CellAttr::with_colors(
            TermColor::new(255, 255, 255, INDEX_DEFAULT),
            TermColor::new(0, 0, 0, INDEX_DEFAULT),
        )
    }

    #[test]
    fn test_decode_scenario() {
        let image = decode(b"|a+0#ff000010#00000020|b&\n");
        assert_eq!(image.rows.len(), 1);
        let row = &image.rows[0];
        assert_eq!(row.text, "ab");
        assert_eq!(row.cells.len(), 2);

        let first = row.cells[0];
        assert_eq!(first.width, 1);
        assert_eq!(first.flags, StyleFlags::empty());
        assert_eq!(first.fg, TermColor::new(0xff, 0, 0, 10));
        assert_eq!(first.bg, TermColor::new(0, 0, 0, 20));
        assert_eq!(row.cells[1], first);
        assert!(!image.is_corrupt());
    }

    #[test]
    fn test_decode_repeat_and_cursor() {
        let image = decode(b"|x+2#0000ff5&@2>y\n");
        let row = &image.rows[0];
        assert_eq!(row.text, "xxxy");
        assert_eq!(row.cells.len(), 4);
        assert!(row.cells[2].flags.contains(StyleFlags::BOLD));
        assert_eq!(image.cursor, Some((0, 3)));
    }

    #[test]
    fn test_decode_corruption_is_inline() {
        let image = decode(b"|a+0#ff000010#00000020>b>c\n|d\n");
        assert_eq!(image.rows.len(), 2);
        assert!(image.rows[0].text.contains("CORRUPT"));
        assert_eq!(image.rows[1].text, "d");

        let image = decode(b"@3\n");
        assert!(image.is_corrupt());

        let image = decode(b"|a+0#ff000010#00000020\n|b");
        assert_eq!(image.rows.len(), 2);
        assert!(image.rows[1].text.ends_with("CORRUPT"));
    }

    #[test]
    fn test_encode_compresses_repeats() {
        let mut e = engine(1, 5);
        e.feed(b"aaa");
        let dump = encode_screen(&e, DumpOptions::default());
        // cursor sits on the first blank cell
        assert_eq!(dump, "|a+0#ffffff0&@2> @1\n");
    }

    #[test]
    fn test_round_trip() {
        let mut e = engine(3, 6);
        e.feed(b"\x1b[31mred\x1b[0m \x1b[1;44mB\r\n\xe6\xbc\xa2x\x1b[3;1H");
        let dump = encode_screen(&e, DumpOptions::default());
        let image = decode(dump.as_bytes());
        assert!(!image.is_corrupt());
        assert_eq!(image.rows.len(), 3);
        assert_eq!(image.cursor, Some((2, 0)));

        for (row_idx, row) in image.rows.iter().enumerate() {
            let mut col = 0u16;
            for (glyph, attr) in glyphs(&row.text).iter().zip(&row.cells) {
                let cell = e.cell(row_idx as u16, col).unwrap();
                let expected = if cell.chars.is_empty() { " " } else { cell.chars.as_str() };
                assert_eq!(*glyph, expected);
                assert_eq!(attr.width, cell.width);
                assert_eq!(attr.fg, cell.fg);
                assert_eq!(attr.bg, cell.bg);
                assert_eq!(attr.flags, cell.flags);
                col += cell.width.max(1) as u16;
            }
            assert_eq!(col, 6);
        }
    }

    #[test]
    fn test_width_change_with_same_attributes() {
        let mut e = engine(1, 4);
        e.feed("a\u{6f22}\x1b[1;1H".as_bytes());
        let dump = encode_screen(&e, DumpOptions::default());
        assert_eq!(dump, ">a+0#ffffff0&|\u{6f22}*&&&| +&&&\n");

        let image = decode(dump.as_bytes());
        assert!(!image.is_corrupt());
        let row = &image.rows[0];
        assert_eq!(row.text, "a\u{6f22} ");
        let widths: Vec<u8> = row.cells.iter().map(|c| c.width).collect();
        assert_eq!(widths, vec![1, 2, 1]);
        assert_eq!(row.cells[1].fg, row.cells[0].fg);
        assert_eq!(row.cells[2].bg, row.cells[0].bg);
    }

    #[test]
    fn test_append_indexes_by_column() {
        let image = decode("|a+0#ff00002#0000000|\u{6f22}*&&&|b+0#00ff003&\n".as_bytes());
        assert!(!image.is_corrupt());
        let mut sb = Scrollback::new();
        let mut text = TextBuffer::new("dump");
        assert_eq!(append_image(&image, &fill(), &mut sb, &mut text), 1);

        let line = sb.get(0).unwrap();
        assert_eq!(line.cols(), 4);
        let fgs: Vec<u8> = (0..4).map(|col| line.attr_at(col).fg.g).collect();
        assert_eq!(fgs, vec![0, 0, 0, 0xff]);
        assert_eq!(line.attr_at(2).width, 2);

        let image = decode("|\u{6f22}*0#ffffff0#0000000>b+&&&\n".as_bytes());
        assert_eq!(image.cursor, Some((0, 1)));
        assert_eq!(image.cursor_column(), Some((0, 2)));
    }

    #[test]
    fn test_write_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen.dump");
        let e = engine(2, 4);
        write_dump(&e, &path, DumpOptions::default()).unwrap();
        let err = write_dump(&e, &path, DumpOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("E953: File exists"));

        let image = read_dump(&path).unwrap();
        assert_eq!(image.rows.len(), 2);
    }

    #[test]
    fn test_diff_layout() {
        let first = decode(b"|a+0#ffffff0#0000000|b|c\n|d\n");
        let second = decode(b"|a+0#ffffff0#0000000|x\n|d\n|e\n");
        let mut sb = Scrollback::new();
        let mut text = TextBuffer::new("dump diff");
        let rows = build_diff(&first, &second, &fill(), &mut sb, &mut text);

        assert_eq!(rows, DiffRows { top: 2, bottom: 3, width: 3 });
        assert_eq!(
            text.lines(),
            &["abc", "d", "===", " X-", " ??", "+++", "===", "ax", "d", "e"]
        );
        assert_eq!(sb.len(), text.len());
    }

    #[test]
    fn test_diff_marks_attributes_and_cursor() {
        let first = decode(b">a+0#ffffff0#0000000|b\n");
        let second = decode(b"|a+0#ffffff0#0000000|b+2&&\n");
        let mut sb = Scrollback::new();
        let mut text = TextBuffer::new("dump diff");
        build_diff(&first, &second, &fill(), &mut sb, &mut text);
        assert_eq!(text.line(2), Some(">a"));
    }

    #[test]
    fn test_swap_twice_restores() {
        let first = decode(b"|a+0#ffffff0#0000000\n|b\n");
        let second = decode(b"|c+0#ff00000#0000000\n");
        let mut sb = Scrollback::new();
        let mut text = TextBuffer::new("dump diff");
        let mut rows = build_diff(&first, &second, &fill(), &mut sb, &mut text);
        let (sb0, text0, rows0) = (sb.clone(), text.clone(), rows);

        assert!(swap_diff(&mut sb, &mut text, &mut rows));
        assert_eq!(text.line(0), Some("c"));
        assert_eq!(text.line(text.len() - 1), Some("b"));
        assert_eq!(rows.top, 1);
        assert_eq!(sb.get(0).map(|l| l.cells()[0].fg), Some(TermColor::new(0xff, 0, 0, 0)));

        assert!(swap_diff(&mut sb, &mut text, &mut rows));
        assert_eq!(text, text0);
        assert_eq!(sb, sb0);
        assert_eq!(rows, rows0);
    }

    #[test]
    fn test_swap_requires_top_rows() {
        let mut sb = Scrollback::new();
        let mut text = TextBuffer::new("x");
        let mut rows = DiffRows::default();
        assert!(!swap_diff(&mut sb, &mut text, &mut rows));
    }
}
