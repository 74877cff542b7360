//! Session lifecycle
//!
//! A session couples an emulator engine, the transport of its job and the
//! history (scrollback cells plus text lines) shown once the live screen is
//! no longer in charge.
//!
//! ```text
//! Starting ──► JobMode ◄──► NormalMode
//!                 │             │ channel closes
//!                 │             ▼
//!                 │       ChannelClosed
//!                 │             │ back to job mode
//!                 ▼             ▼
//!               Finished (engine released)
//! ```
//!
//! Engine events are handled by [`Session::dispatch`], which updates the
//! session and returns the [`ViewUpdate`]s the render coordinator applies to
//! every view showing the session.

use thiserror::Error;

use crate::color::{StyleFlags, TermColor};
use crate::config::{FinishPolicy, SessionOptions};
use crate::core::pty::{JobStatus, PtyError, StreamPart, Transport, DEFAULT_BACKSPACE};
use crate::core::scrollback::{glyphs, trim_row, CellAttr, FillRule, Scrollback, TextBuffer};
use crate::core::term::{CursorShape, Engine, EngineEvent, Pos, Property, ScreenCell};
use crate::dump::{DiffRows, DumpError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unknown session")]
    UnknownSession,

    #[error("Terminal has no running engine")]
    NoEngine,

    #[error("Failed to start job: {0}")]
    Transport(#[from] PtyError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error("Not possible in this state: {0}")]
    InvalidState(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Where a session is in its life
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    JobMode,
    NormalMode,
    /// The job's output closed while the view was frozen
    ChannelClosed,
    Finished,
}

/// What the host must do with the container after the channel closed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishAction {
    /// Delete the container and its views
    Close,
    /// Show the container if no view does; carries the open command
    Open(String),
    Keep,
}

/// Rows `[start, end)` that need repainting; empty when `start >= end`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyRange {
    pub start: u16,
    pub end: u16,
}

impl DirtyRange {
    pub const EMPTY: DirtyRange = DirtyRange {
        start: u16::MAX,
        end: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn widen(&mut self, start: u16, end: u16) {
        self.start = self.start.min(start);
        self.end = self.end.max(end);
    }

    pub fn contains(&self, row: u16) -> bool {
        row >= self.start && row < self.end
    }

    /// Return the range and reset it to empty.
    pub fn take(&mut self) -> Option<(u16, u16)> {
        let range = (!self.is_empty()).then_some((self.start, self.end));
        *self = Self::EMPTY;
        range
    }
}

impl Default for DirtyRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Cursor appearance requested by the job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorProps {
    pub visible: bool,
    pub blink: bool,
    pub shape: CursorShape,
    /// Color as the job sent it, `None` for the display default
    pub color: Option<String>,
}

impl Default for CursorProps {
    fn default() -> Self {
        Self {
            visible: true,
            blink: false,
            shape: CursorShape::Block,
            color: None,
        }
    }
}

/// Changes every view of a session must apply
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewUpdate {
    /// Delete `count` lines at `row`, clearing with `clear`
    ScrollUp { row: u16, count: u16, clear: CellAttr },
    Cursor { pos: Pos, visible: bool },
    /// Blink, shape, color or visibility changed
    CursorStyle,
    /// The job resized the screen; views follow
    Resize { rows: u16, cols: u16 },
    /// Text lines changed; views showing text put the cursor on `last_line`
    TextChanged { last_line: usize },
    /// Normal mode entered: cursor and top line in the text container
    NormalMode { line: usize, col: u16, top_line: usize },
    Title,
    Repaint,
}

/// One cell as returned by [`Session::scrape`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrapedCell {
    pub chars: String,
    pub fg: String,
    pub bg: String,
    pub attr: u32,
    pub width: u8,
}

fn hex_rgb(color: &TermColor) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b)
}

pub struct Session {
    engine: Option<Box<dyn Engine>>,
    transport: Option<Transport>,
    /// Text lines of the container
    pub text: TextBuffer,
    pub scrollback: Scrollback,
    /// Lines pushed off the top since the session started
    scrolled: usize,
    rows: u16,
    cols: u16,
    rows_fixed: bool,
    cols_fixed: bool,
    started: bool,
    normal_mode: bool,
    channel_closed: bool,
    finish: Option<FinishPolicy>,
    term_open_command: Option<String>,
    eof_chars: Option<String>,
    kill: Option<String>,
    command: Option<String>,
    norestore: bool,
    restore_command: Option<String>,
    cursor_pos: Pos,
    cursor: CursorProps,
    pub dirty: DirtyRange,
    /// Attribute of blank cells in default colors
    default_attr: CellAttr,
    alt_screen: bool,
    title: Option<String>,
    status_text: Option<String>,
    /// Set while the host resizes the engine, so the echoed resize is ignored
    host_resize: bool,
    backspace: u8,
    /// Top and bottom block sizes when showing a dump diff
    pub diff_rows: Option<DiffRows>,
}

impl Session {
    /// A session around `engine`, not yet attached to a job.
    pub fn new(name: impl Into<String>, options: &SessionOptions, engine: Box<dyn Engine>) -> Self {
        let (rows, cols) = engine.size();
        let (fg, bg) = engine.default_colors();
        let mut session = Self::detached(name, CellAttr::with_colors(fg, bg));
        session.engine = Some(engine);
        session.started = false;
        session.channel_closed = false;
        session.rows = rows;
        session.cols = cols;
        session.rows_fixed = options.rows_fixed;
        session.cols_fixed = options.cols_fixed;
        session.finish = options.finish;
        session.term_open_command = options.term_open_command.clone();
        session.eof_chars = options.eof_chars.clone();
        session.kill = options.kill.clone();
        session.command = options.command.clone();
        session.norestore = options.norestore;
        session.restore_command = options.restore_command.clone();
        session
    }

    /// A finished session holding only text, as used for dumps.
    pub fn detached(name: impl Into<String>, default_attr: CellAttr) -> Self {
        Self {
            engine: None,
            transport: None,
            text: TextBuffer::new(name),
            scrollback: Scrollback::new(),
            scrolled: 0,
            rows: 0,
            cols: 0,
            rows_fixed: false,
            cols_fixed: false,
            started: true,
            normal_mode: false,
            channel_closed: true,
            finish: None,
            term_open_command: None,
            eof_chars: None,
            kill: None,
            command: None,
            norestore: false,
            restore_command: None,
            cursor_pos: Pos::default(),
            cursor: CursorProps::default(),
            dirty: DirtyRange::EMPTY,
            default_attr,
            alt_screen: false,
            title: None,
            status_text: None,
            host_resize: false,
            backspace: DEFAULT_BACKSPACE,
            diff_rows: None,
        }
    }

    /// Hand the session its transport; the session is in job mode afterwards.
    pub fn attach(&mut self, transport: Transport) {
        self.transport = Some(transport);
        self.started = true;
        self.channel_closed = false;
        self.refresh_backspace();
        tracing::info!("Session '{}' started", self.text.name);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if !self.started {
            Lifecycle::Starting
        } else if self.engine.is_none() {
            Lifecycle::Finished
        } else if self.channel_closed {
            Lifecycle::ChannelClosed
        } else if self.normal_mode {
            Lifecycle::NormalMode
        } else {
            Lifecycle::JobMode
        }
    }

    pub fn name(&self) -> &str {
        &self.text.name
    }

    pub fn engine(&self) -> Option<&dyn Engine> {
        self.engine.as_deref()
    }

    pub fn engine_mut(&mut self) -> Option<&mut (dyn Engine + 'static)> {
        self.engine.as_deref_mut()
    }

    pub fn transport_mut(&mut self) -> Option<&mut Transport> {
        self.transport.as_mut()
    }

    pub fn size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    /// Which axes are pinned: (rows, cols)
    pub fn fixed(&self) -> (bool, bool) {
        (self.rows_fixed, self.cols_fixed)
    }

    pub fn scrolled(&self) -> usize {
        self.scrolled
    }

    pub fn is_normal_mode(&self) -> bool {
        self.normal_mode
    }

    pub fn is_finished(&self) -> bool {
        self.engine.is_none()
    }

    pub fn channel_closed(&self) -> bool {
        self.channel_closed
    }

    pub fn cursor_pos(&self) -> Pos {
        self.cursor_pos
    }

    pub fn cursor_props(&self) -> &CursorProps {
        &self.cursor
    }

    pub fn default_attr(&self) -> &CellAttr {
        &self.default_attr
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn using_alt_screen(&self) -> bool {
        self.alt_screen
    }

    pub fn backspace(&self) -> u8 {
        self.backspace
    }

    pub fn finish(&self) -> Option<FinishPolicy> {
        self.finish
    }

    pub fn set_finish(&mut self, finish: Option<FinishPolicy>) {
        self.finish = finish;
    }

    pub fn kill(&self) -> Option<&str> {
        self.kill.as_deref()
    }

    pub fn set_kill(&mut self, how: Option<String>) {
        self.kill = how.filter(|h| !h.is_empty());
    }

    /// Command to store for session restore: "NONE" means do not restore.
    pub fn restore_command(&self, shell: &str) -> Option<String> {
        if self.norestore {
            return Some("NONE".to_string());
        }
        if let Some(cmd) = &self.restore_command {
            return Some(cmd.clone());
        }
        self.command.clone().filter(|cmd| cmd != shell)
    }

    pub fn set_restore(&mut self, command: Option<String>) {
        self.restore_command = command;
    }

    /// Set the screen size from the host side. Returns the view updates
    /// the resize caused.
    pub fn set_size(&mut self, rows: u16, cols: u16) -> Vec<ViewUpdate> {
        if rows == 0 || cols == 0 || (rows, cols) == (self.rows, self.cols) {
            return Vec::new();
        }
        let Some(engine) = self.engine.as_mut() else {
            return Vec::new();
        };
        tracing::debug!("Resizing '{}' to {}x{}", self.text.name, cols, rows);
        self.host_resize = true;
        engine.set_size(rows, cols);
        self.rows = rows;
        self.cols = cols;
        let events = engine.take_events();
        // The echoed resize is ours; everything else still counts
        let updates = self.dispatch(events);
        self.host_resize = false;

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.report_winsize(rows, cols) {
                tracing::warn!("Failed to report window size: {}", e);
            }
        }
        updates
    }

    /// Record the size of a session without an engine
    pub fn set_text_size(&mut self, rows: u16, cols: u16) {
        if self.engine.is_none() {
            self.rows = rows;
            self.cols = cols;
        }
    }

    /// Place the cursor of a session without an engine
    pub fn set_text_cursor(&mut self, pos: Pos) {
        if self.engine.is_none() {
            self.cursor_pos = pos;
        }
    }

    /// Pin the size on the given axes
    pub fn set_fixed(&mut self, rows_fixed: bool, cols_fixed: bool) {
        self.rows_fixed = rows_fixed;
        self.cols_fixed = cols_fixed;
    }

    /// Apply engine events. Must not feed the engine.
    pub fn dispatch(&mut self, events: Vec<EngineEvent>) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        let mut repaint = false;

        for event in events {
            match event {
                EngineEvent::Damage(rect) => {
                    self.dirty.widen(rect.start_row, rect.end_row);
                    repaint = true;
                }
                EngineEvent::MoveRect { dest, src } => {
                    if dest.start_col == src.start_col
                        && dest.end_col == src.end_col
                        && dest.start_row < src.start_row
                    {
                        updates.push(ViewUpdate::ScrollUp {
                            row: dest.start_row,
                            count: src.start_row - dest.start_row,
                            clear: self.default_attr,
                        });
                    }
                    self.dirty.widen(dest.start_row, dest.end_row);
                    repaint = true;
                }
                EngineEvent::MoveCursor { pos, visible, .. } => {
                    self.cursor_pos = pos;
                    self.cursor.visible = visible;
                    updates.push(ViewUpdate::Cursor { pos, visible });
                }
                EngineEvent::SetProperty(prop) => self.set_property(prop, &mut updates),
                EngineEvent::Resize { rows, cols } => {
                    self.rows = rows;
                    self.cols = cols;
                    if !self.host_resize {
                        updates.push(ViewUpdate::Resize { rows, cols });
                        self.dirty.widen(0, rows);
                        repaint = true;
                    }
                }
                EngineEvent::PushLine(cells) => {
                    self.push_line(&cells);
                    updates.push(ViewUpdate::TextChanged {
                        last_line: self.text.len().saturating_sub(1),
                    });
                }
            }
        }

        if repaint {
            updates.push(ViewUpdate::Repaint);
        }
        updates
    }

    fn set_property(&mut self, prop: Property, updates: &mut Vec<ViewUpdate>) {
        match prop {
            Property::Title(title) => {
                // A blank title shows the state instead
                self.title = (!title.trim().is_empty()).then_some(title);
                self.status_text = None;
                updates.push(ViewUpdate::Title);
            }
            Property::CursorVisible(visible) => {
                self.cursor.visible = visible;
                updates.push(ViewUpdate::CursorStyle);
            }
            Property::CursorBlink(blink) => {
                self.cursor.blink = blink;
                updates.push(ViewUpdate::CursorStyle);
            }
            Property::CursorShape(shape) => {
                self.cursor.shape = shape;
                updates.push(ViewUpdate::CursorStyle);
            }
            Property::CursorColor(color) => {
                self.cursor.color = (!color.is_empty()).then_some(color);
                updates.push(ViewUpdate::CursorStyle);
            }
            Property::AltScreen(on) => self.alt_screen = on,
        }
    }

    /// Store a row the engine scrolled off the top.
    ///
    /// While the view is frozen the row goes in front of the migrated
    /// screen rows, so leaving normal mode still drops exactly those.
    pub fn push_line(&mut self, cells: &[ScreenCell]) {
        let row = trim_row(cells, &self.default_attr, FillRule::LastBlank);
        self.scrollback.insert(self.scrolled, row.line);
        self.text.insert(self.scrolled, row.text);
        self.scrolled += 1;
    }

    /// Copy the visible engine rows into history.
    ///
    /// Blank rows with the same fill as the row before are only written when
    /// a later row needs them, so trailing blank rows are not stored. Rows
    /// left by an earlier migration are replaced.
    pub fn migrate_screen(&mut self) -> Vec<ViewUpdate> {
        let Some(engine) = self.engine.as_ref() else {
            return Vec::new();
        };
        self.scrollback.truncate(self.scrolled);
        self.text.truncate(self.scrolled);

        let (rows, cols) = engine.size();
        let blank = ScreenCell::blank(self.default_attr.fg, self.default_attr.bg);
        let mut fill = self.default_attr;
        let mut skipped = 0;

        for row in 0..rows {
            let cells: Vec<ScreenCell> = (0..cols)
                .map(|col| engine.cell(row, col).unwrap_or_else(|| blank.clone()))
                .collect();
            let trimmed = trim_row(&cells, &self.default_attr, FillRule::TrailingBlank);

            if trimmed.is_blank() && trimmed.line.fill().same_fill(&fill) {
                skipped += 1;
                continue;
            }
            for _ in 0..skipped {
                self.scrollback.add_blank(fill, None);
                self.text.append("");
            }
            skipped = 0;

            fill = *trimmed.line.fill();
            self.scrollback.push(trimmed.line);
            self.text.append(trimmed.text);
        }

        // The job may have changed its colors
        let (fg, bg) = engine.default_colors();
        self.default_attr = CellAttr::with_colors(fg, bg);

        vec![ViewUpdate::TextChanged {
            last_line: self.text.len().saturating_sub(1),
        }]
    }

    fn invalidate_status(&mut self) {
        self.status_text = None;
    }

    /// Freeze the view on a copy of the screen.
    pub fn enter_normal_mode(&mut self) -> Result<Vec<ViewUpdate>> {
        if self.engine.is_none() {
            return Err(SessionError::InvalidState("job has finished"));
        }
        let mut updates = self.migrate_screen();
        self.normal_mode = true;
        self.invalidate_status();
        tracing::debug!("'{}' entered normal mode", self.text.name);

        updates.push(ViewUpdate::NormalMode {
            line: self.scrolled + self.cursor_pos.row as usize,
            col: self.cursor_pos.col,
            top_line: self.scrolled,
        });
        updates.push(ViewUpdate::Title);
        Ok(updates)
    }

    /// Drop the migrated rows and let the engine drive the view again.
    /// Returns the finish action if the channel closed meanwhile.
    pub fn enter_job_mode(&mut self) -> (Vec<ViewUpdate>, Option<FinishAction>) {
        self.scrollback.truncate(self.scrolled);
        self.text.truncate(self.scrolled);
        self.normal_mode = false;
        self.invalidate_status();
        tracing::debug!("'{}' back in job mode", self.text.name);

        let mut updates = vec![ViewUpdate::Title, ViewUpdate::Repaint];
        self.dirty.widen(0, self.rows);
        let action = if self.channel_closed && self.engine.is_some() {
            updates.extend(self.cleanup_engine());
            Some(self.finish_action())
        } else {
            None
        };
        (updates, action)
    }

    /// Move the screen to history (unless the container is about to be
    /// closed) and release the engine.
    fn cleanup_engine(&mut self) -> Vec<ViewUpdate> {
        let updates = if self.finish != Some(FinishPolicy::Close) {
            self.migrate_screen()
        } else {
            Vec::new()
        };
        self.free_engine();
        self.normal_mode = false;
        self.invalidate_status();
        updates
    }

    /// Release the engine. Safe to call more than once.
    pub fn free_engine(&mut self) {
        if self.engine.take().is_some() {
            tracing::debug!("Released engine of '{}'", self.text.name);
        }
        self.cursor.color = None;
        self.dirty = DirtyRange::EMPTY;
    }

    fn finish_action(&self) -> FinishAction {
        match self.finish {
            Some(FinishPolicy::Close) => {
                tracing::info!("Terminal job finished, closing window");
                FinishAction::Close
            }
            Some(FinishPolicy::Open) => {
                tracing::info!("Terminal job finished, opening window");
                FinishAction::Open(
                    self.term_open_command
                        .clone()
                        .unwrap_or_else(|| "botright sbuf %d".to_string()),
                )
            }
            _ => {
                tracing::info!("Terminal job finished");
                FinishAction::Keep
            }
        }
    }

    /// The transport reported end of stream.
    ///
    /// In normal mode the frozen view is kept and cleanup waits for the
    /// return to job mode; `None` is returned then.
    pub fn on_channel_closed(&mut self) -> (Vec<ViewUpdate>, Option<FinishAction>) {
        if self.channel_closed {
            return (Vec::new(), None);
        }
        self.channel_closed = true;
        self.title = None;
        self.invalidate_status();

        if self.normal_mode {
            tracing::debug!("'{}' channel closed in normal mode", self.text.name);
            return (vec![ViewUpdate::Title], None);
        }
        let mut updates = self.cleanup_engine();
        updates.push(ViewUpdate::Title);
        (updates, Some(self.finish_action()))
    }

    /// The job exited (its output may still be draining).
    pub fn job_ended(&mut self) {
        self.title = None;
        self.invalidate_status();
    }

    /// Feed job output to the engine and answer its replies.
    pub fn write_job_output(&mut self, bytes: &[u8]) -> Vec<ViewUpdate> {
        let Some(engine) = self.engine.as_mut() else {
            return Vec::new();
        };
        engine.feed(bytes);
        let reply = engine.take_output();
        let events = engine.take_events();
        if !reply.is_empty() {
            self.write_to_job(&reply);
        }
        self.dispatch(events)
    }

    /// Pull pending output from the transport into the engine.
    ///
    /// Returns the updates and, when the channel closed during this call,
    /// the finish action to carry out.
    pub fn poll(&mut self) -> (Vec<ViewUpdate>, Option<FinishAction>) {
        let Some(transport) = self.transport.as_mut() else {
            return (Vec::new(), None);
        };
        let data = transport.drain();
        let closed = transport.is_closed();

        let mut updates = if data.is_empty() {
            Vec::new()
        } else {
            self.write_job_output(&data)
        };
        if closed && !self.channel_closed {
            let (more, action) = self.on_channel_closed();
            updates.extend(more);
            return (updates, action);
        }
        (updates, None)
    }

    /// Send bytes to the job's terminal side; dropped silently once the
    /// transport is broken.
    pub fn write_to_job(&self, bytes: &[u8]) {
        if let Some(transport) = &self.transport {
            transport.write(bytes);
        }
    }

    /// Write whatever the engine has queued for the job.
    pub fn flush_engine_output(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            let bytes = engine.take_output();
            if !bytes.is_empty() {
                self.write_to_job(&bytes);
            }
        }
    }

    /// Re-read the erase character from the pty.
    pub fn refresh_backspace(&mut self) {
        if let Some(byte) = self.transport.as_ref().and_then(Transport::backspace_byte) {
            self.backspace = byte;
        }
    }

    /// Tell the job its input ended.
    pub fn send_eof(&mut self) {
        match &self.eof_chars {
            Some(chars) => {
                let mut bytes = chars.clone().into_bytes();
                bytes.push(b'\r');
                self.write_to_job(&bytes);
            }
            None => self.write_to_job(b"\x04"),
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.close_stdin();
        }
    }

    pub fn job_status(&mut self) -> Option<JobStatus> {
        self.transport.as_mut().and_then(Transport::status)
    }

    /// True while the job runs and its channel is open
    pub fn job_running(&mut self) -> bool {
        if self.channel_closed {
            return false;
        }
        let pty_only = self.transport.as_ref().is_some_and(Transport::is_pty_only);
        pty_only || self.job_status().is_some_and(|s| s.is_running())
    }

    /// True for a pty without a job whose channel is open
    pub fn none_open(&self) -> bool {
        !self.channel_closed && self.transport.as_ref().is_some_and(Transport::is_pty_only)
    }

    /// Ask the job to stop using the configured kill signal.
    /// Returns false when no kill method is set.
    pub fn request_stop(&mut self) -> Result<bool> {
        let Some(how) = self.kill.clone() else {
            return Ok(false);
        };
        match self.transport.as_mut() {
            Some(transport) => {
                transport.stop(&how)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// "running" or "finished", with ",normal" in normal mode.
    pub fn status(&mut self) -> String {
        let mut status = if self.job_running() { "running" } else { "finished" }.to_string();
        if self.normal_mode {
            status.push_str(",normal");
        }
        status
    }

    /// `<name> [<state>]` for status lines, cached until the state changes.
    pub fn status_text(&mut self) -> String {
        if let Some(text) = &self.status_text {
            return text.clone();
        }
        let running = self.job_running();
        let state = if self.normal_mode {
            if running { "Terminal" } else { "Terminal-finished" }.to_string()
        } else if let Some(title) = &self.title {
            title.clone()
        } else if self.none_open() {
            "active".to_string()
        } else if running {
            "running".to_string()
        } else {
            "finished".to_string()
        };
        let text = format!("{} [{}]", self.text.name, state);
        self.status_text = Some(text.clone());
        text
    }

    pub fn tty_name(&self, part: StreamPart) -> Option<String> {
        self.transport.as_ref().and_then(|t| t.tty_name(part))
    }

    /// Text of screen row `row`.
    pub fn get_line(&self, row: usize) -> Option<String> {
        match &self.engine {
            Some(engine) => engine.screen_text(u16::try_from(row).ok()?),
            None => self.text.line(row + self.scrolled).map(str::to_string),
        }
    }

    /// Cells of screen row `row`.
    pub fn scrape(&self, row: usize) -> Vec<ScrapedCell> {
        let mut cells = Vec::new();
        match &self.engine {
            Some(engine) => {
                let Ok(row) = u16::try_from(row) else {
                    return cells;
                };
                let mut col = 0;
                while col < self.cols {
                    let Some(cell) = engine.cell(row, col) else {
                        break;
                    };
                    cells.push(ScrapedCell {
                        chars: cell.chars.clone(),
                        fg: hex_rgb(&cell.fg),
                        bg: hex_rgb(&cell.bg),
                        attr: cell.flags.to_hl(),
                        width: cell.width,
                    });
                    col += if cell.width == 2 { 2 } else { 1 };
                }
            }
            None => {
                let lnum = row + self.scrolled;
                let (Some(line), Some(text)) = (self.scrollback.get(lnum), self.text.line(lnum)) else {
                    return cells;
                };
                let mut glyphs = glyphs(text).into_iter();
                let mut col = 0;
                while col < line.cols() {
                    let attr = line.attr_at(col);
                    cells.push(ScrapedCell {
                        chars: glyphs.next().unwrap_or_default().to_string(),
                        fg: hex_rgb(&attr.fg),
                        bg: hex_rgb(&attr.bg),
                        attr: attr.flags.to_hl(),
                        width: attr.width,
                    });
                    col += if attr.width == 2 { 2 } else { 1 };
                }
            }
        }
        cells
    }

    /// 1-based cursor row and column plus the cursor properties.
    pub fn get_cursor(&self) -> (usize, usize, CursorProps) {
        (
            self.cursor_pos.row as usize + 1,
            self.cursor_pos.col as usize + 1,
            self.cursor.clone(),
        )
    }

    /// Attribute for text line `lnum` column `col` when painting history.
    pub fn get_attr(&self, lnum: usize, col: usize) -> CellAttr {
        match self.scrollback.get(lnum) {
            Some(line) => *line.attr_at(col),
            None => self.default_attr,
        }
    }
}

/// Test a style flag by name: bold, italic, underline, strike, reverse.
pub fn attr_has(attr: u32, name: &str) -> bool {
    StyleFlags::from_attr_name(name).is_some_and(|flag| StyleFlags::from_hl(attr).contains(flag))
}

impl Drop for Session {
    fn drop(&mut self) {
        // Stop a job that is still running; the transport joins its threads
        if !self.channel_closed {
            if let Some(transport) = self.transport.as_mut() {
                if transport.has_job() && transport.status() == Some(JobStatus::Running) {
                    let how = self.kill.clone().unwrap_or_else(|| "kill".to_string());
                    if let Err(e) = transport.stop(&how) {
                        tracing::warn!("Failed to stop job of '{}': {}", self.text.name, e);
                    }
                }
            }
        }
        self.free_engine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::INDEX_DEFAULT;
    use crate::core::scrollback::SbLine;
    use crate::core::term::VtEngine;

    fn engine(rows: u16, cols: u16) -> Box<dyn Engine> {
        Box::new(VtEngine::new(
            rows,
            cols,
            TermColor::new(255, 255, 255, INDEX_DEFAULT),
            TermColor::new(0, 0, 0, INDEX_DEFAULT),
        ))
    }

    fn session(rows: u16, cols: u16) -> Session {
        let mut s = Session::new("!test", &SessionOptions::default(), engine(rows, cols));
        s.started = true;
        s
    }

    #[test]
    fn test_dirty_range() {
        let mut range = DirtyRange::EMPTY;
        assert!(range.is_empty());
        assert_eq!(range.take(), None);
        range.widen(3, 5);
        range.widen(1, 2);
        assert_eq!((range.start, range.end), (1, 5));
        assert!(range.contains(4));
        assert_eq!(range.take(), Some((1, 5)));
        assert!(range.is_empty());
    }

    #[test]
    fn test_migrate_keeps_blank_row_with_other_fill() {
        let mut s = session(2, 3);
        s.write_job_output(b"\x1b[31mab\x1b[0m\r\n\x1b[44m\x1b[K");
        s.migrate_screen();

        assert_eq!(s.scrollback.len(), 2);
        assert_eq!(s.scrollback.get(0).map(SbLine::cols), Some(2));
        assert_eq!(s.scrollback.get(1).map(SbLine::cols), Some(0));
        assert_eq!(s.text.lines(), &["ab", ""]);
    }

    #[test]
    fn test_migrate_skips_trailing_blank_rows() {
        let mut s = session(4, 5);
        s.write_job_output(b"hi");
        s.migrate_screen();
        assert_eq!(s.text.lines(), &["hi"]);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut s = session(3, 5);
        s.write_job_output(b"one\r\n\r\nthree");
        s.migrate_screen();
        let first = (s.text.clone(), s.scrollback.clone());
        s.migrate_screen();
        assert_eq!((s.text.clone(), s.scrollback.clone()), first);
        assert_eq!(s.text.lines(), &["one", "", "three"]);
    }

    #[test]
    fn test_push_line_counts() {
        let mut s = session(2, 4);
        let before = (s.scrolled(), s.text.len());
        s.write_job_output(b"a\r\nb\r\nc\r\nd");
        assert_eq!(s.scrolled() - before.0, 2);
        assert_eq!(s.text.len() - before.1, 2);
        assert_eq!(s.text.lines(), &["a", "b"]);
        assert_eq!(s.get_line(0).as_deref(), Some("c"));
    }

    #[test]
    fn test_push_line_in_normal_mode_goes_before_screen() {
        let mut s = session(2, 4);
        s.write_job_output(b"a\r\nb");
        s.enter_normal_mode().unwrap();
        assert_eq!(s.text.lines(), &["a", "b"]);
        s.write_job_output(b"\r\nc");
        assert_eq!(s.text.lines(), &["a", "a", "b"]);
        assert_eq!(s.scrolled(), 1);

        s.enter_job_mode();
        assert_eq!(s.text.lines(), &["a"]);
        assert_eq!(s.scrollback.len(), 1);
    }

    #[test]
    fn test_damage_and_scroll_updates() {
        let mut s = session(3, 4);
        let updates = s.write_job_output(b"x\r\ny\r\nz\r\n");
        assert!(updates.iter().any(|u| matches!(u, ViewUpdate::ScrollUp { row: 0, count: 1, .. })));
        assert!(updates.contains(&ViewUpdate::Repaint));
        assert!(!s.dirty.is_empty());
        assert_eq!(s.cursor_pos(), Pos::new(2, 0));
    }

    #[test]
    fn test_job_resize_moves_views_but_host_resize_does_not() {
        let mut s = session(3, 10);
        let updates = s.write_job_output(b"\x1b[8;5;20t");
        assert!(updates.contains(&ViewUpdate::Resize { rows: 5, cols: 20 }));
        assert_eq!(s.size(), (5, 20));

        let updates = s.set_size(6, 30);
        assert_eq!(s.size(), (6, 30));
        assert_eq!(s.engine().map(|e| e.size()), Some((6, 30)));
        assert!(!updates.iter().any(|u| matches!(u, ViewUpdate::Resize { .. })));
        assert!(s.set_size(6, 30).is_empty());
    }

    #[test]
    fn test_host_shrink_reports_cursor_and_damage() {
        let mut s = session(4, 10);
        s.write_job_output(b"abc
def
ghi
jkl");
        s.dirty.take();

        let updates = s.set_size(2, 10);
        assert!(updates.contains(&ViewUpdate::Cursor {
            pos: Pos::new(1, 3),
            visible: true,
        }));
        assert!(!s.dirty.is_empty());
    }

    #[test]
    fn test_title_and_status_text() {
        let mut s = session(3, 10);
        assert_eq!(s.status_text(), "!test [finished]");
        s.write_job_output(b"\x1b]2;vim\x07");
        assert_eq!(s.title(), Some("vim"));
        assert_eq!(s.status_text(), "!test [vim]");

        s.write_job_output(b"\x1b]2;  \x07");
        assert_eq!(s.title(), None);
    }

    #[test]
    fn test_channel_close_finishes_session() {
        let mut s = session(2, 6);
        s.write_job_output(b"bye");
        let (_, action) = s.on_channel_closed();
        assert_eq!(action, Some(FinishAction::Keep));
        assert_eq!(s.lifecycle(), Lifecycle::Finished);
        assert_eq!(s.text.lines(), &["bye"]);
        assert_eq!(s.get_line(0).as_deref(), Some("bye"));

        s.free_engine();
        assert_eq!(s.lifecycle(), Lifecycle::Finished);
    }

    #[test]
    fn test_close_policy_skips_migration() {
        let mut s = session(2, 6);
        s.set_finish(Some(FinishPolicy::Close));
        s.write_job_output(b"bye");
        let (_, action) = s.on_channel_closed();
        assert_eq!(action, Some(FinishAction::Close));
        assert!(s.text.is_empty());
    }

    #[test]
    fn test_channel_close_in_normal_mode_waits() {
        let mut s = session(2, 6);
        s.write_job_output(b"bye");
        s.enter_normal_mode().unwrap();
        let (_, action) = s.on_channel_closed();
        assert_eq!(action, None);
        assert_eq!(s.lifecycle(), Lifecycle::ChannelClosed);

        let (_, action) = s.enter_job_mode();
        assert_eq!(action, Some(FinishAction::Keep));
        assert_eq!(s.lifecycle(), Lifecycle::Finished);
        assert_eq!(s.text.lines(), &["bye"]);
    }

    #[test]
    fn test_scrape_live_and_finished() {
        let mut s = session(2, 4);
        s.write_job_output(b"\x1b[1ma\xe6\xbc\xa2");
        let live = s.scrape(0);
        assert_eq!(live.len(), 3);
        assert_eq!(live[0].chars, "a");
        assert!(attr_has(live[0].attr, "bold"));
        assert_eq!(live[1].width, 2);
        assert_eq!(live[2].chars, "");

        s.on_channel_closed();
        let finished = s.scrape(0);
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[1].chars, "漢");
        assert_eq!(finished[0].fg, "#ffffff");
    }

    #[test]
    fn test_restore_command() {
        let options = SessionOptions {
            command: Some("bash".to_string()),
            ..SessionOptions::default()
        };
        let mut s = Session::new("!bash", &options, engine(2, 2));
        assert_eq!(s.restore_command("bash"), None);
        assert_eq!(s.restore_command("zsh").as_deref(), Some("bash"));
        s.set_restore(Some("bash -l".to_string()));
        assert_eq!(s.restore_command("bash").as_deref(), Some("bash -l"));
        s.norestore = true;
        assert_eq!(s.restore_command("bash").as_deref(), Some("NONE"));
    }

    #[test]
    fn test_get_attr_falls_back_to_fill_and_default() {
        let mut s = session(2, 4);
        s.write_job_output(b"\x1b[32mab\x1b[0m");
        s.on_channel_closed();
        let green = s.get_attr(0, 0);
        assert_ne!(green.fg, s.default_attr().fg);
        assert_eq!(s.get_attr(0, 3), *s.scrollback.get(0).map(SbLine::fill).unwrap());
        assert_eq!(s.get_attr(50, 0), *s.default_attr());
    }

    #[cfg(unix)]
    #[test]
    fn test_eof_on_cat_finishes() {
        use crate::core::pty::TransportKind;
        use std::time::{Duration, Instant};

        let options = SessionOptions {
            command: Some("cat".to_string()),
            ..SessionOptions::default()
        };
        let mut s = Session::new("!cat", &options, engine(5, 20));
        let transport = Transport::spawn(TransportKind::Pty, Some("cat"), 5, 20).unwrap();
        s.attach(transport);
        assert_eq!(s.lifecycle(), Lifecycle::JobMode);

        s.send_eof();
        let deadline = Instant::now() + Duration::from_secs(5);
        while s.lifecycle() != Lifecycle::Finished && Instant::now() < deadline {
            s.poll();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(s.lifecycle(), Lifecycle::Finished);
        assert_eq!(s.status(), "finished");
    }
}
