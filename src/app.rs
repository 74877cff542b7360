//! Application context
//!
//! `App` ties the session registry, the views and the input state together
//! and exposes the operations a host drives sessions with:
//!
//! - starting and closing sessions
//! - pumping job output into sessions and repainting their panes
//! - routing keys, mouse events and pastes to the active session
//! - the query API (status, size, lines, cells, cursor, tty names)
//! - writing, loading, diffing and swapping screen dumps

use std::path::Path;
use std::thread;
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};

use crate::config::{Config, FinishPolicy, SessionOptions};
use crate::core::pty::{StreamPart, Transport};
use crate::core::registry::{Registry, SessionId};
use crate::core::scrollback::CellAttr;
use crate::core::session::{CursorProps, FinishAction, Result, ScrapedCell, Session, SessionError, ViewUpdate};
use crate::core::term::{Engine, Pos, VtEngine};
use crate::dump::{self, DumpOptions};
use crate::ui::keymapper::{
    self, KeyAction, MouseOutcome, MouseRouter, Registers, Selection, TermKeys,
};
use crate::ui::renderer::Coordinator;
use crate::wm::{PaneId, WindowManager};

/// Poll interval of the waiting loops
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Polls after asking a job to stop
const STOP_POLLS: usize = 100;

/// Application state
pub struct App {
    pub registry: Registry,
    pub wm: WindowManager,
    config: Config,
    coordinator: Coordinator,
    registers: Registers,
    term_keys: TermKeys,
    mouse: MouseRouter,
    selection: Selection,
    /// Prefix typed while the active session shows text
    text_prefix: Option<KeyEvent>,
}

impl App {
    /// Create the application for a host screen of `width` x `height`
    pub fn new(config: Config, width: u16, height: u16) -> Self {
        Self {
            registry: Registry::new(),
            wm: WindowManager::new(width, height),
            coordinator: Coordinator::new(config.color_context()),
            term_keys: TermKeys::new(&config.termkey),
            registers: Registers::new(),
            mouse: MouseRouter::new(),
            selection: Selection::default(),
            text_prefix: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Open a session running `options.command` and show it in a new pane.
    ///
    /// Nothing stays registered when the job cannot be started.
    pub fn start_terminal(&mut self, options: SessionOptions) -> Result<SessionId> {
        let name = self.unique_name(&session_name(&options));
        let rows = if options.rows_fixed { options.rows } else { self.wm.height };
        let cols = if options.cols_fixed { options.cols } else { self.wm.width };

        let (fg, bg) = self.coordinator.colors().default_colors();
        let mut engine = VtEngine::new(rows, cols, fg, bg);
        engine.set_cursor_blink(false);
        let session = Session::new(name, &options, Box::new(engine));
        let id = self.registry.insert(session);
        let pane = self.wm.open_full(id);

        let transport = match Transport::spawn(options.transport, options.command.as_deref(), rows, cols) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!("Failed to start terminal: {}", e);
                self.wm.close(pane);
                self.registry.remove(id);
                return Err(e.into());
            }
        };
        if let Some(session) = self.registry.get_mut(id) {
            session.attach(transport);
        }
        self.registry.set_active(Some(id));
        self.refresh(id);
        Ok(id)
    }

    /// `base`, or `base (N)` with the first N not in use
    fn unique_name(&self, base: &str) -> String {
        if self.registry.find_by_name(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{} ({})", base, n))
            .find(|name| self.registry.find_by_name(name).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    /// Register a session that only holds text and show it
    fn open_text_session(&mut self, session: Session) -> SessionId {
        let id = self.registry.insert(session);
        self.wm.open_full(id);
        self.registry.set_active(Some(id));
        self.refresh(id);
        id
    }

    /// Close a session and every pane showing it. A running job is asked
    /// to stop first when a kill method is set.
    pub fn close_session(&mut self, id: SessionId) -> bool {
        let running = self.registry.get_mut(id).is_some_and(|s| s.job_running());
        if running {
            if let Err(e) = self.try_stop(id) {
                tracing::warn!("Failed to stop job: {}", e);
            }
        }
        self.wm.close_session(id);
        let removed = self.registry.remove(id).is_some();
        if self.registry.active().is_none() {
            let next = self.wm.focused().map(|p| p.session);
            self.registry.set_active(next);
        }
        removed
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.registry.get_mut(id).ok_or(SessionError::UnknownSession)
    }

    fn session(&self, id: SessionId) -> Result<&Session> {
        self.registry.get(id).ok_or(SessionError::UnknownSession)
    }

    /// Apply session updates to the panes and repaint them
    fn apply(&mut self, id: SessionId, updates: &[ViewUpdate]) {
        if let Some(session) = self.registry.get_mut(id) {
            self.coordinator.apply(id, session, &mut self.wm, updates);
            self.coordinator.update_session(id, session, &mut self.wm);
        }
    }

    fn refresh(&mut self, id: SessionId) {
        self.apply(id, &[]);
    }

    fn repaint_text(&mut self, id: SessionId) {
        for pane in self.wm.showing_mut(id) {
            pane.needs_full = true;
        }
        self.refresh(id);
    }

    /// Pump job output of every session. Returns true when something
    /// changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        for id in self.registry.list().to_vec() {
            let Some(session) = self.registry.get_mut(id) else {
                continue;
            };
            let (updates, action) = session.poll();
            changed |= !updates.is_empty() || action.is_some();
            self.apply(id, &updates);
            if let Some(action) = action {
                self.finish(id, action);
            }
        }
        changed
    }

    fn finish(&mut self, id: SessionId, action: FinishAction) {
        match action {
            FinishAction::Close => {
                self.close_session(id);
            }
            FinishAction::Open(command) => {
                if !self.wm.is_shown(id) {
                    tracing::debug!("Showing finished terminal ({})", command);
                    self.wm.open_full(id);
                    self.refresh(id);
                }
            }
            FinishAction::Keep => {}
        }
    }

    /// Resize the host screen
    pub fn resize_host(&mut self, width: u16, height: u16) {
        self.wm.resize(width, height);
        for id in self.registry.list().to_vec() {
            self.refresh(id);
        }
    }

    /// Let the job of `id` run for `ms` milliseconds (10 when `None`).
    ///
    /// When the job already died, wait for its output to drain instead.
    pub fn wait(&mut self, id: SessionId, ms: Option<u64>) -> Result<()> {
        let session = self.session_mut(id)?;
        if session.transport_mut().is_none() {
            tracing::info!("wait: '{}' has no job", session.name());
            return Ok(());
        }
        let died = session.job_status().is_some_and(|status| !status.is_running());
        if died {
            while self.registry.get(id).is_some_and(|s| !s.channel_closed()) {
                self.poll();
                thread::sleep(POLL_INTERVAL);
            }
            return Ok(());
        }
        self.poll();
        thread::sleep(ms.map_or(POLL_INTERVAL, Duration::from_millis));
        self.poll();
        Ok(())
    }

    /// Stop the job with the session's kill method and wait a bounded
    /// time for it to go. Returns true when it is gone.
    pub fn try_stop(&mut self, id: SessionId) -> Result<bool> {
        if !self.session_mut(id)?.request_stop()? {
            return Ok(false);
        }
        for _ in 0..STOP_POLLS {
            let Some(session) = self.registry.get_mut(id) else {
                return Ok(true);
            };
            if !session.job_status().is_some_and(|s| s.is_running()) {
                return Ok(true);
            }
            if session.channel_closed() {
                return Ok(true);
            }
            self.poll();
            thread::sleep(POLL_INTERVAL);
        }
        tracing::warn!("Job did not stop in time");
        Ok(false)
    }

    /// Handle a key typed in the host. Returns the keys the host must
    /// handle itself.
    pub fn handle_key(&mut self, key: KeyEvent) -> Result<Vec<KeyEvent>> {
        let Some(id) = self.registry.active() else {
            return Ok(vec![key]);
        };
        let session = self.registry.get_mut(id).ok_or(SessionError::UnknownSession)?;
        if session.is_normal_mode() || session.is_finished() {
            return self.text_key(id, key);
        }
        #[cfg(unix)]
        session.refresh_backspace();

        match self.term_keys.feed(key) {
            KeyAction::Send(keys) => {
                for key in &keys {
                    keymapper::send_key(session, key);
                }
            }
            KeyAction::Pending => {}
            KeyAction::NormalMode => {
                let updates = session.enter_normal_mode()?;
                self.apply(id, &updates);
            }
            KeyAction::Stop(key) => {
                if let Some(transport) = session.transport_mut() {
                    if let Err(e) = transport.stop("kill") {
                        tracing::warn!("Failed to stop job: {}", e);
                    }
                }
                keymapper::send_key(session, &key);
            }
            KeyAction::PasteRegister(name) => match self.registers.get(name) {
                Some(register) => {
                    let text = String::from_utf8_lossy(&register.paste_bytes()).into_owned();
                    keymapper::send_text(session, &text);
                }
                None => tracing::debug!("Register '{}' is empty", name),
            },
            KeyAction::Host(keys) => return Ok(keys),
        }
        Ok(Vec::new())
    }

    /// Keys while the session shows text: move through the lines or go
    /// back to job mode.
    fn text_key(&mut self, id: SessionId, key: KeyEvent) -> Result<Vec<KeyEvent>> {
        if let Some(prefix) = self.text_prefix.take() {
            return Ok(vec![prefix, key]);
        }
        if self.term_keys.is_prefix(&key) {
            self.text_prefix = Some(key);
            return Ok(Vec::new());
        }
        let current = self.wm.focused().map_or(0, |p| p.cursor_line);
        let session = self.registry.get_mut(id).ok_or(SessionError::UnknownSession)?;
        let last_line = session.text.len().saturating_sub(1);
        let plain = !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT);
        if !plain {
            return Ok(vec![key]);
        }

        let line = match key.code {
            KeyCode::Char('i' | 'a' | 'I' | 'A') | KeyCode::Insert if session.is_normal_mode() => {
                let (updates, action) = session.enter_job_mode();
                self.apply(id, &updates);
                if let Some(action) = action {
                    self.finish(id, action);
                }
                return Ok(Vec::new());
            }
            KeyCode::Char('j') | KeyCode::Down => (current + 1).min(last_line),
            KeyCode::Char('k') | KeyCode::Up => current.saturating_sub(1),
            KeyCode::Char('g') | KeyCode::Home => 0,
            KeyCode::Char('G') | KeyCode::End => last_line,
            _ => return Ok(vec![key]),
        };
        if let Some(pane) = self.wm.focused_mut() {
            pane.cursor_line = line;
            pane.scroll_to_cursor_line();
            let row = pane.cursor_line.saturating_sub(pane.top_line) as u16;
            pane.position_cursor(Pos::new(row, 0));
            pane.needs_full = true;
        }
        self.refresh(id);
        Ok(Vec::new())
    }

    /// Handle a mouse event. Returns the event when the host must handle
    /// it.
    pub fn handle_mouse(&mut self, event: MouseEvent) -> Option<MouseEvent> {
        if let MouseEventKind::Down(_) = event.kind {
            self.focus_at(event.column, event.row);
        }
        let (pane_id, area, id) = {
            let pane = self.wm.focused()?;
            (pane.id, pane.area(), pane.session)
        };
        let session = self.registry.get_mut(id)?;
        match self.mouse.route(session, &event, area, &mut self.selection) {
            MouseOutcome::Host => return Some(event),
            MouseOutcome::SelectionDone => self.yank_selection(pane_id),
            MouseOutcome::PasteClipboard => {
                if let Some(register) = self.registers.get('*') {
                    keymapper::send_paste(session, &register.lines.join("\n"));
                }
            }
            MouseOutcome::Sent | MouseOutcome::Selection | MouseOutcome::Dropped => {}
        }
        None
    }

    /// Focus the pane under a click; the click is remembered so a drag can
    /// start a selection there.
    fn focus_at(&mut self, col: u16, row: u16) {
        let target = self
            .wm
            .panes()
            .filter(|p| p.contains(col, row))
            .last()
            .map(|p| (p.id, p.session, Pos::new(row - p.y, col - p.x)));
        let Some((pane, session, pos)) = target else {
            return;
        };
        if self.wm.focused().map(|p| p.id) != Some(pane) {
            self.wm.set_focus(pane);
            self.registry.set_active(Some(session));
            self.mouse.focus_click(pos);
        }
    }

    fn yank_selection(&mut self, pane: PaneId) {
        let Some(pane) = self.wm.get(pane) else {
            return;
        };
        let text = self.selection.text(|row| Some(pane.row_text(row)));
        if !text.is_empty() {
            self.registers.yank_selection(&text);
        }
    }

    /// Paste host text into the active session
    pub fn handle_paste(&mut self, text: &str) {
        if let Some(session) = self.registry.active().and_then(|id| self.registry.get_mut(id)) {
            keymapper::send_paste(session, text);
        }
    }

    /// The host got focus back: the erase character may have changed.
    pub fn focus_gained(&mut self) {
        if let Some(session) = self.registry.active().and_then(|id| self.registry.get_mut(id)) {
            session.refresh_backspace();
        }
    }

    // Query API

    /// Sessions, newest first
    pub fn list(&self) -> Vec<SessionId> {
        self.registry.list().to_vec()
    }

    pub fn get_status(&mut self, id: SessionId) -> Result<String> {
        Ok(self.session_mut(id)?.status())
    }

    pub fn get_size(&self, id: SessionId) -> Result<(u16, u16)> {
        Ok(self.session(id)?.size())
    }

    /// Resize the session; zero keeps an axis. The axes given are pinned.
    pub fn set_size(&mut self, id: SessionId, rows: u16, cols: u16) -> Result<()> {
        let session = self.session_mut(id)?;
        let (cur_rows, cur_cols) = session.size();
        let (rows_fixed, cols_fixed) = session.fixed();
        session.set_fixed(rows_fixed || rows > 0, cols_fixed || cols > 0);
        let rows = if rows == 0 { cur_rows } else { rows };
        let cols = if cols == 0 { cur_cols } else { cols };
        let updates = session.set_size(rows, cols);
        self.apply(id, &updates);
        Ok(())
    }

    pub fn get_scrolled(&self, id: SessionId) -> Result<usize> {
        Ok(self.session(id)?.scrolled())
    }

    pub fn get_title(&self, id: SessionId) -> Result<Option<String>> {
        Ok(self.session(id)?.title().map(str::to_string))
    }

    pub fn get_alt_screen(&self, id: SessionId) -> Result<bool> {
        Ok(self.session(id)?.using_alt_screen())
    }

    /// tty name of the job's output (0) or input (1)
    pub fn get_tty(&self, id: SessionId, which: u8) -> Result<Option<String>> {
        let part = match which {
            0 => StreamPart::Out,
            1 => StreamPart::In,
            other => return Err(SessionError::InvalidArgument(format!("tty {}", other))),
        };
        Ok(self.session(id)?.tty_name(part))
    }

    pub fn get_cursor(&self, id: SessionId) -> Result<(usize, usize, CursorProps)> {
        Ok(self.session(id)?.get_cursor())
    }

    /// Text of screen row `row`; "." is the cursor row.
    pub fn get_line(&self, id: SessionId, row: &str) -> Result<Option<String>> {
        let session = self.session(id)?;
        let row = parse_row(session, row)?;
        Ok(session.get_line(row))
    }

    /// Cells of screen row `row`; "." is the cursor row.
    pub fn scrape(&self, id: SessionId, row: &str) -> Result<Vec<ScrapedCell>> {
        let session = self.session(id)?;
        let row = parse_row(session, row)?;
        Ok(session.scrape(row))
    }

    /// Attribute used to paint text line `lnum` column `col`
    pub fn get_attr(&self, id: SessionId, lnum: usize, col: usize) -> Result<CellAttr> {
        Ok(self.session(id)?.get_attr(lnum, col))
    }

    pub fn set_kill(&mut self, id: SessionId, how: Option<String>) -> Result<()> {
        self.session_mut(id)?.set_kill(how);
        Ok(())
    }

    pub fn set_finish(&mut self, id: SessionId, finish: Option<FinishPolicy>) -> Result<()> {
        self.session_mut(id)?.set_finish(finish);
        Ok(())
    }

    pub fn restore_command(&self, id: SessionId) -> Result<Option<String>> {
        let shell = self.config.shell();
        Ok(self.session(id)?.restore_command(&shell))
    }

    pub fn set_restore(&mut self, id: SessionId, command: Option<String>) -> Result<()> {
        self.session_mut(id)?.set_restore(command);
        Ok(())
    }

    /// Type `text` into the session, one key per character
    pub fn send_keys(&mut self, id: SessionId, text: &str) -> Result<()> {
        keymapper::send_text(self.session_mut(id)?, text);
        Ok(())
    }

    /// Tell the job its input ended
    pub fn send_eof(&mut self, id: SessionId) -> Result<()> {
        self.session_mut(id)?.send_eof();
        Ok(())
    }

    // Dumps

    /// Write the live screen of `id` to `path`; the file must not exist.
    pub fn dump_write(&self, id: SessionId, path: &Path, opts: DumpOptions) -> Result<()> {
        let engine = self.session(id)?.engine().ok_or(SessionError::NoEngine)?;
        dump::write_dump(engine, path, opts)?;
        Ok(())
    }

    fn default_attr(&self) -> CellAttr {
        let (fg, bg) = self.coordinator.colors().default_colors();
        CellAttr::with_colors(fg, bg)
    }

    /// Open a finished session showing the dump in `path`
    pub fn dump_load(&mut self, path: &Path) -> Result<SessionId> {
        let image = dump::read_dump(path)?;
        if image.is_corrupt() {
            tracing::warn!("Dump {} is corrupt", path.display());
        }
        let fill = self.default_attr();
        let name = self.unique_name(&format!("dump diff {}", path.display()));
        let rows = dump_size(image.rows.len(), "rows")?;
        let cols = dump_size(image.max_cells, "columns")?;
        let cursor = match image.cursor_column() {
            Some((row, col)) => Some((row, dump_size(row, "rows")?, dump_size(col, "columns")?)),
            None => None,
        };

        let mut session = Session::detached(name, fill);
        dump::append_image(&image, &fill, &mut session.scrollback, &mut session.text);
        session.set_text_size(rows, cols);
        if let Some((_, row, col)) = cursor {
            session.set_text_cursor(Pos::new(row, col));
        }

        let id = self.open_text_session(session);
        if let Some((line, _, col)) = cursor {
            if let Some(pane) = self.wm.focused_mut() {
                pane.cursor_line = line;
                pane.scroll_to_cursor_line();
                let row = pane.cursor_line.saturating_sub(pane.top_line);
                pane.position_cursor(Pos::new(u16::try_from(row).unwrap_or(u16::MAX), col));
            }
            self.repaint_text(id);
        }
        Ok(id)
    }

    /// Open a finished session showing the diff of two dumps
    pub fn dump_diff(&mut self, first: &Path, second: &Path) -> Result<SessionId> {
        let a = dump::read_dump(first)?;
        let b = dump::read_dump(second)?;
        let fill = self.default_attr();
        let name = self.unique_name(&format!("dump diff {}", first.display()));
        let mut session = Session::detached(name, fill);
        let rows = dump::build_diff(&a, &b, &fill, &mut session.scrollback, &mut session.text);
        session.set_text_size(
            dump_size(session.text.len(), "rows")?,
            dump_size(rows.width, "columns")?,
        );
        session.diff_rows = Some(rows);
        tracing::debug!("Diff of {} and {}: {:?}", first.display(), second.display(), rows);
        Ok(self.open_text_session(session))
    }

    /// Exchange the top and bottom dumps of a diff session
    pub fn swap_diff(&mut self, id: SessionId) -> Result<()> {
        let session = self.session_mut(id)?;
        if !session.is_finished() {
            return Err(SessionError::InvalidState("terminal is still running"));
        }
        let mut rows = session
            .diff_rows
            .filter(|rows| rows.top > 0)
            .ok_or(SessionError::InvalidState("not a dump diff"))?;
        if !dump::swap_diff(&mut session.scrollback, &mut session.text, &mut rows) {
            return Err(SessionError::InvalidState("not a dump diff"));
        }
        session.diff_rows = Some(rows);
        self.repaint_text(id);
        Ok(())
    }

    /// Text lines of a session
    pub fn text_lines(&self, id: SessionId) -> Result<&[String]> {
        Ok(self.session(id)?.text.lines())
    }

    /// Freeze the session view; the engine stays alive until back in job
    /// mode, even when the job ends meanwhile.
    pub fn enter_normal_mode(&mut self, id: SessionId) -> Result<()> {
        let updates = self.session_mut(id)?.enter_normal_mode()?;
        self.apply(id, &updates);
        Ok(())
    }

    /// Leave normal mode
    pub fn enter_job_mode(&mut self, id: SessionId) -> Result<()> {
        let (updates, action) = self.session_mut(id)?.enter_job_mode();
        self.apply(id, &updates);
        if let Some(action) = action {
            self.finish(id, action);
        }
        Ok(())
    }
}

/// Name of a new session before making it unique
fn session_name(options: &SessionOptions) -> String {
    match (&options.name, &options.command) {
        (Some(name), _) => name.clone(),
        (None, Some(command)) => format!("!{}", command),
        (None, None) => "!pty".to_string(),
    }
}

fn parse_row(session: &Session, row: &str) -> Result<usize> {
    if row == "." {
        return Ok(session.cursor_pos().row as usize);
    }
    row.trim()
        .parse()
        .map_err(|_| SessionError::InvalidArgument(format!("row '{}'", row)))
}

/// A dump dimension as a screen size
fn dump_size(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| SessionError::InvalidArgument(format!("dump has too many {}: {}", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{StyleFlags, TermColor};
    use crate::core::scrollback::SbLine;
    use crate::core::session::Lifecycle;
    use crate::core::term::ScreenCell;

    fn app() -> App {
        App::new(Config::default(), 20, 5)
    }

    fn text_session(app: &App, name: &str, lines: &[&str]) -> Session {
        let fill = app.default_attr();
        let mut session = Session::detached(name, fill);
        for line in lines {
            let cells = vec![fill; line.chars().count()];
            session.scrollback.push(SbLine::new(cells, fill));
            session.text.append(*line);
        }
        session
    }

    fn cell(ch: &str, fg: TermColor, bg: TermColor) -> ScreenCell {
        ScreenCell {
            chars: ch.to_string(),
            width: 1,
            flags: StyleFlags::empty(),
            fg,
            bg,
        }
    }

    #[test]
    fn test_session_names() {
        let options = SessionOptions {
            command: Some("top".to_string()),
            ..SessionOptions::default()
        };
        assert_eq!(session_name(&options), "!top");
        assert_eq!(session_name(&SessionOptions::default()), "!pty");
        let named = SessionOptions {
            name: Some("logs".to_string()),
            ..options
        };
        assert_eq!(session_name(&named), "logs");

        let mut app = app();
        let first = text_session(&app, "!top", &[]);
        app.open_text_session(first);
        assert_eq!(app.unique_name("!top"), "!top (1)");
        let second = text_session(&app, "!top (1)", &[]);
        app.open_text_session(second);
        assert_eq!(app.unique_name("!top"), "!top (2)");
        assert_eq!(app.unique_name("!sh"), "!sh");
    }

    #[test]
    fn test_text_session_paints_and_queries() {
        let mut app = app();
        let session = text_session(&app, "text", &["hello", "world"]);
        let id = app.open_text_session(session);

        assert_eq!(app.list(), vec![id]);
        assert_eq!(app.registry.active(), Some(id));
        let pane = app.wm.focused().unwrap();
        assert!(pane.row_text(0).starts_with("hello"));
        assert!(pane.row_text(1).starts_with("world"));

        assert_eq!(app.get_line(id, "1").unwrap().as_deref(), Some("world"));
        assert_eq!(app.get_line(id, ".").unwrap().as_deref(), Some("hello"));
        assert!(matches!(app.get_line(id, "x"), Err(SessionError::InvalidArgument(_))));
        assert_eq!(app.scrape(id, "0").unwrap().len(), 5);
        assert_eq!(app.get_status(id).unwrap(), "finished");
        assert!(matches!(app.get_tty(id, 2), Err(SessionError::InvalidArgument(_))));
        assert_eq!(app.get_tty(id, 0).unwrap(), None);
    }

    #[test]
    fn test_close_session_removes_panes() {
        let mut app = app();
        let a = text_session(&app, "a", &["a"]);
        let a = app.open_text_session(a);
        let b = text_session(&app, "b", &["b"]);
        let b = app.open_text_session(b);
        assert_eq!(app.list(), vec![b, a]);

        assert!(app.close_session(b));
        assert!(!app.wm.is_shown(b));
        assert_eq!(app.registry.active(), Some(a));
        assert!(matches!(app.get_status(b), Err(SessionError::UnknownSession)));
        assert!(!app.close_session(b));
    }

    #[test]
    fn test_text_keys_move_cursor_line() {
        let mut app = app();
        let lines: Vec<String> = (0..10).map(|i| format!("line {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let session = text_session(&app, "text", &refs);
        app.open_text_session(session);

        let press = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert!(app.handle_key(press(KeyCode::Char('G'))).unwrap().is_empty());
        let pane = app.wm.focused().unwrap();
        assert_eq!(pane.cursor_line, 9);
        assert_eq!(pane.top_line, 5);
        assert!(pane.row_text(4).starts_with("line 9"));

        app.handle_key(press(KeyCode::Char('k'))).unwrap();
        assert_eq!(app.wm.focused().unwrap().cursor_line, 8);

        // unknown keys go back to the host
        let host = app.handle_key(press(KeyCode::Char('z'))).unwrap();
        assert_eq!(host, vec![press(KeyCode::Char('z'))]);

        // prefix then q reaches the host as a pair
        assert!(app.handle_key(keymapper::ctrl('w')).unwrap().is_empty());
        let host = app.handle_key(press(KeyCode::Char('q'))).unwrap();
        assert_eq!(host, vec![keymapper::ctrl('w'), press(KeyCode::Char('q'))]);
    }

    #[test]
    fn test_dump_load_and_diff() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.dump");
        let second = dir.path().join("second.dump");
        std::fs::write(&first, "|a+0#ffffff0#0000000|b|c\n>d|e|f\n").unwrap();
        std::fs::write(&second, "|a+0#ffffff0#0000000|x|c\n|d|e|f\n").unwrap();

        let mut app = app();
        let loaded = app.dump_load(&first).unwrap();
        assert_eq!(app.text_lines(loaded).unwrap(), ["abc", "def"]);
        assert_eq!(app.get_cursor(loaded).unwrap().0, 2);
        assert!(app.registry.get(loaded).unwrap().name().starts_with("dump diff"));

        let diff = app.dump_diff(&first, &second).unwrap();
        assert_eq!(
            app.text_lines(diff).unwrap(),
            ["abc", "def", "===", " X ", ">  ", "===", "axc", "def"]
        );

        app.swap_diff(diff).unwrap();
        let lines = app.text_lines(diff).unwrap();
        assert_eq!(lines[0], "axc");
        assert_eq!(lines[7], "def");
        assert_eq!(lines[3], " X ");
        let pane = app.wm.focused().unwrap();
        assert!(pane.row_text(0).starts_with("axc"));

        // a plain dump has no diff blocks
        assert!(matches!(app.swap_diff(loaded), Err(SessionError::InvalidState(_))));
    }

    #[test]
    fn test_dump_colors_after_wide_glyph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.dump");
        std::fs::write(&path, "|a+0#ff00002#0000000|\u{6f22}*&&&>b+0#00ff003&\n").unwrap();

        let mut app = app();
        let id = app.dump_load(&path).unwrap();
        let (row, col, _) = app.get_cursor(id).unwrap();
        assert_eq!((row, col), (1, 4));
        assert_eq!(app.get_attr(id, 0, 3).unwrap().fg, TermColor::new(0, 0xff, 0, 3));

        let pane = app.wm.focused().unwrap();
        let red = pane.cell(0, 0).unwrap().attr;
        assert_eq!(pane.cell(0, 1).unwrap().attr, red);
        assert_ne!(pane.cell(0, 3).unwrap().attr, red);
        assert_eq!(pane.cursor, Pos::new(0, 3));
    }

    #[test]
    fn test_dump_too_wide_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.dump");
        std::fs::write(&path, "|a+0#ffffff0#0000000@70000\n").unwrap();

        let mut app = app();
        let err = app.dump_load(&path).unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(app.registry.is_empty());
        assert!(dump_size(65535, "rows").is_ok());
    }

    #[test]
    fn test_dump_write_requires_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app();
        let session = text_session(&app, "text", &["abc"]);
        let id = app.open_text_session(session);
        let path = dir.path().join("out.dump");
        assert!(matches!(
            app.dump_write(id, &path, DumpOptions::default()),
            Err(SessionError::NoEngine)
        ));
    }

    #[test]
    fn test_get_attr_uses_history() {
        let mut app = app();
        let fill = app.default_attr();
        let red = TermColor::new(255, 0, 0, 2);
        let mut session = Session::detached("attrs", fill);
        let cells = [cell("a", red, fill.bg)];
        session.push_line(&cells);
        let id = app.open_text_session(session);
        assert_eq!(app.get_attr(id, 0, 0).unwrap().fg, red);
        assert_eq!(app.get_attr(id, 9, 0).unwrap(), fill);
    }

    #[cfg(unix)]
    #[test]
    fn test_start_terminal_runs_job() {
        let mut app = app();
        let options = SessionOptions {
            command: Some("cat".to_string()),
            ..SessionOptions::default()
        };
        let id = app.start_terminal(options).unwrap();
        assert_eq!(app.get_size(id).unwrap(), (5, 20));
        assert_eq!(app.get_status(id).unwrap(), "running");
        assert!(app.registry.get(id).unwrap().name().starts_with("!cat"));

        app.send_keys(id, "hi\r").unwrap();
        for _ in 0..200 {
            app.wait(id, Some(10)).unwrap();
            if app.get_line(id, "0").unwrap().is_some_and(|l| l.starts_with("hi")) {
                break;
            }
        }
        assert!(app.get_line(id, "0").unwrap().unwrap().starts_with("hi"));

        app.send_eof(id).unwrap();
        for _ in 0..500 {
            app.wait(id, Some(10)).unwrap();
            if app.registry.get(id).map_or(true, |s| s.lifecycle() == Lifecycle::Finished) {
                break;
            }
        }
        assert_eq!(app.get_status(id).unwrap(), "finished");
        assert!(app.text_lines(id).unwrap().iter().any(|l| l.starts_with("hi")));
    }

    #[cfg(unix)]
    #[test]
    fn test_try_stop_gives_up_on_ignored_signal() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("stubborn.sh");
        std::fs::write(&script, "trap '' TERM\necho ready\nsleep 5\n").unwrap();

        let mut app = app();
        let options = SessionOptions {
            command: Some(format!("sh {}", script.display())),
            transport: crate::core::pty::TransportKind::Helper,
            kill: Some("term".to_string()),
            ..SessionOptions::default()
        };
        let id = app.start_terminal(options).unwrap();
        for _ in 0..500 {
            app.wait(id, Some(10)).unwrap();
            if app.get_line(id, "0").unwrap().is_some_and(|l| l.starts_with("ready")) {
                break;
            }
        }
        assert!(app.get_line(id, "0").unwrap().unwrap().starts_with("ready"));

        let started = std::time::Instant::now();
        assert!(!app.try_stop(id).unwrap());
        assert!(started.elapsed() >= POLL_INTERVAL * STOP_POLLS as u32);
        assert_eq!(app.get_status(id).unwrap(), "running");

        app.set_kill(id, Some("kill".to_string())).unwrap();
        assert!(app.try_stop(id).unwrap());
        assert_eq!(app.get_status(id).unwrap(), "finished");
    }

    #[test]
    fn test_try_stop_without_kill_method() {
        let mut app = app();
        let id = app.open_text_session(text_session(&app, "plain", &["x"]));
        assert!(!app.try_stop(id).unwrap());
    }

    #[test]
    fn test_start_failure_leaves_nothing() {
        let mut app = app();
        let options = SessionOptions {
            command: Some("/nonexistent/termhost-test-binary".to_string()),
            transport: crate::core::pty::TransportKind::Helper,
            ..SessionOptions::default()
        };
        assert!(app.start_terminal(options).is_err());
        assert!(app.registry.is_empty());
        assert!(app.wm.is_empty());
    }
}
