//! Process transport
//!
//! A session talks to its job through one of two transports, chosen once when
//! the session is created:
//!
//! - **NativePty**: a pseudo terminal from `portable-pty`; the job runs on the
//!   slave side. Without a command only the pty is opened (pty-only mode).
//! - **HelperProcess**: the job runs with plain pipes for stdin, stdout and
//!   stderr. There is no window size to report.
//!
//! ```text
//! job ──► reader thread(s) ──mpsc──► drain()      (host loop)
//! job ◄── writer thread    ◄──mpsc── write()      (never blocks)
//! ```
//!
//! The reader channel disconnects when every output stream of the job has
//! reached end of file; that is the "channel closed" signal for the session.

use std::io::{Read, Write};
use std::process::{Child as HelperChild, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[cfg(not(unix))]
use portable_pty::ChildKiller;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pseudo terminal: {0}")]
    Open(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Failed to spawn helper process: {0}")]
    Helper(#[source] std::io::Error),

    #[error("Failed to attach to PTY: {0}")]
    Attach(String),

    #[error("Failed to resize pseudo terminal: {0}")]
    Resize(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Failed to stop job: {0}")]
    Stop(#[source] std::io::Error),

    #[error("Empty command")]
    EmptyCommand,
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// Which transport to use for new sessions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Pty,
    Helper,
}

/// State of the job behind a transport
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    /// Exit code, when the platform reports one
    Ended(Option<u32>),
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Running)
    }
}

/// Part of the job's standard streams, for tty queries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPart {
    Out,
    In,
}

/// Conventional backspace byte used until the pty tells otherwise
pub const DEFAULT_BACKSPACE: u8 = 0x7f;

/// Byte channels shared by both transports
struct Pipes {
    output_rx: Receiver<Vec<u8>>,
    input_tx: Option<Sender<Vec<u8>>>,
    running: Arc<AtomicBool>,
    write_failed: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    closed: bool,
}

impl Pipes {
    fn new(
        sources: Vec<Box<dyn Read + Send>>,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let write_failed = Arc::new(AtomicBool::new(false));
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>();

        let readers = sources
            .into_iter()
            .map(|mut source| {
                let tx = output_tx.clone();
                let running = running.clone();
                thread::spawn(move || {
                    let mut buffer = vec![0u8; 4096];
                    while running.load(Ordering::SeqCst) {
                        match source.read(&mut buffer) {
                            Ok(0) => break,
                            Ok(n) => {
                                if tx.send(buffer[..n].to_vec()).is_err() {
                                    break;
                                }
                            }
                            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                            // EIO once the slave side is gone
                            Err(_) => break,
                        }
                    }
                })
            })
            .collect();
        drop(output_tx);

        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>();
        let failed = write_failed.clone();
        let writer = thread::spawn(move || {
            let mut sink = sink;
            for data in input_rx {
                if let Err(e) = sink.write_all(&data).and_then(|_| sink.flush()) {
                    tracing::warn!("Write to job failed: {}", e);
                    failed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        Self {
            output_rx,
            input_tx: Some(input_tx),
            running,
            write_failed,
            readers,
            writer: Some(writer),
            closed: false,
        }
    }

    fn drain(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        loop {
            match self.output_rx.try_recv() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        tracing::debug!("Job output channel closed");
                    }
                    self.closed = true;
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
        data
    }

    fn write(&self, data: &[u8]) -> bool {
        if data.is_empty() || self.write_failed.load(Ordering::SeqCst) {
            return false;
        }
        match &self.input_tx {
            Some(tx) => tx.send(data.to_vec()).is_ok(),
            None => false,
        }
    }

    fn close_input(&mut self) {
        self.input_tx = None;
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pipes {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.close_input();
        // Readers blocked on a live job are left to finish on their own
        if self.closed {
            for handle in self.readers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

pub struct NativePty {
    master: Box<dyn MasterPty + Send>,
    /// Kept open in pty-only mode, where no job holds the slave side
    slave: Option<Box<dyn SlavePty + Send>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    status: Option<JobStatus>,
    pipes: Pipes,
}

pub struct HelperProcess {
    child: HelperChild,
    status: Option<JobStatus>,
    pipes: Pipes,
}

/// The transport of one session
pub enum Transport {
    NativePty(NativePty),
    HelperProcess(HelperProcess),
}

fn split_command(command: &str) -> Result<(String, Vec<String>)> {
    let mut words = command.split_whitespace().map(str::to_string);
    let program = words.next().ok_or(PtyError::EmptyCommand)?;
    Ok((program, words.collect()))
}

impl Transport {
    /// Start `command` (or only open a pty when `None`) with the given size.
    pub fn spawn(kind: TransportKind, command: Option<&str>, rows: u16, cols: u16) -> Result<Self> {
        match (kind, command) {
            (TransportKind::Helper, Some(command)) => Self::spawn_helper(command, rows, cols),
            (_, command) => Self::spawn_pty(command, rows, cols),
        }
    }

    fn spawn_pty(command: Option<&str>, rows: u16, cols: u16) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let (slave, child) = match command {
            Some(command) => {
                let (program, args) = split_command(command)?;
                let mut cmd = CommandBuilder::new(program);
                cmd.args(args);
                if let Ok(cwd) = std::env::current_dir() {
                    cmd.cwd(cwd);
                }
                cmd.env("TERM", "xterm-256color");
                cmd.env("LINES", rows.to_string());
                cmd.env("COLUMNS", cols.to_string());

                let child = pair
                    .slave
                    .spawn_command(cmd)
                    .map_err(|e| PtyError::Spawn(e.to_string()))?;
                // The job holds the slave now; EOF arrives when it exits
                drop(pair.slave);
                (None, Some(child))
            }
            None => (Some(pair.slave), None),
        };

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Attach(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Attach(e.to_string()))?;

        tracing::info!(
            "Opened pty {}x{}{}",
            cols,
            rows,
            command.map(|c| format!(" for '{}'", c)).unwrap_or_default()
        );

        let status = child.as_ref().map(|_| JobStatus::Running);
        Ok(Transport::NativePty(NativePty {
            master: pair.master,
            slave,
            child,
            status,
            pipes: Pipes::new(vec![reader], writer),
        }))
    }

    fn spawn_helper(command: &str, rows: u16, cols: u16) -> Result<Self> {
        let (program, args) = split_command(command)?;
        let mut child = Command::new(program)
            .args(args)
            .env("TERM", "xterm-256color")
            .env("LINES", rows.to_string())
            .env("COLUMNS", cols.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(PtyError::Helper)?;

        let mut sources: Vec<Box<dyn Read + Send>> = Vec::new();
        if let Some(out) = child.stdout.take() {
            sources.push(Box::new(out));
        }
        if let Some(err) = child.stderr.take() {
            sources.push(Box::new(err));
        }
        let stdin: ChildStdin = child
            .stdin
            .take()
            .ok_or_else(|| PtyError::Attach("stdin not piped".to_string()))?;

        tracing::info!("Started helper process for '{}'", command);
        Ok(Transport::HelperProcess(HelperProcess {
            child,
            status: Some(JobStatus::Running),
            pipes: Pipes::new(sources, Box::new(stdin)),
        }))
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::NativePty(_) => TransportKind::Pty,
            Transport::HelperProcess(_) => TransportKind::Helper,
        }
    }

    fn pipes(&self) -> &Pipes {
        match self {
            Transport::NativePty(pty) => &pty.pipes,
            Transport::HelperProcess(helper) => &helper.pipes,
        }
    }

    fn pipes_mut(&mut self) -> &mut Pipes {
        match self {
            Transport::NativePty(pty) => &mut pty.pipes,
            Transport::HelperProcess(helper) => &mut helper.pipes,
        }
    }

    /// True when a job runs behind the transport (false in pty-only mode)
    pub fn has_job(&self) -> bool {
        match self {
            Transport::NativePty(pty) => pty.child.is_some(),
            Transport::HelperProcess(_) => true,
        }
    }

    /// Collect all output that arrived since the last call.
    pub fn drain(&mut self) -> Vec<u8> {
        self.pipes_mut().drain()
    }

    /// True once the job's output streams are all closed
    pub fn is_closed(&self) -> bool {
        self.pipes().closed
    }

    /// Queue bytes for the job. Returns false if they were dropped because
    /// the job's input is already broken.
    pub fn write(&self, data: &[u8]) -> bool {
        self.pipes().write(data)
    }

    pub fn write_failed(&self) -> bool {
        self.pipes().write_failed.load(Ordering::SeqCst)
    }

    /// Close the job's input; only the helper transport has a separate stdin.
    pub fn close_stdin(&mut self) {
        if let Transport::HelperProcess(helper) = self {
            tracing::debug!("Closing helper stdin");
            helper.pipes.close_input();
        }
    }

    /// Tell the job about a new window size.
    pub fn report_winsize(&self, rows: u16, cols: u16) -> Result<()> {
        match self {
            Transport::NativePty(pty) => pty
                .master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| PtyError::Resize(e.to_string())),
            Transport::HelperProcess(_) => {
                tracing::debug!("Helper transport cannot report size {}x{}", cols, rows);
                Ok(())
            }
        }
    }

    /// Current job status; `None` when there is no job.
    pub fn status(&mut self) -> Option<JobStatus> {
        match self {
            Transport::NativePty(pty) => {
                let child = pty.child.as_mut()?;
                if pty.status == Some(JobStatus::Running) {
                    match child.try_wait() {
                        Ok(Some(exit)) => pty.status = Some(JobStatus::Ended(Some(exit.exit_code()))),
                        Ok(None) => {}
                        Err(_) => pty.status = Some(JobStatus::Ended(None)),
                    }
                }
                pty.status
            }
            Transport::HelperProcess(helper) => {
                if helper.status == Some(JobStatus::Running) {
                    match helper.child.try_wait() {
                        Ok(Some(exit)) => {
                            helper.status = Some(JobStatus::Ended(exit.code().map(|c| c as u32)))
                        }
                        Ok(None) => {}
                        Err(_) => helper.status = Some(JobStatus::Ended(None)),
                    }
                }
                helper.status
            }
        }
    }

    /// Process id of the job
    pub fn process_id(&self) -> Option<u32> {
        match self {
            Transport::NativePty(pty) => pty.child.as_ref().and_then(|c| c.process_id()),
            Transport::HelperProcess(helper) => Some(helper.child.id()),
        }
    }

    /// Send the job the signal named by `how` ("term", "kill", "int", ...).
    pub fn stop(&mut self, how: &str) -> Result<()> {
        tracing::info!("Stopping job with '{}'", how);
        #[cfg(unix)]
        {
            let signal = signal_number(how)?;
            if let Some(pid) = self.process_id() {
                // SAFETY: kill(2) only reads its integer arguments
                let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
                if rc != 0 {
                    return Err(PtyError::Stop(std::io::Error::last_os_error()));
                }
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = how;
            match self {
                Transport::NativePty(pty) => match pty.child.as_mut() {
                    Some(child) => child.kill().map_err(PtyError::Stop),
                    None => Ok(()),
                },
                Transport::HelperProcess(helper) => helper.child.kill().map_err(PtyError::Stop),
            }
        }
    }

    /// Name of the tty device attached to `part`, if any.
    pub fn tty_name(&self, part: StreamPart) -> Option<String> {
        let _ = part;
        match self {
            #[cfg(unix)]
            Transport::NativePty(pty) => slave_name(pty.master.as_raw_fd()?),
            _ => None,
        }
    }

    /// The erase character the pty currently uses.
    pub fn backspace_byte(&self) -> Option<u8> {
        match self {
            #[cfg(unix)]
            Transport::NativePty(pty) => {
                let fd = pty.master.as_raw_fd()?;
                // SAFETY: termios is plain data and fd belongs to the master
                unsafe {
                    let mut termios: libc::termios = std::mem::zeroed();
                    if libc::tcgetattr(fd, &mut termios) != 0 {
                        return None;
                    }
                    let erase = termios.c_cc[libc::VERASE];
                    (erase != 0).then_some(erase)
                }
            }
            _ => None,
        }
    }

    /// True if the pty-only slave side is being held open
    pub fn is_pty_only(&self) -> bool {
        matches!(self, Transport::NativePty(pty) if pty.slave.is_some())
    }
}

/// Device name of the slave side of the pty whose master is `fd`.
#[cfg(target_os = "linux")]
fn slave_name(fd: std::os::unix::io::RawFd) -> Option<String> {
    let mut buf = [0 as libc::c_char; 128];
    // SAFETY: buf is writable for its full length and stays alive for the call
    let rc = unsafe { libc::ptsname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: ptsname_r NUL-terminates on success
    let name = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn slave_name(fd: std::os::unix::io::RawFd) -> Option<String> {
    // SAFETY: the returned pointer is checked for NULL and copied right away
    unsafe {
        let ptr = libc::ptsname(fd);
        if ptr.is_null() {
            return None;
        }
        Some(std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// Map a signal name or number to a unix signal.
#[cfg(unix)]
pub fn signal_number(how: &str) -> Result<libc::c_int> {
    let signal = match how {
        "" | "term" => libc::SIGTERM,
        "hup" => libc::SIGHUP,
        "quit" => libc::SIGQUIT,
        "int" => libc::SIGINT,
        "kill" => libc::SIGKILL,
        "winch" => libc::SIGWINCH,
        other => other
            .parse::<libc::c_int>()
            .map_err(|_| PtyError::InvalidSignal(other.to_string()))?,
    };
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[cfg(unix)]
    fn drain_until(transport: &mut Transport, needle: &[u8]) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            seen.extend(transport.drain());
            if seen.windows(needle.len()).any(|w| w == needle) || transport.is_closed() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        seen
    }

    #[test]
    fn test_split_command() {
        let (program, args) = split_command("sh -c  true").unwrap();
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["-c".to_string(), "true".to_string()]);
        assert!(matches!(split_command("   "), Err(PtyError::EmptyCommand)));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_names() {
        assert_eq!(signal_number("kill").unwrap(), libc::SIGKILL);
        assert_eq!(signal_number("").unwrap(), libc::SIGTERM);
        assert_eq!(signal_number("9").unwrap(), 9);
        assert!(signal_number("bogus").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_helper_echo_and_close() {
        let mut transport = Transport::spawn(TransportKind::Helper, Some("cat"), 24, 80).unwrap();
        assert!(transport.has_job());
        assert!(transport.write(b"hello\n"));
        let seen = drain_until(&mut transport, b"hello");
        assert!(String::from_utf8_lossy(&seen).contains("hello"));

        transport.close_stdin();
        drain_until(&mut transport, b"\0never");
        assert!(transport.is_closed());
    }

    #[cfg(unix)]
    #[test]
    fn test_pty_job_ends() {
        let mut transport = Transport::spawn(TransportKind::Pty, Some("sh -c exit"), 24, 80).unwrap();
        drain_until(&mut transport, b"\0never");
        assert!(transport.is_closed());

        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.status() == Some(JobStatus::Running) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(matches!(transport.status(), Some(JobStatus::Ended(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_pty_only_mode() {
        let mut transport = Transport::spawn(TransportKind::Pty, None, 24, 80).unwrap();
        assert!(!transport.has_job());
        assert!(transport.is_pty_only());
        assert_eq!(transport.status(), None);
        let name = transport.tty_name(StreamPart::Out).unwrap();
        assert!(name.starts_with("/dev/"), "{}", name);
        transport.report_winsize(30, 100).unwrap();
    }
}
