//! termhost - run a command in a hosted terminal session
//!
//! The command runs behind a pseudo terminal, shown full-screen with a
//! status line. Its output is kept as history once the job ends.
//!
//! # Usage
//!
//! ```text
//! termhost                         # run the shell
//! termhost top                     # run a command
//! termhost --dump-write out.dump ls -l
//! termhost --dump-diff a.dump b.dump
//! termhost --dump-load a.dump
//! ```
//!
//! # Keys (CTRL-W prefix)
//!
//! | Key | Action |
//! |-----|--------|
//! | N | Normal mode (i or a returns) |
//! | CTRL-C | Kill the job |
//! | . | Send CTRL-W |
//! | " x | Paste register x |
//! | q | Quit |
//!
//! CTRL-\ CTRL-N also enters normal mode.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use termhost::config::{config_dir, Config};
use termhost::dump::DumpOptions;
use termhost::ui::Screen;
use termhost::App;

/// What to do
enum Mode {
    /// Run a command full-screen
    Run(Option<String>),
    DumpWrite { out: PathBuf, command: String },
    DumpDiff(PathBuf, PathBuf),
    DumpLoad(PathBuf),
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Size of the off-screen session used for --dump-write
const DUMP_ROWS: u16 = 24;
const DUMP_COLS: u16 = 80;

fn print_version() {
    eprintln!("termhost {}", VERSION);
}

fn print_help() {
    eprintln!("termhost {} - run a command in a hosted terminal", VERSION);
    eprintln!();
    eprintln!("Usage: termhost [OPTIONS] [COMMAND...]");
    eprintln!();
    eprintln!("  (default)                  Run COMMAND, or the shell from config.toml/$SHELL");
    eprintln!("  --dump-write OUT CMD...    Run CMD and write its final screen to OUT");
    eprintln!("  --dump-diff A B            Print the diff of two screen dumps");
    eprintln!("  --dump-load A              Print the text of a screen dump");
    eprintln!("  -v, --version              Show version");
    eprintln!("  -h, --help                 Show this help");
    eprintln!();
    eprintln!("Keys (CTRL-W prefix, set 'termkey' in ~/.termhost/config.toml):");
    eprintln!("  CTRL-W N, CTRL-\\ CTRL-N    Normal mode (i or a to return)");
    eprintln!("  CTRL-W CTRL-C              Kill the job");
    eprintln!("  CTRL-W .                   Send CTRL-W");
    eprintln!("  CTRL-W \" x                 Paste register x");
    eprintln!("  CTRL-W q                   Quit");
    eprintln!();
    eprintln!("Log: ~/.termhost/termhost.log (level from TERMHOST_LOG)");
}

/// Parse command line arguments
fn parse_args() -> Result<Mode, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(first) = args.first() else {
        return Ok(Mode::Run(None));
    };

    match first.as_str() {
        "-h" | "--help" => {
            print_help();
            std::process::exit(0);
        }
        "-v" | "--version" => {
            print_version();
            std::process::exit(0);
        }
        "--dump-write" => {
            if args.len() < 3 {
                return Err("--dump-write requires OUT and a command".to_string());
            }
            Ok(Mode::DumpWrite {
                out: PathBuf::from(&args[1]),
                command: args[2..].join(" "),
            })
        }
        "--dump-diff" => match &args[1..] {
            [a, b] => Ok(Mode::DumpDiff(PathBuf::from(a), PathBuf::from(b))),
            _ => Err("--dump-diff requires two files".to_string()),
        },
        "--dump-load" => match &args[1..] {
            [a] => Ok(Mode::DumpLoad(PathBuf::from(a))),
            _ => Err("--dump-load requires one file".to_string()),
        },
        arg if arg.starts_with('-') => Err(format!("Unknown argument: {}. Use -h for help.", arg)),
        _ => Ok(Mode::Run(Some(args.join(" ")))),
    }
}

/// Log to ~/.termhost/termhost.log; TERMHOST_LOG overrides the level
fn init_logging() {
    let log_path = config_dir()
        .map(|dir| dir.join("termhost.log"))
        .unwrap_or_else(|| PathBuf::from("termhost.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env("TERMHOST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let mode = match parse_args() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("termhost {} starting", VERSION);
    let config = Config::load();

    match mode {
        Mode::Run(command) => run_terminal(config, command),
        Mode::DumpWrite { out, command } => dump_write(config, &out, command),
        Mode::DumpDiff(a, b) => {
            let mut app = App::new(config, DUMP_COLS, DUMP_ROWS);
            let id = app
                .dump_diff(&a, &b)
                .with_context(|| format!("Failed to diff {} and {}", a.display(), b.display()))?;
            print_lines(app.text_lines(id)?)
        }
        Mode::DumpLoad(path) => {
            let mut app = App::new(config, DUMP_COLS, DUMP_ROWS);
            let id = app
                .dump_load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            print_lines(app.text_lines(id)?)
        }
    }
}

fn print_lines(lines: &[String]) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    for line in lines {
        writeln!(stdout, "{}", line)?;
    }
    Ok(())
}

/// Run `command` off-screen and dump the screen it leaves behind
fn dump_write(config: Config, out: &Path, command: String) -> anyhow::Result<()> {
    let options = config
        .session_options(Some(command.clone()))
        .with_fixed_size(DUMP_ROWS, DUMP_COLS);
    let mut app = App::new(config, DUMP_COLS, DUMP_ROWS);
    let id = app
        .start_terminal(options)
        .with_context(|| format!("Failed to start '{}'", command))?;

    // the frozen view keeps the engine after the job ends
    app.enter_normal_mode(id)?;
    while app.registry.get(id).is_some_and(|s| !s.channel_closed()) {
        app.wait(id, None)?;
    }
    app.dump_write(id, out, DumpOptions::default())
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!("Wrote dump of '{}' to {}", command, out.display());
    Ok(())
}

/// Prefix then `q`
fn is_quit(keys: &[KeyEvent]) -> bool {
    matches!(keys, [_, key] if key.code == KeyCode::Char('q'))
}

/// Run the command full-screen until it closes or the user quits
fn run_terminal(config: Config, command: Option<String>) -> anyhow::Result<()> {
    let command = command.unwrap_or_else(|| config.shell());
    let (cols, rows) = Screen::size()?;
    info!("Terminal size: {}x{}", cols, rows);

    let options = config.session_options(Some(command.clone()));
    let mut app = App::new(config, cols, rows.saturating_sub(1));
    app.start_terminal(options)
        .with_context(|| format!("Failed to start '{}'", command))?;

    let mut screen = Screen::new();
    screen.init()?;
    let result = run_main_loop(&mut app, &mut screen, rows.saturating_sub(1));
    let _ = screen.cleanup();
    result
}

/// Main event loop
fn run_main_loop(app: &mut App, screen: &mut Screen, mut status_row: u16) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);
    let mut stdout = io::stdout();
    let mut dirty = true;

    loop {
        if app.registry.is_empty() {
            info!("All sessions ended");
            break;
        }
        dirty |= app.poll();

        if event::poll(poll_timeout)? {
            dirty = true;
            match event::read()? {
                Event::Key(key) if key.kind != KeyEventKind::Release => match app.handle_key(key) {
                    Ok(host) if is_quit(&host) => {
                        info!("Quit requested");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => error!("Key not handled: {}", e),
                },
                Event::Mouse(mouse) => {
                    app.handle_mouse(mouse);
                }
                Event::Paste(text) => app.handle_paste(&text),
                Event::Resize(width, height) => {
                    status_row = height.saturating_sub(1);
                    app.resize_host(width, status_row);
                }
                Event::FocusGained => app.focus_gained(),
                _ => {}
            }
        }

        if dirty && !app.registry.is_empty() {
            screen.draw(&mut stdout, &app.wm, &mut app.registry, Some(status_row))?;
            dirty = false;
        }
    }
    Ok(())
}
