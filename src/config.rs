//! Configuration for termhost.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.termhost/config.toml`
//! - Per-session options seeded from the configuration
//! - The display palette description used by the color resolver
//!
//! # Configuration File
//!
//! ```toml
//! # Command started when none is given (optional)
//! shell = "/bin/bash"
//!
//! # Palette size of the display: 8, 16, 88 or 256
//! colors = 256
//! background = "dark"
//!
//! # What to do when the job ends: "close", "noclose" or "open"
//! finish = "noclose"
//! eof_chars = "exit"
//! kill = "term"
//!
//! # Transport for new sessions: "pty" or "helper"
//! transport = "pty"
//!
//! [terminal_colors]
//! fg = 252
//! bg = 235
//! ```

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::{Background, ColorContext};
use crate::core::pty::TransportKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("Could not determine config path")]
    NoHome,
}

/// What happens to a session's container when its job ends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishPolicy {
    /// Delete the container (and its views)
    Close,
    /// Keep the finished text
    NoClose,
    /// Keep the text and show it if no view does
    Open,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default command
    pub shell: Option<String>,
    /// Palette size of the display
    pub colors: u16,
    pub background: Background,
    /// Colors of the "Terminal" group
    pub terminal_colors: TerminalColors,
    /// Prefix key; empty means CTRL-W
    pub termkey: String,
    pub finish: Option<FinishPolicy>,
    pub eof_chars: Option<String>,
    pub kill: Option<String>,
    /// Command used by the `open` policy, `%d` is the session number
    pub term_open_command: String,
    pub transport: TransportKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            colors: 256,
            background: Background::Dark,
            terminal_colors: TerminalColors::default(),
            termkey: String::new(),
            finish: None,
            eof_chars: None,
            kill: None,
            term_open_command: "botright sbuf %d".to_string(),
            transport: TransportKind::Pty,
        }
    }
}

/// Palette numbers of the "Terminal" group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalColors {
    pub fg: Option<u8>,
    pub bg: Option<u8>,
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    match toml::from_str(&content) {
                        Ok(config) => return config,
                        Err(e) => tracing::warn!("Ignoring malformed {}: {}", path.display(), e),
                    }
                }
            }
        }
        Self::default()
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::get_config_path().ok_or(ConfigError::NoHome)?;
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        let dir = config_dir()?;
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir.join("config.toml"))
    }

    /// The shell to run when no command is given
    pub fn shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| {
                if cfg!(windows) {
                    "cmd.exe".to_string()
                } else {
                    "/bin/sh".to_string()
                }
            })
    }

    /// Palette description for the color resolver
    pub fn color_context(&self) -> ColorContext {
        ColorContext {
            colors: self.colors,
            background: self.background,
            terminal_fg: self.terminal_colors.fg,
            terminal_bg: self.terminal_colors.bg,
            ..ColorContext::default()
        }
    }

    /// Options for a new session running `command`
    pub fn session_options(&self, command: Option<String>) -> SessionOptions {
        SessionOptions {
            command,
            finish: self.finish,
            eof_chars: self.eof_chars.clone(),
            kill: self.kill.clone(),
            term_open_command: Some(self.term_open_command.clone()),
            transport: self.transport,
            ..SessionOptions::default()
        }
    }
}

/// Options for starting one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// `None` opens a pty without a job
    pub command: Option<String>,
    pub name: Option<String>,
    pub rows: u16,
    pub cols: u16,
    pub rows_fixed: bool,
    pub cols_fixed: bool,
    pub finish: Option<FinishPolicy>,
    pub eof_chars: Option<String>,
    pub kill: Option<String>,
    pub term_open_command: Option<String>,
    pub norestore: bool,
    pub restore_command: Option<String>,
    pub transport: TransportKind,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command: None,
            name: None,
            rows: 24,
            cols: 80,
            rows_fixed: false,
            cols_fixed: false,
            finish: None,
            eof_chars: None,
            kill: None,
            term_open_command: None,
            norestore: false,
            restore_command: None,
            transport: TransportKind::Pty,
        }
    }
}

impl SessionOptions {
    /// Pin the size on both axes
    pub fn with_fixed_size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self.rows_fixed = true;
        self.cols_fixed = true;
        self
    }
}

/// `~/.termhost`
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".termhost"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            colors = 16
            background = "light"
            finish = "close"
            transport = "helper"

            [terminal_colors]
            fg = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.colors, 16);
        assert_eq!(config.background, Background::Light);
        assert_eq!(config.finish, Some(FinishPolicy::Close));
        assert_eq!(config.transport, TransportKind::Helper);
        assert_eq!(config.terminal_colors.fg, Some(7));
        assert_eq!(config.terminal_colors.bg, None);
        assert_eq!(config.term_open_command, "botright sbuf %d");
    }

    #[test]
    fn test_round_trip_toml() {
        let mut config = Config::default();
        config.kill = Some("kill".to_string());
        config.finish = Some(FinishPolicy::NoClose);
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.kill.as_deref(), Some("kill"));
        assert_eq!(back.finish, Some(FinishPolicy::NoClose));
    }

    #[test]
    fn test_session_options_from_config() {
        let config = Config {
            eof_chars: Some("exit".to_string()),
            ..Config::default()
        };
        let options = config.session_options(Some("sh".to_string()));
        assert_eq!(options.command.as_deref(), Some("sh"));
        assert_eq!(options.eof_chars.as_deref(), Some("exit"));
        assert_eq!((options.rows, options.cols), (24, 80));
        assert!(!options.rows_fixed);

        let fixed = options.with_fixed_size(10, 40);
        assert!(fixed.rows_fixed && fixed.cols_fixed);
    }

    #[test]
    fn test_color_context() {
        let config = Config {
            colors: 8,
            terminal_colors: TerminalColors {
                fg: Some(2),
                bg: None,
            },
            ..Config::default()
        };
        let ctx = config.color_context();
        assert_eq!(ctx.colors, 8);
        assert_eq!(ctx.terminal_fg, Some(2));
    }
}
