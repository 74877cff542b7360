//! termhost - hosts interactive terminal sessions
//!
//! A session drives a job through a pseudo terminal, feeds its output to
//! an emulator engine and keeps the live screen and an unbounded history
//! ready for display in any number of panes.
//!
//! # Layout
//!
//! ```text
//! src/
//! ├── app.rs       - App: sessions, panes and the host API
//! ├── color.rs     - Color resolver
//! ├── config.rs    - ~/.termhost/config.toml
//! ├── dump.rs      - Screen dump and diff files
//! ├── core/        - Engine, transport, history, sessions
//! ├── ui/          - Input translation and rendering
//! └── wm/          - Panes showing sessions
//! ```

pub mod app;
pub mod color;
pub mod config;
pub mod core;
pub mod dump;
pub mod ui;
pub mod wm;

pub use crate::app::App;
pub use crate::config::{Config, FinishPolicy, SessionOptions};
pub use crate::core::registry::SessionId;
pub use crate::core::session::{Session, SessionError};
pub use crate::dump::{DumpError, DumpOptions};
