//! Core session components.
//!
//! - **term**: the emulator engine trait and the bundled VT engine
//! - **scrollback**: history cells and text lines
//! - **pty**: the transport between a session and its job
//! - **session**: lifecycle of one session
//! - **registry**: all sessions behind stable handles
//!
//! # Architecture
//!
//! ```text
//! Registry
//! └── Session
//!     ├── Transport (pty or helper process)
//!     ├── Engine (cell grid + events)
//!     └── Scrollback + TextBuffer (history)
//! ```

pub mod pty;
pub mod registry;
pub mod scrollback;
pub mod session;
pub mod term;
