//! Window Manager - the host windows showing sessions.
//!
//! - **manager**: `WindowManager` owning every pane and the focus
//! - **pane**: a pane with its display buffer and cursor
//!
//! ```text
//! wm/
//! ├── mod.rs      - Module exports
//! ├── manager.rs  - WindowManager
//! └── pane.rs     - Pane (display buffer of one session)
//! ```
//!
//! Several panes may show the same session; the render coordinator keeps
//! them in sync.

pub mod manager;
pub mod pane;

pub use manager::WindowManager;
pub use pane::{DisplayCell, Pane, PaneId};
