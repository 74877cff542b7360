//! Host-facing input and rendering.
//!
//! - **keymapper**: host keys, mouse events and pastes into engine input,
//!   plus the prefix keys of the terminal loop
//! - **renderer**: keeps panes in step with their sessions and draws them
//!   with crossterm
//!
//! # Flow
//!
//! ```text
//! crossterm events -> keymapper -> Engine -> job
//! job output -> Session -> ViewUpdate -> Coordinator -> Pane -> Screen
//! ```

pub mod keymapper;
pub mod renderer;

pub use keymapper::{KeyAction, MouseOutcome, MouseRouter, Registers, Selection, TermKeys};
pub use renderer::{Coordinator, CursorStyle, Screen};
