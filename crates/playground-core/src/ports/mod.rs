//! Port traits (interfaces) for dependency injection
//!
//! The engine never talks to a concrete sandbox, editor widget or terminal
//! widget; it drives these traits and the hosting application supplies the
//! implementations.

pub mod editor;
pub mod fs;
pub mod process;
pub mod snapshot;
pub mod terminal;

pub use editor::EditorSurface;
pub use fs::{DirEntry, FsChange, VirtualFs};
pub use process::{KillHandle, Process, ProcessHost, ResizeHandle, SpawnRequest};
pub use snapshot::SnapshotStore;
pub use terminal::{TerminalSize, TerminalSurface};
