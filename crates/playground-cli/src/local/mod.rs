//! Local-machine implementations of the engine's ports

pub mod fs;
pub mod pty;
pub mod snapshots;
pub mod stdio;

pub use fs::LocalFs;
pub use pty::PtyProcessHost;
pub use snapshots::FileSnapshotStore;
pub use stdio::{StdioTerminal, TeeSurface};
