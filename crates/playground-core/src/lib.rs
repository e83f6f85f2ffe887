//! Playground Core Library
//!
//! Workspace synchronization engine: keeps an immutable file tree consistent
//! with a sandboxed virtual filesystem, an editor surface and a reactive
//! store, and rebuilds call trees from traced program output.

// Re-export pure types from playground-types
pub use playground_types::*;

pub mod autosave;
pub mod codec;
pub mod config;
pub mod debounce;
pub mod editor_sync;
pub mod error;
pub mod memory;
pub mod mount;
pub mod path_index;
pub mod ports;
pub mod retry;
pub mod sandbox;
pub mod session;
pub mod store;
pub mod terminal;
pub mod trace;
pub mod workspace;

pub use config::PlaygroundConfig;
pub use editor_sync::EditorSync;
pub use error::{PlaygroundError, Result, ValidationError};
pub use mount::{validate_name, SandboxMount};
pub use path_index::PathIndex;
pub use retry::Retry;
pub use sandbox::{Sandbox, SandboxGate, SandboxLease};
pub use session::{Collaborators, Playground};
pub use store::{Cell, Store, Subscription, WeakCell};
pub use terminal::{PrepareStatus, TerminalHandle, TerminalSize, TerminalSupervisor};
pub use trace::{SpanNode, TraceForest};
pub use workspace::Workspace;
