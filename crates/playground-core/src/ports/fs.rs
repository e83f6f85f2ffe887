//! Virtual filesystem exposed by the sandbox

use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Entry returned by [`VirtualFs::read_directory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
}

/// Change notification emitted by [`VirtualFs::watch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    Created(String),
    Modified(String),
    Removed(String),
}

impl FsChange {
    pub fn path(&self) -> &str {
        match self {
            FsChange::Created(p) | FsChange::Modified(p) | FsChange::Removed(p) => p,
        }
    }
}

/// Slash-separated filesystem living inside the sandbox.
///
/// Missing paths fail with `PlaygroundError::NotFound`, creating an existing
/// directory fails with `PlaygroundError::AlreadyExists`.
#[async_trait]
pub trait VirtualFs: Send + Sync {
    /// Create a directory; the parent must exist
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Create or truncate a file; the parent must exist
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn read_directory(&self, path: &str) -> Result<Vec<DirEntry>>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn remove(&self, path: &str, recursive: bool) -> Result<()>;

    /// Stream change notifications for everything below `path`
    fn watch(&self, path: &str) -> Result<BoxStream<'static, FsChange>>;
}
