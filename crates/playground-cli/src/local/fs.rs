//! Sandbox filesystem backed by a directory on disk

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use playground_core::ports::{DirEntry, FsChange, VirtualFs};
use playground_core::{PlaygroundError, Result};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const WATCH_DEBOUNCE: Duration = Duration::from_millis(200);

pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a slash-separated sandbox path below the root, refusing escapes
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(PlaygroundError::Sandbox(format!(
                "{} leaves the sandbox",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    fn relative(root: &Path, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl VirtualFs for LocalFs {
    async fn mkdir(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir(self.resolve(path)?)
            .await
            .map_err(|e| PlaygroundError::from_io(e, path))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        tokio::fs::write(self.resolve(path)?, content)
            .await
            .map_err(|e| PlaygroundError::from_io(e, path))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.resolve(path)?)
            .await
            .map_err(|e| PlaygroundError::from_io(e, path))
    }

    async fn read_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let mut entries = tokio::fs::read_dir(self.resolve(path)?)
            .await
            .map_err(|e| PlaygroundError::from_io(e, path))?;
        let mut result = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            result.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: entry.file_type().await?.is_dir(),
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let target = self.resolve(to)?;
        if tokio::fs::try_exists(&target).await? {
            return Err(PlaygroundError::AlreadyExists(to.to_string()));
        }
        tokio::fs::rename(self.resolve(from)?, target)
            .await
            .map_err(|e| PlaygroundError::from_io(e, from))
    }

    async fn remove(&self, path: &str, recursive: bool) -> Result<()> {
        let target = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|e| PlaygroundError::from_io(e, path))?;
        let result = if !metadata.is_dir() {
            tokio::fs::remove_file(&target).await
        } else if recursive {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_dir(&target).await
        };
        result.map_err(|e| PlaygroundError::from_io(e, path))
    }

    fn watch(&self, path: &str) -> Result<BoxStream<'static, FsChange>> {
        let target = self.resolve(path)?;
        let root = self.root.clone();
        let (tx, rx) = mpsc::unbounded_channel::<FsChange>();

        let mut debouncer = new_debouncer(
            WATCH_DEBOUNCE,
            move |res: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match res {
                Ok(events) => {
                    for event in events {
                        if !matches!(event.kind, DebouncedEventKind::Any) {
                            continue;
                        }
                        let Some(relative) = LocalFs::relative(&root, &event.path) else {
                            continue;
                        };
                        let change = if event.path.exists() {
                            FsChange::Modified(relative)
                        } else {
                            FsChange::Removed(relative)
                        };
                        let _ = tx.send(change);
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            },
        )
        .map_err(|e| PlaygroundError::Sandbox(format!("cannot watch {}: {}", path, e)))?;

        debouncer
            .watcher()
            .watch(&target, RecursiveMode::Recursive)
            .map_err(|e| PlaygroundError::Sandbox(format!("cannot watch {}: {}", path, e)))?;
        debug!("Watching {:?}", target);

        // The debouncer rides along in the stream state so it lives as long
        // as the stream does
        Ok(stream::unfold((rx, debouncer), |(mut rx, debouncer)| async move {
            rx.recv().await.map(|change| (change, (rx, debouncer)))
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_fs_maps_errors() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFs::new(dir.path());

        fs.mkdir("app").await.unwrap();
        assert!(fs.mkdir("app").await.unwrap_err().is_already_exists());
        assert!(fs.mkdir("app/a/b").await.unwrap_err().is_not_found());
        assert!(fs.read_file("app/missing.ts").await.unwrap_err().is_not_found());

        fs.write_file("app/main.ts", b"hello").await.unwrap();
        assert_eq!(fs.read_file("app/main.ts").await.unwrap(), b"hello");
        let entries = fs.read_directory("app").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_directory);
    }

    #[tokio::test]
    async fn test_local_fs_rename_and_remove() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFs::new(dir.path());
        fs.mkdir("app").await.unwrap();
        fs.mkdir("app/src").await.unwrap();
        fs.write_file("app/src/main.ts", b"1").await.unwrap();
        fs.write_file("app/other.ts", b"2").await.unwrap();

        assert!(fs.rename("app/other.ts", "app/src").await.unwrap_err().is_already_exists());
        fs.rename("app/src", "app/lib").await.unwrap();
        assert_eq!(fs.read_file("app/lib/main.ts").await.unwrap(), b"1");

        assert!(fs.remove("app/lib", false).await.is_err());
        fs.remove("app/lib", true).await.unwrap();
        assert!(!dir.path().join("app/lib").exists());
    }

    #[test]
    fn test_paths_cannot_escape_root() {
        let fs = LocalFs::new("/tmp/sandbox");
        assert!(fs.resolve("../etc/passwd").is_err());
        assert_eq!(
            fs.resolve("/app/main.ts").unwrap(),
            PathBuf::from("/tmp/sandbox/app/main.ts")
        );
    }
}
