//! Background autosave
//!
//! Structural edits and sandbox writes both mark the workspace dirty. After a
//! quiet period the sandbox contents are captured, encoded and handed to a
//! [`SnapshotStore`]. Failures are logged and the loop keeps going.

use crate::codec;
use crate::debounce::{sleep_until_deadline, Debouncer};
use crate::mount::SandboxMount;
use crate::ports::{SnapshotStore, VirtualFs};
use crate::workspace::Workspace;
use crate::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capture, encode and store the workspace under `key`
pub async fn save_now(mount: &SandboxMount, store: &dyn SnapshotStore, key: &str) -> Result<()> {
    let captured = mount.capture().await?;
    let encoded = codec::encode(&captured)?;
    store.save(key, &encoded).await?;
    debug!("Autosaved '{}' ({} bytes)", key, encoded.len());
    Ok(())
}

/// Load the workspace saved under `key`, or `default` when there is none or
/// it cannot be decoded
pub async fn restore<F>(store: &dyn SnapshotStore, key: &str, default: F) -> Workspace
where
    F: FnOnce() -> Workspace,
{
    match store.load(key).await {
        Ok(Some(encoded)) => {
            info!("Restoring autosaved workspace '{}'", key);
            codec::decode_or_default(&encoded, default)
        }
        Ok(None) => default(),
        Err(e) => {
            warn!("Could not read autosave '{}': {}", key, e);
            default()
        }
    }
}

/// Save after every quiet period until `cancel` fires; pending changes are
/// saved once more on the way out
pub async fn run(
    mount: Arc<SandboxMount>,
    fs: Arc<dyn VirtualFs>,
    store: Arc<dyn SnapshotStore>,
    key: String,
    window: Duration,
    cancel: CancellationToken,
) {
    let mut edits = mount.workspace().subscribe();
    let root = mount.workspace().get().name().to_string();
    let mut changes = match fs.watch(&root) {
        Ok(changes) => changes,
        Err(e) => {
            warn!("Autosave cannot watch {}, structural edits only: {}", root, e);
            futures::stream::pending().boxed()
        }
    };
    let mut debouncer = Debouncer::new(window);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            edit = edits.changed() => match edit {
                Ok(_) => debouncer.push(()),
                Err(_) => break,
            },
            change = changes.next() => match change {
                Some(change) => {
                    debug!("Autosave saw {:?}", change);
                    debouncer.push(());
                }
                None => changes = futures::stream::pending().boxed(),
            },
            _ = sleep_until_deadline(debouncer.deadline()) => {
                debouncer.take();
                if let Err(e) = save_now(&mount, store.as_ref(), &key).await {
                    warn!("Autosave failed: {}", e);
                }
            }
        }
    }

    if debouncer.take().is_some() {
        if let Err(e) = save_now(&mount, store.as_ref(), &key).await {
            warn!("Final autosave failed: {}", e);
        }
    }
    debug!("Autosave for '{}' stopped", key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryFs, MemorySnapshotStore};
    use crate::mount::mount;
    use crate::store::Cell;
    use playground_types::File;

    #[tokio::test(start_paused = true)]
    async fn test_sandbox_write_is_autosaved() {
        let workspace = Workspace::new("app", vec![File::new("main.ts", "a").into()]);
        let fs = Arc::new(MemoryFs::new());
        mount(fs.as_ref(), &workspace).await.unwrap();
        let sandbox_mount = Arc::new(SandboxMount::new(
            fs.clone(),
            Cell::new("workspace", workspace),
            ".ts",
        ));
        let store = Arc::new(MemorySnapshotStore::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            sandbox_mount,
            fs.clone(),
            store.clone(),
            "autosave".into(),
            Duration::from_secs(1),
            cancel.clone(),
        ));
        tokio::task::yield_now().await;

        fs.write_file("app/main.ts", b"b").await.unwrap();
        fs.write_file("app/main.ts", b"bc").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.save_count(), 1);

        let restored = restore(store.as_ref(), "autosave", || Workspace::new("x", vec![])).await;
        assert_eq!(restored.find_file("main.ts").unwrap().initial_content(), "bc");

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_restore_falls_back() {
        let store = MemorySnapshotStore::new();
        store.save("broken", "not-a-snapshot").await.unwrap();
        let ws = restore(&store, "broken", || Workspace::new("default", vec![])).await;
        assert_eq!(ws.name(), "default");
        let ws = restore(&store, "missing", || Workspace::new("default", vec![])).await;
        assert_eq!(ws.name(), "default");
    }
}
