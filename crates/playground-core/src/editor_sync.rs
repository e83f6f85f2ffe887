//! Editor sync pipeline
//!
//! One supervised task per selected file. Selecting another file cancels the
//! running task and waits for it, including its final flush, before the new
//! file is loaded.

use crate::config::EditorConfig;
use crate::debounce::{sleep_until_deadline, Debouncer};
use crate::ports::EditorSurface;
use crate::retry::Retry;
use crate::sandbox::Sandbox;
use crate::store::Cell;
use crate::workspace::Workspace;
use crate::{PlaygroundError, Result};
use futures::stream::{BoxStream, StreamExt};
use playground_types::NodeId;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn sandbox_path(workspace: &Workspace, id: NodeId) -> Option<String> {
    workspace
        .path_of(id)
        .map(|relative| format!("{}/{}", workspace.name(), relative))
}

struct ActiveFile {
    id: NodeId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveFile {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Editor sync task for {} failed: {}", self.id, e);
        }
    }
}

pub struct EditorSync {
    sandbox: Sandbox,
    editor: Arc<dyn EditorSurface>,
    workspace: Cell<Workspace>,
    selected: Cell<Option<NodeId>>,
    config: EditorConfig,
    scope: CancellationToken,
    active: Mutex<Option<ActiveFile>>,
}

impl EditorSync {
    /// Per-file tasks are children of `scope`; cancelling it stops them after
    /// their final flush. Each task keeps the sandbox lease until it is done.
    pub fn new(
        sandbox: Sandbox,
        editor: Arc<dyn EditorSurface>,
        workspace: Cell<Workspace>,
        selected: Cell<Option<NodeId>>,
        config: EditorConfig,
        scope: CancellationToken,
    ) -> Self {
        Self {
            sandbox,
            editor,
            workspace,
            selected,
            config,
            scope,
            active: Mutex::new(None),
        }
    }

    /// Id of the file currently shown in the editor
    pub fn selected(&self) -> &Cell<Option<NodeId>> {
        &self.selected
    }

    /// Show file `id` in the editor and start syncing its edits back.
    ///
    /// The previous file is flushed and released first. If `id` cannot be
    /// opened nothing is selected afterwards.
    pub async fn select(&self, id: NodeId) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.stop().await;
        }

        match self.start(id).await {
            Ok(file) => {
                *active = Some(file);
                Ok(())
            }
            Err(e) => {
                self.selected.set(None);
                Err(e)
            }
        }
    }

    async fn start(&self, id: NodeId) -> Result<ActiveFile> {
        // A freshly created file may not be indexed yet
        let workspace = &self.workspace;
        let path = Retry::bounded(self.config.resolve_attempts, self.config.resolve_interval())
            .run("resolve selected file", move || async move {
                sandbox_path(&workspace.get(), id)
                    .ok_or_else(|| PlaygroundError::NotFound(format!("file {}", id)))
            })
            .await?;

        let file = self
            .workspace
            .get()
            .node(id)
            .and_then(|node| node.as_file().cloned())
            .ok_or_else(|| PlaygroundError::Defect(format!("{} is not a file", path)))?;

        let fs = &self.sandbox.fs();
        let target = path.as_str();
        let content = Retry::bounded(self.config.resolve_attempts, self.config.resolve_interval())
            .run("read selected file", move || async move { fs.read_file(target).await })
            .await?;
        let content = String::from_utf8_lossy(&content);

        self.editor
            .load_model(&path, file.language(), &content)
            .await?;
        let edits = self.editor.content();
        self.selected.set(Some(id));
        info!("Editing {}", path);

        let cancel = self.scope.child_token();
        let pipeline = Pipeline {
            id,
            sandbox: self.sandbox.clone(),
            workspace: self.workspace.clone(),
            config: self.config.clone(),
        };
        let task = tokio::spawn(pipeline.run(edits, cancel.clone()));
        Ok(ActiveFile { id, cancel, task })
    }

    /// Stop syncing the current file, flushing pending edits first
    pub async fn deselect(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.stop().await;
        }
        self.selected.set(None);
    }

    /// Swap the visible buffer between the file's solution and its starting
    /// content. The file itself is left untouched.
    pub async fn show_solution(&self, solved: bool) -> Result<()> {
        let active = self.active.lock().await;
        let id = active
            .as_ref()
            .map(|a| a.id)
            .ok_or_else(|| PlaygroundError::NotFound("no file selected".to_string()))?;
        let workspace = self.workspace.get();
        let file = workspace
            .node(id)
            .and_then(|node| node.as_file())
            .ok_or_else(|| PlaygroundError::NotFound(format!("file {}", id)))?;

        let text = match (solved, file.solution()) {
            (true, Some(solution)) => solution,
            (true, None) => {
                debug!("{} has no solution", file.name());
                return Ok(());
            }
            (false, _) => file.initial_content(),
        };
        self.editor.set_value(text);
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.deselect().await;
    }
}

/// Everything the per-file task needs, owned. Holding the sandbox keeps its
/// lease alive until the final flush is through.
struct Pipeline {
    id: NodeId,
    sandbox: Sandbox,
    workspace: Cell<Workspace>,
    config: EditorConfig,
}

impl Pipeline {
    async fn run(self, mut edits: BoxStream<'static, String>, cancel: CancellationToken) {
        let mut debouncer = Debouncer::new(self.config.debounce());
        let mut echo_skipped = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                edit = edits.next() => match edit {
                    // The first item is the content we just loaded
                    Some(_) if !echo_skipped => echo_skipped = true,
                    Some(text) => debouncer.push(text),
                    None => break,
                },
                _ = sleep_until_deadline(debouncer.deadline()) => {
                    let Some(text) = debouncer.take() else {
                        continue;
                    };
                    tokio::select! {
                        result = self.write(&text) => {
                            if let Err(e) = result {
                                error!("Failed to save {}: {}", self.id, e);
                            }
                        }
                        _ = cancel.cancelled() => {
                            debouncer.push(text);
                            break;
                        }
                    }
                }
            }
        }

        if let Some(text) = debouncer.take() {
            let flush = tokio::time::timeout(self.config.flush_timeout(), self.write(&text));
            match flush.await {
                Ok(Ok(())) => debug!("Flushed pending edits for {}", self.id),
                Ok(Err(e)) => error!("Final flush for {} failed: {}", self.id, e),
                Err(_) => warn!(
                    "Final flush for {} timed out after {:?}",
                    self.id,
                    self.config.flush_timeout()
                ),
            }
        }
    }

    /// Write `text` to wherever the file lives now
    async fn write(&self, text: &str) -> Result<()> {
        let this = self;
        Retry::forever(self.config.write_retry_interval())
            .run("save file", move || async move {
                let Some(path) = sandbox_path(&this.workspace.get(), this.id) else {
                    warn!("{} was removed, dropping edits", this.id);
                    return Ok(());
                };
                this.sandbox.fs().write_file(&path, text.as_bytes()).await?;
                debug!("Saved {} ({} bytes)", path, text.len());
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEditor, MemoryFs, MemoryProcessHost};
    use crate::mount::mount;
    use crate::ports::VirtualFs;
    use crate::sandbox::SandboxGate;
    use playground_types::{File, Node};
    use std::time::Duration;

    struct Fixture {
        fs: Arc<MemoryFs>,
        editor: Arc<MemoryEditor>,
        workspace: Cell<Workspace>,
        gate: SandboxGate,
        scope: CancellationToken,
        sync: EditorSync,
        a: NodeId,
        b: NodeId,
    }

    async fn fixture() -> Fixture {
        let a = File::new("a.ts", "let a = 1;").with_solution("let a = 42;");
        let b = File::new("b.ts", "let b = 2;");
        let (a_id, b_id) = (a.id(), b.id());
        let workspace = Workspace::new("app", vec![Node::from(a), Node::from(b)]);
        let fs = Arc::new(MemoryFs::new());
        mount(fs.as_ref(), &workspace).await.unwrap();

        let gate = SandboxGate::new();
        let sandbox = Sandbox::boot(
            &gate,
            fs.clone(),
            Arc::new(MemoryProcessHost::new()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let editor = Arc::new(MemoryEditor::new());
        let workspace = Cell::new("workspace", workspace);
        let scope = CancellationToken::new();
        let sync = EditorSync::new(
            sandbox,
            editor.clone(),
            workspace.clone(),
            Cell::new("selected", None),
            EditorConfig::default(),
            scope.clone(),
        );
        Fixture {
            fs,
            editor,
            workspace,
            gate,
            scope,
            sync,
            a: a_id,
            b: b_id,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_written_once() {
        let f = fixture().await;
        f.sync.select(f.a).await.unwrap();
        assert_eq!(f.editor.active_model().unwrap().content, "let a = 1;");

        f.editor.type_text("x");
        tokio::time::sleep(Duration::from_secs(1)).await;
        f.editor.type_text("y");
        tokio::time::sleep(Duration::from_secs(3)).await;

        let writes = f.fs.writes_to("app/a.ts");
        // The mount wrote the file once before any edit
        assert_eq!(writes.len(), 2);
        assert!(writes[1].ends_with("xy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_separated_edits_are_written_twice() {
        let f = fixture().await;
        f.sync.select(f.a).await.unwrap();

        f.editor.type_text("x");
        tokio::time::sleep(Duration::from_secs(3)).await;
        f.editor.type_text("y");
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(f.fs.writes_to("app/a.ts").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_files_flushes_pending_edit() {
        let f = fixture().await;
        f.sync.select(f.a).await.unwrap();
        f.editor.type_text("!");
        tokio::time::sleep(Duration::from_millis(100)).await;

        f.sync.select(f.b).await.unwrap();
        assert_eq!(f.fs.content("app/a.ts").as_deref(), Some("let a = 1;!"));
        assert_eq!(f.sync.selected().get(), Some(f.b));
        assert_eq!(f.editor.active_model().unwrap().path, "app/b.ts");

        // Loading b must not be written back
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.fs.writes_to("app/b.ts").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_follows_rename() {
        let f = fixture().await;
        f.sync.select(f.a).await.unwrap();
        f.editor.type_text("z");

        let renamed = {
            let ws = f.workspace.get();
            let node = ws.node(f.a).unwrap().clone();
            ws.replace_node(&node, node.renamed("c.ts"))
        };
        f.fs.rename("app/a.ts", "app/c.ts").await.unwrap();
        f.workspace.set(renamed);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(f.fs.content("app/c.ts").as_deref(), Some("let a = 1;z"));
        assert!(!f.fs.exists("app/a.ts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_writes_are_retried() {
        let f = fixture().await;
        f.sync.select(f.a).await.unwrap();
        f.fs.fail_writes_with_not_found(3);
        f.editor.type_text("q");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.fs.content("app/a.ts").as_deref(), Some("let a = 1;q"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_file_fails_after_bounded_retries() {
        let f = fixture().await;
        let err = f.sync.select(NodeId::fresh()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.sync.selected().get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_select_clears_previous_selection() {
        let f = fixture().await;
        f.sync.select(f.a).await.unwrap();
        f.editor.type_text("!");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(f.sync.select(NodeId::fresh()).await.is_err());
        assert_eq!(f.sync.selected().get(), None);
        assert_eq!(f.fs.content("app/a.ts").as_deref(), Some("let a = 1;!"));

        // Nothing is syncing any more
        f.editor.type_text("?");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.fs.writes_to("app/a.ts").len(), 2);

        f.sync.select(f.b).await.unwrap();
        assert_eq!(f.sync.selected().get(), Some(f.b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_scope_flushes_then_releases_lease() {
        let f = fixture().await;
        f.sync.select(f.a).await.unwrap();
        f.editor.type_text("A");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sync = f.sync;
        f.scope.cancel();
        drop(sync);
        while !f.gate.is_available() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.fs.content("app/a.ts").as_deref(), Some("let a = 1;A"));

        f.editor.type_text("B");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.fs.writes_to("app/a.ts").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_solution_toggle_keeps_file() {
        let f = fixture().await;
        f.sync.select(f.a).await.unwrap();

        f.sync.show_solution(true).await.unwrap();
        assert_eq!(f.editor.value(), "let a = 42;");
        f.sync.show_solution(false).await.unwrap();
        assert_eq!(f.editor.value(), "let a = 1;");

        let ws = f.workspace.get();
        assert_eq!(ws.find_file("a.ts").unwrap().initial_content(), "let a = 1;");
        f.sync.shutdown().await;
    }
}
