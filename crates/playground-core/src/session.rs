//! Composition root
//!
//! [`Playground`] boots the sandbox, mounts the workspace and wires the
//! editor pipeline, terminal supervisor, trace builder and autosave to one
//! [`Store`]. Dropping the session without [`Playground::shutdown`] cancels
//! background work without waiting for it; the sandbox is released once the
//! editor's final flush is through.
//!
//! Trace collectors stop when the trace cell goes idle, and open shells are
//! killed when the terminal list does.

use crate::autosave;
use crate::codec;
use crate::config::PlaygroundConfig;
use crate::editor_sync::EditorSync;
use crate::mount::SandboxMount;
use crate::ports::{EditorSurface, ProcessHost, SnapshotStore, TerminalSurface, VirtualFs};
use crate::sandbox::{Sandbox, SandboxGate};
use crate::store::{Cell, Store};
use crate::terminal::{
    run_prepare, PrepareStatus, TerminalHandle, TerminalInfo, TerminalSize, TerminalSupervisor,
};
use crate::trace::{self, TraceForest};
use crate::workspace::Workspace;
use crate::Result;
use bytes::Bytes;
use futures::stream::BoxStream;
use playground_types::{Node, NodeId, NodeKind, ShellSpec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Store cell names
pub const WORKSPACE_CELL: &str = "workspace";
pub const SELECTED_FILE_CELL: &str = "selected-file";
pub const TRACE_CELL: &str = "trace";
pub const TERMINAL_SIZE_CELL: &str = "terminal-size";
pub const TERMINALS_CELL: &str = "terminals";

/// Implementations of the ports supplied by the host application
pub struct Collaborators {
    pub fs: Arc<dyn VirtualFs>,
    pub processes: Arc<dyn ProcessHost>,
    pub editor: Arc<dyn EditorSurface>,
    /// Where autosaves go; autosave is off without one
    pub snapshots: Option<Arc<dyn SnapshotStore>>,
    /// Receives the prepare command's output
    pub prepare_output: Option<Arc<dyn TerminalSurface>>,
}

pub struct Playground {
    config: PlaygroundConfig,
    store: Store,
    sandbox: Sandbox,
    mount: Arc<SandboxMount>,
    editor: EditorSync,
    terminals: TerminalSupervisor,
    prepare: watch::Receiver<PrepareStatus>,
    trace: Cell<TraceForest>,
    trace_scope: Mutex<CancellationToken>,
    trace_release_armed: Arc<AtomicBool>,
    cancel: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Playground {
    /// Boot a session for `workspace`. Failing to get the sandbox is fatal.
    pub async fn boot(
        config: PlaygroundConfig,
        gate: &SandboxGate,
        workspace: Workspace,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let Collaborators {
            fs,
            processes,
            editor,
            snapshots,
            prepare_output,
        } = collaborators;

        let sandbox = Sandbox::boot(gate, fs, processes, config.sandbox.acquire_timeout()).await?;
        let store = Store::new(config.store.idle_ttl());
        let root = workspace.name().to_string();
        let initial_file = workspace.initial_file_path().map(str::to_string);
        let prepare_command = workspace.prepare_command().map(str::to_string);

        let workspace_cell = store.cell(WORKSPACE_CELL, move || workspace)?;
        let selected = store.cell(SELECTED_FILE_CELL, || None)?;
        let trace = store.cell(TRACE_CELL, TraceForest::new)?;
        let size = store.cell(TERMINAL_SIZE_CELL, TerminalSize::default)?;
        let terminal_list = store.cell(TERMINALS_CELL, Vec::<TerminalInfo>::new)?;

        let mount = Arc::new(
            SandboxMount::new(
                sandbox.fs(),
                workspace_cell.clone(),
                config.required_extension.clone(),
            )
            .with_default_language(config.default_language.clone()),
        );
        mount.mount().await?;

        let cancel = CancellationToken::new();
        let mut background = Vec::new();
        match mount.spawn_watcher(cancel.child_token()) {
            Ok(task) => background.push(task),
            Err(e) => warn!("Sandbox changes will not be observed: {}", e),
        }

        if let Some(snapshots) = snapshots.filter(|_| config.autosave.enabled) {
            background.push(tokio::spawn(autosave::run(
                mount.clone(),
                sandbox.fs(),
                snapshots,
                root.clone(),
                config.autosave.debounce(),
                cancel.child_token(),
            )));
        }

        let (prepare_tx, prepare_rx) = watch::channel(PrepareStatus::Pending);
        background.push(tokio::spawn({
            let processes = sandbox.processes();
            let shell = config.shell.clone();
            let cwd = root.clone();
            let cancel = cancel.child_token();
            async move {
                let prepare = run_prepare(
                    processes.as_ref(),
                    &shell,
                    &cwd,
                    prepare_command.as_deref(),
                    &prepare_tx,
                    prepare_output,
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        prepare_tx.send_replace(PrepareStatus::Failed("cancelled".to_string()));
                    }
                    result = prepare => {
                        if let Err(e) = result {
                            error!("Prepare command failed: {}", e);
                        }
                    }
                }
            }
        }));

        let editor = EditorSync::new(
            sandbox.clone(),
            editor,
            workspace_cell,
            selected,
            config.editor.clone(),
            cancel.child_token(),
        );
        let terminals = TerminalSupervisor::new(
            sandbox.processes(),
            config.shell.clone(),
            root.clone(),
            prepare_rx.clone(),
            size,
            terminal_list,
            config.terminal.resize_debounce(),
        );

        let playground = Self {
            config,
            store,
            sandbox,
            mount,
            editor,
            terminals,
            prepare: prepare_rx,
            trace,
            trace_scope: Mutex::new(cancel.child_token()),
            trace_release_armed: Arc::new(AtomicBool::new(false)),
            cancel,
            background: Mutex::new(background),
        };

        if let Some(path) = initial_file {
            let id = playground.workspace().get().find_file(&path).map(|f| f.id());
            match id {
                Some(id) => {
                    if let Err(e) = playground.editor.select(id).await {
                        warn!("Could not open {}: {}", path, e);
                    }
                }
                None => warn!("Initial file {} is not in the workspace", path),
            }
        }

        info!("Playground '{}' ready", root);
        Ok(playground)
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn workspace(&self) -> &Cell<Workspace> {
        self.mount.workspace()
    }

    pub fn mount(&self) -> &SandboxMount {
        &self.mount
    }

    pub fn editor(&self) -> &EditorSync {
        &self.editor
    }

    pub fn terminals(&self) -> &TerminalSupervisor {
        &self.terminals
    }

    pub fn trace(&self) -> &Cell<TraceForest> {
        &self.trace
    }

    pub fn prepare_status(&self) -> watch::Receiver<PrepareStatus> {
        self.prepare.clone()
    }

    /// Wait until the prepare command is through
    pub async fn prepared(&self) -> PrepareStatus {
        let mut rx = self.prepare.clone();
        let status = match rx.wait_for(PrepareStatus::is_done).await {
            Ok(status) => status.clone(),
            Err(_) => PrepareStatus::Failed("prepare runner dropped".to_string()),
        };
        status
    }

    pub async fn create(&self, parent: Option<NodeId>, name: &str, kind: NodeKind) -> Result<Node> {
        self.mount.create(parent, name, kind).await
    }

    pub async fn rename(&self, id: NodeId, new_name: &str) -> Result<Node> {
        self.mount.rename(id, new_name).await
    }

    /// Remove a node, closing the editor first when it shows a removed file
    pub async fn remove(&self, id: NodeId) -> Result<()> {
        self.mount
            .remove_with(id, |removed| async move {
                let Some(selected) = self.editor.selected().get() else {
                    return;
                };
                let workspace = self.workspace().get();
                let affected = workspace.path_of(selected).is_some_and(|selected| {
                    selected == removed || selected.starts_with(&format!("{}/", removed))
                });
                if affected {
                    self.editor.deselect().await;
                }
            })
            .await
    }

    pub async fn select(&self, id: NodeId) -> Result<()> {
        self.editor.select(id).await
    }

    pub async fn open_terminal(
        &self,
        spec: &ShellSpec,
        surface: Arc<dyn TerminalSurface>,
    ) -> Result<TerminalHandle> {
        self.terminals.open(spec, surface).await
    }

    /// Fold trace records found in `output` into the trace cell. The
    /// collector stops once the trace cell has gone idle.
    pub fn attach_trace(&self, output: BoxStream<'static, Bytes>) {
        let cancel = {
            let mut scope = self.trace_scope.lock().unwrap_or_else(|e| e.into_inner());
            if scope.is_cancelled() {
                *scope = self.cancel.child_token();
            }
            if !self.trace_release_armed.swap(true, Ordering::SeqCst) {
                let armed = self.trace_release_armed.clone();
                let released = scope.clone();
                self.trace.on_idle(move || {
                    armed.store(false, Ordering::SeqCst);
                    info!("Trace cell idle, stopping collectors");
                    released.cancel();
                });
            }
            scope.child_token()
        };
        let task = tokio::spawn(trace::collect(output, self.trace.clone(), cancel));
        self.background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }

    /// Encoded snapshot of what is in the sandbox right now
    pub async fn share_code(&self) -> Result<String> {
        let captured = self.mount.capture().await?;
        codec::encode(&captured)
    }

    /// Flush the editor, stop background work and release the sandbox
    pub async fn shutdown(self) {
        self.editor.shutdown().await;
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }
        info!(
            "Playground '{}' shut down (lease {})",
            self.workspace().get().name(),
            self.sandbox.lease_id()
        );
    }
}

impl Drop for Playground {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
