//! Sandbox mount adapter
//!
//! Materializes a [`Workspace`] into the sandbox filesystem under a root
//! directory named after the workspace, and applies structural edits to both
//! the sandbox and the workspace cell. Edits are serialized by a per-mount
//! lock; the cell is only updated after the sandbox accepted the change.

use crate::ports::VirtualFs;
use crate::store::Cell;
use crate::workspace::Workspace;
use crate::{PlaygroundError, Result, ValidationError};
use futures::StreamExt;
use playground_types::{Directory, File, Node, NodeId, NodeKind};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Check a proposed node name against the naming rules
pub fn validate_name(
    name: &str,
    kind: NodeKind,
    required_extension: &str,
) -> std::result::Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ValidationError::PathSeparator);
    }
    if kind == NodeKind::File {
        if !name.ends_with(required_extension) {
            return Err(ValidationError::MissingExtension(required_extension.to_string()));
        }
        if name.len() <= required_extension.len() {
            return Err(ValidationError::MissingStem(required_extension.to_string()));
        }
    }
    Ok(())
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

async fn mkdir_idempotent(fs: &dyn VirtualFs, path: &str) -> Result<()> {
    match fs.mkdir(path).await {
        Err(e) if e.is_already_exists() => {
            debug!("Directory {} already mounted", path);
            Ok(())
        }
        other => other,
    }
}

/// Write every directory and file of `workspace` below `workspace.name()`.
///
/// Directories that already exist are accepted, so mounting twice yields the
/// same file set.
pub async fn mount(fs: &dyn VirtualFs, workspace: &Workspace) -> Result<()> {
    let root = workspace.name();
    mkdir_idempotent(fs, root).await?;

    let mut files = 0usize;
    for (path, node) in workspace.file_paths() {
        let target = join(root, path);
        match node {
            Node::Directory(_) => mkdir_idempotent(fs, &target).await?,
            Node::File(file) => {
                fs.write_file(&target, file.initial_content().as_bytes())
                    .await?;
                files += 1;
            }
        }
    }
    info!("Mounted workspace '{}' ({} files)", root, files);
    Ok(())
}

/// Keeps one sandbox directory in step with the workspace cell
pub struct SandboxMount {
    fs: Arc<dyn VirtualFs>,
    workspace: Cell<Workspace>,
    required_extension: String,
    language: Option<String>,
    edits: Mutex<()>,
}

impl SandboxMount {
    pub fn new(
        fs: Arc<dyn VirtualFs>,
        workspace: Cell<Workspace>,
        required_extension: impl Into<String>,
    ) -> Self {
        Self {
            fs,
            workspace,
            required_extension: required_extension.into(),
            language: None,
            edits: Mutex::new(()),
        }
    }

    /// Language given to files created through [`SandboxMount::create`]
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn workspace(&self) -> &Cell<Workspace> {
        &self.workspace
    }

    pub fn required_extension(&self) -> &str {
        &self.required_extension
    }

    /// Sandbox path of a workspace-relative path
    pub fn sandbox_path(&self, relative: &str) -> String {
        join(self.workspace.get().name(), relative)
    }

    pub async fn mount(&self) -> Result<()> {
        let _guard = self.edits.lock().await;
        mount(self.fs.as_ref(), &self.workspace.get()).await
    }

    /// Create an empty file or directory under `parent` (the root when `None`)
    pub async fn create(&self, parent: Option<NodeId>, name: &str, kind: NodeKind) -> Result<Node> {
        validate_name(name, kind, &self.required_extension)?;
        let _guard = self.edits.lock().await;
        let current = self.workspace.get();

        let (parent_path, siblings) = match parent {
            Some(id) => {
                let dir = current
                    .node(id)
                    .and_then(Node::as_directory)
                    .ok_or_else(|| PlaygroundError::NotFound(format!("directory {}", id)))?;
                let path = current.path_of(id).unwrap_or_default().to_string();
                (path, dir.children().to_vec())
            }
            None => (String::new(), current.tree().to_vec()),
        };
        let relative = join(&parent_path, name);
        if siblings.iter().any(|n| n.name() == name) {
            return Err(PlaygroundError::AlreadyExists(relative));
        }

        let target = join(current.name(), &relative);
        let node: Node = match kind {
            NodeKind::File => {
                self.fs.write_file(&target, b"").await?;
                let file = File::new(name, "").set_user_managed(true);
                match &self.language {
                    Some(language) => file.with_language(language.as_str()).into(),
                    None => file.into(),
                }
            }
            NodeKind::Directory => {
                self.fs.mkdir(&target).await?;
                Directory::new(name, Vec::new()).set_user_managed(true).into()
            }
        };

        let inserted = node.clone();
        self.workspace.update(move |ws| match parent {
            Some(id) => ws.append_child(id, inserted),
            None => ws.append([inserted]),
        });
        info!("Created {}", relative);
        Ok(node)
    }

    /// Rename the node `id`; the workspace only changes if the sandbox did
    pub async fn rename(&self, id: NodeId, new_name: &str) -> Result<Node> {
        let _guard = self.edits.lock().await;
        let current = self.workspace.get();
        let node = current
            .node(id)
            .cloned()
            .ok_or_else(|| PlaygroundError::NotFound(format!("node {}", id)))?;
        validate_name(new_name, node.kind(), &self.required_extension)?;
        if node.name() == new_name {
            return Ok(node);
        }

        let renamed = node.renamed(new_name);
        let next = current.replace_node(&node, renamed.clone());
        let (Some(old_path), Some(new_path)) = (current.path_of(id), next.path_of(id)) else {
            return Err(PlaygroundError::Defect(format!(
                "node {} has no path during rename",
                id
            )));
        };

        self.fs
            .rename(&join(current.name(), old_path), &join(current.name(), new_path))
            .await?;

        let replacement = renamed.clone();
        self.workspace
            .update(move |ws| ws.replace_node(&node, replacement));
        info!("Renamed {} to {}", old_path, new_path);
        Ok(renamed)
    }

    /// Delete the node `id` and everything below it
    pub async fn remove(&self, id: NodeId) -> Result<()> {
        self.remove_with(id, |_| async {}).await
    }

    /// Like [`SandboxMount::remove`], running `before` with the node's
    /// workspace-relative path once no other edit can move it.
    pub async fn remove_with<F, Fut>(&self, id: NodeId, before: F) -> Result<()>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let _guard = self.edits.lock().await;
        let current = self.workspace.get();
        let node = current
            .node(id)
            .cloned()
            .ok_or_else(|| PlaygroundError::NotFound(format!("node {}", id)))?;
        let path = current.path_of(id).unwrap_or_default().to_string();

        before(path.clone()).await;
        self.fs.remove(&join(current.name(), &path), true).await?;
        self.workspace.update(move |ws| ws.remove_node(&node));
        info!("Removed {}", path);
        Ok(())
    }

    /// The current workspace with every file's content read back from the
    /// sandbox. Node identities are kept.
    pub async fn capture(&self) -> Result<Workspace> {
        let current = self.workspace.get();
        let mut contents: HashMap<NodeId, String> = HashMap::new();

        for (path, node) in current.file_paths() {
            let Node::File(file) = node else {
                continue;
            };
            match self.fs.read_file(&join(current.name(), path)).await {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if text != file.initial_content() {
                        contents.insert(file.id(), text);
                    }
                }
                Err(e) if e.is_not_found() => debug!("{} not in sandbox yet", path),
                Err(e) => return Err(e),
            }
        }

        Ok(current.filter_map(|node| match node {
            Node::File(file) => match contents.remove(&file.id()) {
                Some(text) => Some(Node::from(file.with_initial_content(text))),
                None => Some(node.clone()),
            },
            Node::Directory(_) => Some(node.clone()),
        }))
    }

    /// Log sandbox changes below the mount root until `cancel` fires
    pub fn spawn_watcher(&self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let root = self.workspace.get().name().to_string();
        let mut changes = self.fs.watch(&root)?;
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = changes.next() => match change {
                        Some(change) => debug!("Sandbox change: {:?}", change),
                        None => {
                            warn!("Sandbox watcher for {} ended", root);
                            break;
                        }
                    }
                }
            }
        }))
    }
}
