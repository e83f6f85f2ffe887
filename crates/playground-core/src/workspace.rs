//! Workspace aggregate: an immutable file tree plus run configuration
//!
//! Every structural operation returns a new `Workspace` with a freshly built
//! [`PathIndex`]; existing values are never mutated.

use crate::path_index::PathIndex;
use playground_types::{File, Node, NodeId, ShellSpec, WorkspaceSnapshot};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Workspace {
    name: String,
    tree: Arc<[Node]>,
    initial_file_path: Option<String>,
    prepare_command: Option<String>,
    shells: Vec<ShellSpec>,
    index: Arc<PathIndex>,
}

impl Workspace {
    /// Create a workspace mounted at the directory `name`
    pub fn new(name: impl Into<String>, tree: Vec<Node>) -> Self {
        let index = Arc::new(PathIndex::build(&tree));
        Self {
            name: name.into(),
            tree: tree.into(),
            initial_file_path: None,
            prepare_command: None,
            shells: Vec::new(),
            index,
        }
    }

    pub fn with_initial_file_path(mut self, path: impl Into<String>) -> Self {
        self.initial_file_path = Some(path.into());
        self
    }

    pub fn with_prepare_command(mut self, command: impl Into<String>) -> Self {
        self.prepare_command = Some(command.into());
        self
    }

    pub fn with_shells(mut self, shells: Vec<ShellSpec>) -> Self {
        self.shells = shells;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree(&self) -> &[Node] {
        &self.tree
    }

    pub fn initial_file_path(&self) -> Option<&str> {
        self.initial_file_path.as_deref()
    }

    pub fn prepare_command(&self) -> Option<&str> {
        self.prepare_command.as_deref()
    }

    pub fn shells(&self) -> &[ShellSpec] {
        &self.shells
    }

    /// Same configuration, different tree
    fn with_tree(&self, tree: Vec<Node>) -> Self {
        Self {
            name: self.name.clone(),
            index: Arc::new(PathIndex::build(&tree)),
            tree: tree.into(),
            initial_file_path: self.initial_file_path.clone(),
            prepare_command: self.prepare_command.clone(),
            shells: self.shells.clone(),
        }
    }

    /// Depth-first rebuild of the tree.
    ///
    /// `f` returning `None` drops the node with its subtree. A returned node
    /// is only recursed into when it is the very same allocation as the
    /// original; any other replacement is inserted verbatim.
    pub fn filter_map<F>(&self, mut f: F) -> Workspace
    where
        F: FnMut(&Node) -> Option<Node>,
    {
        let tree = filter_map_nodes(&self.tree, &mut f);
        self.with_tree(tree)
    }

    /// Append nodes to the root of the tree
    pub fn append(&self, nodes: impl IntoIterator<Item = Node>) -> Workspace {
        let mut tree = self.tree.to_vec();
        tree.extend(nodes);
        self.with_tree(tree)
    }

    /// Append `node` to the directory identified by `parent`
    pub fn append_child(&self, parent: NodeId, node: Node) -> Workspace {
        self.filter_map(|current| match current {
            Node::Directory(dir) if dir.id() == parent => {
                let mut children = dir.children().to_vec();
                children.push(node.clone());
                Some(Node::from(dir.with_children(children)))
            }
            _ => Some(current.clone()),
        })
    }

    /// Replace the node that has `target`'s identity
    pub fn replace_node(&self, target: &Node, replacement: Node) -> Workspace {
        let id = target.id();
        self.filter_map(|current| {
            if current.id() == id {
                Some(replacement.clone())
            } else {
                Some(current.clone())
            }
        })
    }

    pub fn remove_node(&self, target: &Node) -> Workspace {
        let id = target.id();
        self.filter_map(|current| (current.id() != id).then(|| current.clone()))
    }

    pub fn path_index(&self) -> &PathIndex {
        &self.index
    }

    /// Path of `node` relative to the workspace root, if it is reachable
    pub fn path_to(&self, node: &Node) -> Option<&str> {
        self.index.get(node.id())
    }

    pub fn path_of(&self, id: NodeId) -> Option<&str> {
        self.index.get(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index.node(id)
    }

    /// Resolve a well-known file by its full relative path
    pub fn find_file(&self, path: &str) -> Option<&Arc<File>> {
        self.index.find_file(path)
    }

    /// Every node with its relative path, parents first
    pub fn file_paths(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.index.iter()
    }

    pub fn to_snapshot(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            name: self.name.clone(),
            tree: self.tree.to_vec(),
            initial_file_path: self.initial_file_path.clone(),
            prepare_command: self.prepare_command.clone(),
            shells: self.shells.clone(),
        }
    }

    pub fn from_snapshot(snapshot: WorkspaceSnapshot) -> Self {
        let mut workspace = Self::new(snapshot.name, snapshot.tree).with_shells(snapshot.shells);
        workspace.initial_file_path = snapshot.initial_file_path;
        workspace.prepare_command = snapshot.prepare_command;
        workspace
    }
}

impl PartialEq for Workspace {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.tree == other.tree
            && self.initial_file_path == other.initial_file_path
            && self.prepare_command == other.prepare_command
            && self.shells == other.shells
    }
}

fn filter_map_nodes<F>(nodes: &[Node], f: &mut F) -> Vec<Node>
where
    F: FnMut(&Node) -> Option<Node>,
{
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let Some(mapped) = f(node) else {
            continue;
        };

        match &mapped {
            Node::Directory(dir) if mapped.ptr_eq(node) => {
                let children = filter_map_nodes(dir.children(), f);
                let unchanged = children.len() == dir.children().len()
                    && children
                        .iter()
                        .zip(dir.children())
                        .all(|(a, b)| a.ptr_eq(b));
                if unchanged {
                    out.push(mapped);
                } else {
                    out.push(Node::from(dir.with_children(children)));
                }
            }
            _ => out.push(mapped),
        }
    }
    out
}
