//! Workspace file tree nodes
//!
//! Nodes are immutable values shared through `Arc`. Every node carries a
//! [`NodeId`] minted when it is constructed (or deserialized); derived values
//! that stand for the same logical node, such as a renamed file or a
//! directory with edited children, keep that id.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Language assigned to files that do not declare one
pub const DEFAULT_LANGUAGE: &str = "typescript";

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Identity of a node within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Mint a new, never before used id
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::fresh()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of node, used when validating and creating entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Directory => write!(f, "directory"),
        }
    }
}

/// Leaf node holding source text
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    #[serde(skip)]
    id: NodeId,
    name: String,
    #[serde(default)]
    initial_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    solution: Option<String>,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    user_managed: bool,
}

impl File {
    pub fn new(name: impl Into<String>, initial_content: impl Into<String>) -> Self {
        Self {
            id: NodeId::fresh(),
            name: name.into(),
            initial_content: initial_content.into(),
            solution: None,
            language: default_language(),
            user_managed: false,
        }
    }

    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.solution = Some(solution.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn user_managed(&self) -> bool {
        self.user_managed
    }

    pub fn set_user_managed(mut self, user_managed: bool) -> Self {
        self.user_managed = user_managed;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_content(&self) -> &str {
        &self.initial_content
    }

    pub fn solution(&self) -> Option<&str> {
        self.solution.as_deref()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Same logical file under a new name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.duplicate()
        }
    }

    /// Same logical file with different initial content
    pub fn with_initial_content(&self, content: impl Into<String>) -> Self {
        Self {
            initial_content: content.into(),
            ..self.duplicate()
        }
    }

    fn duplicate(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            initial_content: self.initial_content.clone(),
            solution: self.solution.clone(),
            language: self.language.clone(),
            user_managed: self.user_managed,
        }
    }
}

// Structural equality; identity is deliberately ignored.
impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.initial_content == other.initial_content
            && self.solution == other.solution
            && self.language == other.language
            && self.user_managed == other.user_managed
    }
}

/// Composite node; child order is display order
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    #[serde(skip)]
    id: NodeId,
    name: String,
    #[serde(default)]
    user_managed: bool,
    #[serde(default)]
    children: Vec<Node>,
}

impl Directory {
    pub fn new(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            id: NodeId::fresh(),
            name: name.into(),
            user_managed: false,
            children,
        }
    }

    pub fn set_user_managed(mut self, user_managed: bool) -> Self {
        self.user_managed = user_managed;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user_managed(&self) -> bool {
        self.user_managed
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Same logical directory holding `children`
    pub fn with_children(&self, children: Vec<Node>) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            user_managed: self.user_managed,
            children,
        }
    }

    /// Same logical directory under a new name; children are shared
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            id: self.id,
            name: name.into(),
            user_managed: self.user_managed,
            children: self.children.clone(),
        }
    }
}

impl PartialEq for Directory {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.user_managed == other.user_managed
            && self.children == other.children
    }
}

/// A file or a directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    File(Arc<File>),
    Directory(Arc<Directory>),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::File(file) => file.id(),
            Node::Directory(dir) => dir.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::File(file) => file.name(),
            Node::Directory(dir) => dir.name(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Directory(_) => NodeKind::Directory,
        }
    }

    pub fn user_managed(&self) -> bool {
        match self {
            Node::File(file) => file.user_managed(),
            Node::Directory(dir) => dir.user_managed(),
        }
    }

    pub fn as_file(&self) -> Option<&Arc<File>> {
        match self {
            Node::File(file) => Some(file),
            Node::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Arc<Directory>> {
        match self {
            Node::Directory(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    /// Reference identity: both values point at the same allocation
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::File(a), Node::File(b)) => Arc::ptr_eq(a, b),
            (Node::Directory(a), Node::Directory(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Same logical node under a new name
    pub fn renamed(&self, name: impl Into<String>) -> Node {
        match self {
            Node::File(file) => Node::from(file.renamed(name)),
            Node::Directory(dir) => Node::from(dir.renamed(name)),
        }
    }
}

impl From<File> for Node {
    fn from(file: File) -> Self {
        Node::File(Arc::new(file))
    }
}

impl From<Directory> for Node {
    fn from(dir: Directory) -> Self {
        Node::Directory(Arc::new(dir))
    }
}
