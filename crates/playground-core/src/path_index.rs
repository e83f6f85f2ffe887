//! Derived node identity → path mapping

use playground_types::{File, Node, NodeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Paths of every reachable node, in pre-order.
///
/// Built once per tree value; lookups go through node identity because two
/// directories may legally hold files with the same name.
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    entries: Vec<(String, Node)>,
    by_id: HashMap<NodeId, usize>,
}

impl PathIndex {
    pub fn build(tree: &[Node]) -> Self {
        let mut index = Self::default();
        index.walk(tree, "");
        index
    }

    fn walk(&mut self, nodes: &[Node], prefix: &str) {
        for node in nodes {
            let path = format!("{}{}", prefix, node.name());
            self.by_id.insert(node.id(), self.entries.len());
            self.entries.push((path.clone(), node.clone()));

            if let Node::Directory(dir) = node {
                self.walk(dir.children(), &format!("{}/", path));
            }
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&str> {
        self.by_id.get(&id).map(|&i| self.entries[i].0.as_str())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.by_id.get(&id).map(|&i| &self.entries[i].1)
    }

    /// Reverse scan for the file whose full path equals `path`
    pub fn find_file(&self, path: &str) -> Option<&Arc<File>> {
        self.entries
            .iter()
            .rev()
            .find(|(p, node)| p == path && node.as_file().is_some())
            .and_then(|(_, node)| node.as_file())
    }

    /// `(path, node)` pairs in pre-order: directories precede their contents
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(p, n)| (p.as_str(), n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playground_types::Directory;

    #[test]
    fn test_preorder_paths() {
        let main = Node::from(File::new("main.ts", ""));
        let nested = Node::from(File::new("main.ts", ""));
        let lib = Node::from(Directory::new("lib", vec![nested.clone()]));
        let src = Node::from(Directory::new("src", vec![main.clone(), lib.clone()]));

        let index = PathIndex::build(&[src.clone()]);
        let paths: Vec<&str> = index.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["src", "src/main.ts", "src/lib", "src/lib/main.ts"]);

        assert_eq!(index.get(main.id()), Some("src/main.ts"));
        assert_eq!(index.get(nested.id()), Some("src/lib/main.ts"));
        assert_eq!(index.get(NodeId::fresh()), None);
    }

    #[test]
    fn test_find_file_ignores_directories() {
        let dir = Node::from(Directory::new("package.json", vec![]));
        let index = PathIndex::build(&[dir]);
        assert!(index.find_file("package.json").is_none());

        let manifest = File::new("package.json", "{}");
        let id = manifest.id();
        let index = PathIndex::build(&[Node::from(manifest)]);
        assert_eq!(index.find_file("package.json").map(|f| f.id()), Some(id));
    }
}
