//! Playground Types - Pure type definitions
//!
//! This crate contains only pure data types with no async runtime dependencies:
//! the workspace file tree, shell specifications, and the span records emitted
//! by traced programs running inside the sandbox.

pub mod span;
pub mod tree;

pub use span::*;
pub use tree::*;

use serde::{Deserialize, Serialize};

/// A terminal to open once the workspace is mounted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellSpec {
    /// Command written to the shell after the prepare command has finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ShellSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label shown for the terminal, falling back to the command
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.command.as_deref())
            .unwrap_or("shell")
    }
}

/// Serialized form of a workspace, used for scaffolds, sharing and autosave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub name: String,
    #[serde(default)]
    pub tree: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepare_command: Option<String>,
    #[serde(default)]
    pub shells: Vec<ShellSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_json() {
        let json = r#"{
            "name": "example",
            "initialFilePath": "src/main.ts",
            "prepareCommand": "pnpm install",
            "shells": [{ "command": "pnpm start", "label": "Run" }, {}],
            "tree": [
                { "type": "file", "name": "package.json", "initialContent": "{}" },
                { "type": "directory", "name": "src", "children": [
                    { "type": "file", "name": "main.ts", "initialContent": "console.log(1)",
                      "solution": "console.log(2)", "userManaged": true }
                ]}
            ]
        }"#;

        let snapshot: WorkspaceSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.name, "example");
        assert_eq!(snapshot.tree.len(), 2);
        assert_eq!(snapshot.shells[0].display_label(), "Run");
        assert_eq!(snapshot.shells[1].display_label(), "shell");

        let src = snapshot.tree[1].as_directory().unwrap();
        let main = src.children()[0].as_file().unwrap();
        assert_eq!(main.language(), DEFAULT_LANGUAGE);
        assert_eq!(main.solution(), Some("console.log(2)"));
        assert!(main.user_managed());
    }
}
