use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-workspace terminal layout, the unit that is cached, broadcast and
/// reconciled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalLayout {
    #[serde(default)]
    pub activated_terminals: BTreeSet<String>,
    #[serde(default)]
    pub active_terminal_tab: Option<String>,
    #[serde(default)]
    pub terminal_visible: bool,
}

impl TerminalLayout {
    /// Nothing opened, nothing focused, panel collapsed. Never broadcast.
    pub fn is_initial(&self) -> bool {
        self.activated_terminals.is_empty()
            && self.active_terminal_tab.is_none()
            && !self.terminal_visible
    }

    /// Drop an active tab that is not activated.
    pub(crate) fn sanitized(mut self) -> Self {
        if let Some(active) = &self.active_terminal_tab {
            if !self.activated_terminals.contains(active) {
                self.active_terminal_tab = None;
            }
        }
        self
    }
}

/// Backend cache key: a workspace and optionally one of its worktrees.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceKey {
    pub workspace_path: String,
    #[serde(default)]
    pub worktree_name: Option<String>,
}

impl WorkspaceKey {
    pub fn new(workspace_path: impl Into<String>, worktree_name: Option<String>) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            worktree_name,
        }
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.worktree_name {
            Some(name) => write!(f, "{}@{}", self.workspace_path, name),
            None => f.write_str(&self.workspace_path),
        }
    }
}

/// What the user selected: the workspace, the worktree, the directory that
/// scopes the terminals and the projects under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub workspace_path: String,
    pub worktree_name: Option<String>,
    /// Workspace root for the main workspace, the worktree directory otherwise
    pub root: String,
    /// Project directories relative to `root`
    pub projects: Vec<String>,
}

impl WorkspaceContext {
    pub fn main(workspace_path: impl Into<String>, projects: Vec<String>) -> Self {
        let workspace_path = workspace_path.into();
        Self {
            root: workspace_path.clone(),
            workspace_path,
            worktree_name: None,
            projects,
        }
    }

    pub fn worktree(
        workspace_path: impl Into<String>,
        worktree_name: impl Into<String>,
        root: impl Into<String>,
        projects: Vec<String>,
    ) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            worktree_name: Some(worktree_name.into()),
            root: root.into(),
            projects,
        }
    }

    pub fn key(&self) -> WorkspaceKey {
        WorkspaceKey::new(self.workspace_path.clone(), self.worktree_name.clone())
    }
}

/// Display-only tab record, always derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalTab {
    pub name: String,
    pub path: String,
    pub is_root: bool,
    pub is_duplicate: bool,
}

/// Locally generated identity of this client instance, used for echo
/// suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A layout update as it travels between clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalStateMessage {
    pub workspace_path: String,
    #[serde(default)]
    pub worktree_name: Option<String>,
    pub layout: TerminalLayout,
    pub client_id: ClientId,
    #[serde(default)]
    pub seq: Option<u64>,
}

impl TerminalStateMessage {
    pub fn key(&self) -> WorkspaceKey {
        WorkspaceKey::new(self.workspace_path.clone(), self.worktree_name.clone())
    }
}

/// Everything the rendering layer needs, published after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutSnapshot {
    pub root: Option<String>,
    pub key: Option<WorkspaceKey>,
    pub mounted: BTreeSet<String>,
    pub layout: TerminalLayout,
    pub tabs: Vec<TerminalTab>,
}
