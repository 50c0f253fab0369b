pub mod machine;
pub mod tabs;
mod types;

pub use machine::{LayoutEvent, LayoutMachine, SideEffect, Transition};
pub use tabs::{derive_tabs, project_path};
pub use types::{
    ClientId, LayoutSnapshot, TerminalLayout, TerminalStateMessage, TerminalTab,
    WorkspaceContext, WorkspaceKey,
};
