use std::collections::BTreeSet;

use crate::session::id::{base_path, discriminator, is_duplicate};

use super::types::TerminalTab;

/// Join a project directory onto the workspace root.
pub fn project_path(root: &str, project: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        project.trim_start_matches('/')
    )
}

/// Tab strip for a root: root first, then each project, every base followed
/// by its activated duplicates in discriminator order.
pub fn derive_tabs(root: &str, projects: &[String], activated: &BTreeSet<String>) -> Vec<TerminalTab> {
    let mut tabs = Vec::with_capacity(projects.len() + 1 + activated.len());

    let root_name = tab_name(root);
    push_with_duplicates(&mut tabs, root, &root_name, true, activated);

    for project in projects {
        let path = project_path(root, project);
        if path == root {
            continue;
        }
        push_with_duplicates(&mut tabs, &path, project, false, activated);
    }

    tabs
}

fn push_with_duplicates(
    tabs: &mut Vec<TerminalTab>,
    path: &str,
    name: &str,
    is_root: bool,
    activated: &BTreeSet<String>,
) {
    tabs.push(TerminalTab {
        name: name.to_string(),
        path: path.to_string(),
        is_root,
        is_duplicate: false,
    });

    let mut duplicates: Vec<&String> = activated
        .iter()
        .filter(|p| is_duplicate(p) && base_path(p) == path)
        .collect();
    duplicates.sort_by_key(|p| discriminator(p).unwrap_or(i64::MAX));

    for (index, dup) in duplicates.into_iter().enumerate() {
        tabs.push(TerminalTab {
            name: format!("{} ({})", name, index + 2),
            path: dup.clone(),
            is_root,
            is_duplicate: true,
        });
    }
}

fn tab_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(path)
        .to_string()
}
