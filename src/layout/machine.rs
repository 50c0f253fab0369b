use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::session::id::{duplicate_path, is_under};

use super::tabs::derive_tabs;
use super::types::{
    ClientId, LayoutSnapshot, TerminalLayout, TerminalStateMessage, WorkspaceContext, WorkspaceKey,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutEvent {
    OpenTab(String),
    CloseTab(String),
    CloseOthers(String),
    CloseAll,
    DuplicateTab { path: String, discriminator: i64 },
    ToggleVisibility,
    SwitchWorkspaceRoot(WorkspaceContext),
    SetProjects(Vec<String>),
    /// Result of a `FetchAuthoritative` effect
    ReconcileFetched {
        key: WorkspaceKey,
        generation: u64,
        layout: Option<TerminalLayout>,
    },
    ReceiveExternalUpdate(TerminalStateMessage),
    /// Connection re-established, re-read the backend cache
    Resync,
    /// Worktree archived or deleted
    CleanupPrefix(String),
}

/// Work the caller performs after a transition, outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Broadcast {
        key: WorkspaceKey,
        layout: TerminalLayout,
    },
    ClosePty(String),
    ResizeNudge,
    FetchAuthoritative {
        key: WorkspaceKey,
        generation: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub layout: TerminalLayout,
    pub effects: Vec<SideEffect>,
}

/// Framework-agnostic terminal layout state.
///
/// `mounted` is shared by every root so that PTY-bound surfaces survive
/// navigation; `layout` belongs to the current root and is parked in
/// `root_cache` while another root is shown.
#[derive(Debug)]
pub struct LayoutMachine {
    client_id: ClientId,
    context: Option<WorkspaceContext>,
    mounted: BTreeSet<String>,
    layout: TerminalLayout,
    root_cache: HashMap<String, TerminalLayout>,
    generation: u64,
    last_seq: HashMap<ClientId, u64>,
    /// A local edit landed after the last authoritative fetch was issued
    edited_since_fetch: bool,
}

impl LayoutMachine {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            context: None,
            mounted: BTreeSet::new(),
            layout: TerminalLayout::default(),
            root_cache: HashMap::new(),
            generation: 0,
            last_seq: HashMap::new(),
            edited_since_fetch: false,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn layout(&self) -> &TerminalLayout {
        &self.layout
    }

    pub fn mounted(&self) -> &BTreeSet<String> {
        &self.mounted
    }

    pub fn context(&self) -> Option<&WorkspaceContext> {
        self.context.as_ref()
    }

    pub fn key(&self) -> Option<WorkspaceKey> {
        self.context.as_ref().map(WorkspaceContext::key)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> LayoutSnapshot {
        let tabs = match &self.context {
            Some(ctx) => derive_tabs(&ctx.root, &ctx.projects, &self.layout.activated_terminals),
            None => Vec::new(),
        };
        LayoutSnapshot {
            root: self.context.as_ref().map(|ctx| ctx.root.clone()),
            key: self.key(),
            mounted: self.mounted.clone(),
            layout: self.layout.clone(),
            tabs,
        }
    }

    pub fn invariants_hold(&self) -> bool {
        let active_ok = match &self.layout.active_terminal_tab {
            Some(active) => self.layout.activated_terminals.contains(active),
            None => true,
        };
        active_ok && self.layout.activated_terminals.is_subset(&self.mounted)
    }

    pub fn apply(&mut self, event: LayoutEvent) -> Transition {
        let before = self.layout.clone();
        let mut effects = Vec::new();

        let local_edit = match event {
            LayoutEvent::OpenTab(path) => {
                self.open(path, &mut effects);
                true
            }
            LayoutEvent::CloseTab(path) => {
                self.close(&path, &mut effects);
                true
            }
            LayoutEvent::CloseOthers(keep) => {
                let doomed: Vec<String> = self
                    .layout
                    .activated_terminals
                    .iter()
                    .filter(|p| **p != keep)
                    .cloned()
                    .collect();
                for path in doomed {
                    self.close(&path, &mut effects);
                }
                true
            }
            LayoutEvent::CloseAll => {
                let doomed: Vec<String> = self.layout.activated_terminals.iter().cloned().collect();
                for path in doomed {
                    self.close(&path, &mut effects);
                }
                true
            }
            LayoutEvent::DuplicateTab { path, discriminator } => {
                let mut disc = discriminator;
                let mut dup = duplicate_path(&path, disc);
                while self.mounted.contains(&dup) {
                    disc += 1;
                    dup = duplicate_path(&path, disc);
                }
                self.open(dup, &mut effects);
                true
            }
            LayoutEvent::ToggleVisibility => {
                self.toggle(&mut effects);
                true
            }
            LayoutEvent::SwitchWorkspaceRoot(ctx) => {
                self.switch(ctx, &mut effects);
                false
            }
            LayoutEvent::SetProjects(projects) => {
                if let Some(ctx) = self.context.as_mut() {
                    ctx.projects = projects;
                }
                false
            }
            LayoutEvent::ReconcileFetched { key, generation, layout } => {
                self.reconcile(key, generation, layout);
                false
            }
            LayoutEvent::ReceiveExternalUpdate(msg) => {
                self.receive(msg);
                false
            }
            LayoutEvent::Resync => {
                if let Some(key) = self.key() {
                    self.edited_since_fetch = false;
                    effects.push(SideEffect::FetchAuthoritative {
                        key,
                        generation: self.generation,
                    });
                }
                false
            }
            LayoutEvent::CleanupPrefix(prefix) => {
                self.cleanup(&prefix, &mut effects);
                false
            }
        };

        if local_edit && self.layout != before {
            self.edited_since_fetch = true;
        }
        if local_edit && self.layout != before && !self.layout.is_initial() {
            if let Some(key) = self.key() {
                effects.push(SideEffect::Broadcast {
                    key,
                    layout: self.layout.clone(),
                });
            }
        }

        debug_assert!(self.invariants_hold(), "layout invariants violated");
        Transition {
            layout: self.layout.clone(),
            effects,
        }
    }

    fn open(&mut self, path: String, effects: &mut Vec<SideEffect>) {
        self.layout.terminal_visible = true;
        self.layout.active_terminal_tab = Some(path.clone());
        self.layout.activated_terminals.insert(path.clone());
        self.mounted.insert(path);
        effects.push(SideEffect::ResizeNudge);
    }

    fn close(&mut self, path: &str, effects: &mut Vec<SideEffect>) {
        let was_activated = self.layout.activated_terminals.contains(path);
        if !was_activated && !self.mounted.contains(path) {
            return;
        }

        let order = self.tab_order();
        self.layout.activated_terminals.remove(path);
        self.mounted.remove(path);
        self.forget_cached(|p| p == path);
        effects.push(SideEffect::ClosePty(path.to_string()));

        if self.layout.active_terminal_tab.as_deref() == Some(path) {
            let next = self.replacement(&order, path);
            self.layout.active_terminal_tab = next;
        }
    }

    /// Nearest activated tab after the closed one, else before, else none.
    fn replacement(&self, order: &[String], closed: &str) -> Option<String> {
        let activated = &self.layout.activated_terminals;
        let pos = order.iter().position(|p| p == closed)?;
        order[pos + 1..]
            .iter()
            .find(|p| activated.contains(*p))
            .or_else(|| order[..pos].iter().rev().find(|p| activated.contains(*p)))
            .cloned()
    }

    /// Full tab order of the current root, plus activated paths that fall
    /// outside it (projects removed since they were opened).
    fn tab_order(&self) -> Vec<String> {
        let mut order: Vec<String> = match &self.context {
            Some(ctx) => derive_tabs(&ctx.root, &ctx.projects, &self.layout.activated_terminals)
                .into_iter()
                .map(|tab| tab.path)
                .collect(),
            None => Vec::new(),
        };
        for path in &self.layout.activated_terminals {
            if !order.contains(path) {
                order.push(path.clone());
            }
        }
        order
    }

    fn toggle(&mut self, effects: &mut Vec<SideEffect>) {
        let becoming_visible = !self.layout.terminal_visible;
        self.layout.terminal_visible = becoming_visible;

        if becoming_visible && self.layout.active_terminal_tab.is_none() {
            if let Some(root) = self.context.as_ref().map(|ctx| ctx.root.clone()) {
                self.open(root, effects);
            }
        }
    }

    fn switch(&mut self, mut ctx: WorkspaceContext, effects: &mut Vec<SideEffect>) {
        if ctx.root.len() > 1 {
            ctx.root = ctx.root.trim_end_matches('/').to_string();
        }

        if let Some(current) = &self.context {
            self.root_cache.insert(current.root.clone(), self.layout.clone());
        }

        let restored = self
            .root_cache
            .get(&ctx.root)
            .cloned()
            .unwrap_or_default()
            .sanitized();

        self.generation += 1;
        self.last_seq.clear();
        self.edited_since_fetch = false;
        self.mounted.extend(restored.activated_terminals.iter().cloned());
        self.layout = restored;

        debug!(root = %ctx.root, key = %ctx.key(), generation = self.generation, "switched workspace root");
        effects.push(SideEffect::FetchAuthoritative {
            key: ctx.key(),
            generation: self.generation,
        });
        self.context = Some(ctx);
    }

    fn reconcile(&mut self, key: WorkspaceKey, generation: u64, fetched: Option<TerminalLayout>) {
        if generation != self.generation || self.key().as_ref() != Some(&key) {
            debug!(key = %key, generation, current = self.generation, "discarding stale reconciliation");
            return;
        }
        let Some(fetched) = fetched else {
            return;
        };
        if self.edited_since_fetch {
            debug!(key = %key, "local edits since fetch win over the cached layout");
            return;
        }
        let fetched = fetched.sanitized();
        if fetched != self.layout {
            debug!(key = %key, "adopting authoritative layout");
            self.adopt(fetched);
        }
    }

    fn receive(&mut self, msg: TerminalStateMessage) {
        if self.key() != Some(msg.key()) {
            return;
        }
        if msg.client_id == self.client_id {
            return;
        }
        if let Some(seq) = msg.seq {
            if let Some(&last) = self.last_seq.get(&msg.client_id) {
                if seq <= last {
                    debug!(client_id = %msg.client_id, seq, last, "dropping stale layout update");
                    return;
                }
            }
            self.last_seq.insert(msg.client_id.clone(), seq);
        }

        let incoming = msg.layout.sanitized();
        if incoming != self.layout {
            debug!(client_id = %msg.client_id, "applying peer layout update");
            self.adopt(incoming);
        }
    }

    /// Take over a layout that did not originate here.
    fn adopt(&mut self, layout: TerminalLayout) {
        for removed in self
            .layout
            .activated_terminals
            .difference(&layout.activated_terminals)
        {
            self.mounted.remove(removed);
        }
        self.mounted.extend(layout.activated_terminals.iter().cloned());
        self.layout = layout;
    }

    fn cleanup(&mut self, prefix: &str, effects: &mut Vec<SideEffect>) {
        let doomed: BTreeSet<String> = self
            .mounted
            .iter()
            .chain(self.layout.activated_terminals.iter())
            .filter(|p| is_under(p, prefix))
            .cloned()
            .collect();

        for path in &doomed {
            self.mounted.remove(path);
            self.layout.activated_terminals.remove(path);
            effects.push(SideEffect::ClosePty(path.clone()));
        }

        if self
            .layout
            .active_terminal_tab
            .as_deref()
            .is_some_and(|active| doomed.contains(active))
        {
            let next = self
                .tab_order()
                .into_iter()
                .find(|p| self.layout.activated_terminals.contains(p));
            self.layout.active_terminal_tab = next;
        }

        self.root_cache.retain(|root, _| !is_under(root, prefix));
        self.forget_cached(|p| is_under(p, prefix));
    }

    /// Remove closed sessions from the layouts parked for other roots.
    fn forget_cached(&mut self, closed: impl Fn(&str) -> bool) {
        for layout in self.root_cache.values_mut() {
            layout.activated_terminals.retain(|p| !closed(p.as_str()));
            if layout.active_terminal_tab.as_deref().is_some_and(&closed) {
                layout.active_terminal_tab = None;
            }
        }
    }
}
