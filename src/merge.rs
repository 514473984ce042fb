//! # Merge — Client-Side Panel State
//!
//! Reconciles polled batches into the four panel containers. The merger owns
//! the client's copy of everything the dashboard shows and is the only thing
//! that mutates it, so the poller can stay a thin scheduling loop.
//!
//! ## Rules
//!
//! - A result replaces the item with the same `result_id` in place, or is
//!   prepended when new. The selection is keyed by id and survives.
//! - A result hides the in-process placeholder with the same `process_id`.
//! - A hidden result removes its item.
//! - The cursor only moves forward.
//!
//! Applying the same batch twice leaves the panel unchanged.

use crate::classify::{Label, ResultKind};
use crate::protocol::{Cursor, ProcessesBatch, ResultEntry, ResultsBatch};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// The four result lists the panel renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Snaps,
    Runs,
    Sad,
    Mr,
}

impl Container {
    pub const ALL: [Container; 4] = [Container::Snaps, Container::Runs, Container::Sad, Container::Mr];

    pub fn for_kind(kind: ResultKind) -> Self {
        match kind {
            ResultKind::Single | ResultKind::Pair => Container::Snaps,
            ResultKind::Integrate | ResultKind::Merge => Container::Runs,
            ResultKind::Sad => Container::Sad,
            ResultKind::Mr => Container::Mr,
        }
    }
}

/// Lifecycle of a panel item: a placeholder while the pipeline has not
/// reported, then working, then a terminal label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemState {
    InProcess,
    Working,
    Terminal(Label),
}

impl ItemState {
    pub fn from_label(label: Label) -> Self {
        if label.is_in_flight() {
            ItemState::Working
        } else {
            ItemState::Terminal(label)
        }
    }

    /// Whether the server may legally move an item from `self` to `next`.
    /// Stale labels only follow a working item; everything else may be
    /// relabelled by a later detail update.
    pub fn can_become(&self, next: ItemState) -> bool {
        match next {
            ItemState::InProcess => *self == ItemState::InProcess,
            ItemState::Terminal(label) if label.is_stale() => {
                matches!(self, ItemState::Working | ItemState::InProcess)
                    || *self == ItemState::Terminal(label)
            }
            _ => true,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ItemState::InProcess | ItemState::Working)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelItem {
    pub entry: ResultEntry,
    pub state: ItemState,
}

impl PanelItem {
    pub fn result_id(&self) -> i64 {
        self.entry.common().result_id
    }

    pub fn process_id(&self) -> i64 {
        self.entry.common().process_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placeholder {
    pub process_id: i64,
    pub kind: ResultKind,
    pub repr: String,
    pub timestamp: DateTime<Utc>,
}

/// One rendered list: in-process placeholders above the results, both
/// newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerState {
    pub placeholders: Vec<Placeholder>,
    pub items: Vec<PanelItem>,
}

impl ContainerState {
    fn position(&self, result_id: i64) -> Option<usize> {
        self.items.iter().position(|i| i.result_id() == result_id)
    }
}

/// Side effects a batch asks the caller to perform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Items inserted, replaced or removed.
    pub changed: usize,
    /// The cursor moved; the run rankings table may have new rows.
    pub ranking_refresh: bool,
    /// The result open in the detail view was updated.
    pub reload_detail: bool,
    /// Results that finished a process the user was waiting on.
    pub load_waiting: Vec<i64>,
    /// Items whose transition the state machine does not allow.
    pub rejected_transitions: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panel {
    containers: HashMap<Container, ContainerState>,
    cursor: Cursor,
    selected: Option<i64>,
    open_detail: Option<i64>,
    waiting_for: HashMap<Container, i64>,
    /// Process ids that already have a result; their placeholders never return.
    resolved: HashSet<i64>,
}

impl Panel {
    pub fn new() -> Self {
        Panel::default()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn container(&self, c: Container) -> Option<&ContainerState> {
        self.containers.get(&c)
    }

    pub fn items(&self, c: Container) -> &[PanelItem] {
        self.containers.get(&c).map(|s| s.items.as_slice()).unwrap_or(&[])
    }

    pub fn placeholders(&self, c: Container) -> &[Placeholder] {
        self.containers
            .get(&c)
            .map(|s| s.placeholders.as_slice())
            .unwrap_or(&[])
    }

    pub fn find(&self, result_id: i64) -> Option<&PanelItem> {
        self.containers
            .values()
            .flat_map(|s| s.items.iter())
            .find(|i| i.result_id() == result_id)
    }

    pub fn selected(&self) -> Option<i64> {
        self.selected
    }

    pub fn select(&mut self, result_id: Option<i64>) {
        self.selected = result_id;
    }

    pub fn open_detail(&self) -> Option<i64> {
        self.open_detail
    }

    pub fn open(&mut self, result_id: Option<i64>) {
        self.open_detail = result_id;
    }

    /// Remember that the user submitted work in `container` and wants the
    /// result loaded as soon as `process_id` reports.
    pub fn wait_for(&mut self, container: Container, process_id: i64) {
        self.waiting_for.insert(container, process_id);
    }

    pub fn waiting_for(&self, container: Container) -> Option<i64> {
        self.waiting_for.get(&container).copied()
    }

    /// True while anything is still being produced.
    pub fn has_activity(&self) -> bool {
        self.containers.values().any(|s| {
            !s.placeholders.is_empty() || s.items.iter().any(|i| i.state.is_active())
        })
    }

    /// Merge a results batch.
    pub fn apply_results(&mut self, batch: &ResultsBatch) -> MergeReport {
        let mut report = MergeReport::default();

        for entry in &batch.entries {
            let common = entry.common();
            let container = Container::for_kind(entry.kind());
            let state = self.containers.entry(container).or_default();

            if common.process_id > 0 {
                self.resolved.insert(common.process_id);
                state.placeholders.retain(|p| p.process_id != common.process_id);
            }

            let existing = state.position(common.result_id);

            if !common.visible {
                if let Some(pos) = existing {
                    state.items.remove(pos);
                    report.changed += 1;
                }
                if self.selected == Some(common.result_id) {
                    self.selected = None;
                }
                if self.open_detail == Some(common.result_id) {
                    self.open_detail = None;
                }
                continue;
            }

            let next = ItemState::from_label(common.label);
            match existing {
                Some(pos) => {
                    let item = &mut state.items[pos];
                    if !item.state.can_become(next) {
                        report.rejected_transitions.push(common.result_id);
                    }
                    if item.entry != *entry {
                        report.changed += 1;
                    }
                    item.entry = entry.clone();
                    item.state = next;
                }
                None => {
                    state.items.insert(
                        0,
                        PanelItem {
                            entry: entry.clone(),
                            state: next,
                        },
                    );
                    report.changed += 1;
                }
            }

            if self.open_detail == Some(common.result_id) {
                report.reload_detail = true;
            }
            if common.process_id > 0 && self.waiting_for.get(&container) == Some(&common.process_id) {
                self.waiting_for.remove(&container);
                report.load_waiting.push(common.result_id);
            }
        }

        let advanced = self.cursor.advance(batch.cursor);
        report.ranking_refresh = advanced > self.cursor;
        self.cursor = advanced;
        report
    }

    /// Add placeholders for processes that have neither a placeholder nor a
    /// result yet. Returns how many were added.
    pub fn apply_processes(&mut self, batch: &ProcessesBatch) -> usize {
        let mut added = 0;
        // Batch is newest first; walk it oldest first so prepending keeps order.
        for process in batch.processes.iter().rev() {
            if !process.visible || self.resolved.contains(&process.process_id) {
                continue;
            }
            let state = self
                .containers
                .entry(Container::for_kind(process.kind))
                .or_default();
            let already = state.placeholders.iter().any(|p| p.process_id == process.process_id)
                || state.items.iter().any(|i| i.process_id() == process.process_id);
            if already {
                continue;
            }
            state.placeholders.insert(
                0,
                Placeholder {
                    process_id: process.process_id,
                    kind: process.kind,
                    repr: process.repr.clone(),
                    timestamp: process.timestamp,
                },
            );
            added += 1;
        }
        added
    }
}
