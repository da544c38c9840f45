// src/engine/queue.rs

use tracing::{debug, warn};

use super::ItemId;
use crate::types::{CommandSpec, ItemState};

/// One entry of the run queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: ItemId,
    pub display_name: String,
    pub spec: CommandSpec,
    pub state: ItemState,
}

/// Ordered list of queue items.
///
/// Semantics:
/// - Items run in insertion order; the driver always takes the first item
///   that is still `Queued`.
/// - States only move forward (see [`ItemState::can_transition_to`]);
///   invalid transitions are ignored and reported as `false`.
/// - Only `Queued` items can be removed by the user. Removing an item that
///   already started has no effect on the running sequence.
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: Vec<QueueItem>,
    next_id: ItemId,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn state_of(&self, id: ItemId) -> Option<ItemState> {
        self.get(id).map(|item| item.state)
    }

    /// Number of items currently in `state`.
    pub fn count(&self, state: ItemState) -> usize {
        self.items.iter().filter(|item| item.state == state).count()
    }

    /// Append a new `Queued` item and return its id.
    pub fn push(&mut self, display_name: impl Into<String>, spec: CommandSpec) -> ItemId {
        self.next_id += 1;
        let id = self.next_id;
        let display_name = display_name.into();
        debug!(item = id, name = %display_name, "item queued");
        self.items.push(QueueItem {
            id,
            display_name,
            spec,
            state: ItemState::Queued,
        });
        id
    }

    /// Remove an item that has not started yet.
    pub fn remove_queued(&mut self, id: ItemId) -> bool {
        match self.items.iter().position(|item| item.id == id) {
            Some(idx) if self.items[idx].state == ItemState::Queued => {
                self.items.remove(idx);
                debug!(item = id, "queued item removed");
                true
            }
            Some(_) => {
                debug!(item = id, "item already started; not removing");
                false
            }
            None => false,
        }
    }

    /// Remove an item regardless of its state.
    pub fn remove(&mut self, id: ItemId) -> Option<QueueItem> {
        let idx = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(idx))
    }

    /// Remove every item that is not `Running`; returns the removed ids.
    pub fn clear(&mut self) -> Vec<ItemId> {
        let mut removed = Vec::new();
        self.items.retain(|item| {
            let keep = item.state == ItemState::Running;
            if !keep {
                removed.push(item.id);
            }
            keep
        });
        removed
    }

    /// Take the first `Queued` item, mark it `Running` and return a copy.
    pub fn begin_next(&mut self) -> Option<QueueItem> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.state == ItemState::Queued)?;
        item.state = ItemState::Running;
        Some(item.clone())
    }

    /// Move an item to `next`. Returns true if the state changed.
    pub fn transition(&mut self, id: ItemId, next: ItemState) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };

        if item.state == next {
            return false;
        }

        if !item.state.can_transition_to(next) {
            if !item.state.is_terminal() {
                warn!(item = id, from = %item.state, to = %next, "rejected item state transition");
            }
            return false;
        }

        debug!(item = id, from = %item.state, to = %next, "item state changed");
        item.state = next;
        true
    }
}
