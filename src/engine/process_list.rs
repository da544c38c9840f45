// src/engine/process_list.rs

use std::sync::Arc;

use crate::exec::{RunHandle, RunId};

/// Tracked runs visible to observers, in launch order, plus the run that
/// currently has focus.
///
/// A handle stays listed after its process ends until the caller removes it.
#[derive(Debug, Default)]
pub struct ProcessList {
    handles: Vec<Arc<RunHandle>>,
    focused: Option<RunId>,
}

impl ProcessList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly started run and give it focus.
    pub fn register(&mut self, handle: Arc<RunHandle>) {
        self.focused = Some(handle.id());
        self.handles.push(handle);
    }

    pub fn get(&self, run: RunId) -> Option<&Arc<RunHandle>> {
        self.handles.iter().find(|h| h.id() == run)
    }

    pub fn handles(&self) -> &[Arc<RunHandle>] {
        &self.handles
    }

    pub fn focused(&self) -> Option<&Arc<RunHandle>> {
        self.focused.and_then(|run| self.get(run))
    }

    /// Stop observing a run. The process itself is left alone.
    pub fn remove(&mut self, run: RunId) -> Option<Arc<RunHandle>> {
        let idx = self.handles.iter().position(|h| h.id() == run)?;
        if self.focused == Some(run) {
            self.focused = None;
        }
        Some(self.handles.remove(idx))
    }

    /// Drop every run whose process has ended.
    pub fn remove_ended(&mut self) -> usize {
        let before = self.handles.len();
        self.handles.retain(|h| !h.is_ended());
        if let Some(run) = self.focused {
            if self.get(run).is_none() {
                self.focused = None;
            }
        }
        before - self.handles.len()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
