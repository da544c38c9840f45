// src/engine/mod.rs

//! Sequential queue engine.
//!
//! This module ties together:
//! - the command queue and its per-item state machine ([`queue`])
//! - the list of observable tracked processes ([`process_list`])
//! - the pure core that applies process events and launch outcomes to that
//!   state ([`core`])
//! - the async driver that walks the queue one item at a time and waits on
//!   each item's advance policy ([`runner`])

use std::sync::Arc;

use crate::exec::{RunHandle, RunId};
use crate::types::{ErrorMatcher, ItemState};

/// Identifier of a queue item, unique per runner.
pub type ItemId = u64;

/// Options shared by the core and the driver.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Decides which log lines put their item into `Error`.
    pub error_matcher: ErrorMatcher,
}

/// Why the driver moved past an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    /// Nothing to wait for: continue-upon-execution, untracked, no-op path
    /// or failed launch.
    Immediate,
    /// The log marker showed up before the process exited.
    MarkerSeen,
    /// The process exit was observed.
    Exited,
}

/// Counts for one drain of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub completed: usize,
    pub errored: usize,
}

impl QueueSummary {
    pub fn total(&self) -> usize {
        self.completed + self.errored
    }
}

/// Notifications published to observers.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    ItemQueued {
        item: ItemId,
        name: String,
    },
    ItemRemoved {
        item: ItemId,
    },
    ItemStateChanged {
        item: ItemId,
        name: String,
        state: ItemState,
    },
    /// A tracked process was launched and registered in the process list.
    ProcessStarted(Arc<RunHandle>),
    /// One log line. `run` is `None` for lines that belong to no tracked
    /// run (fire-and-forget notice, launch failures).
    LogReceived {
        run: Option<RunId>,
        name: String,
        line: String,
    },
    /// A tracked process exit was observed.
    ProcessCompleted(Arc<RunHandle>),
    /// The driver moved past an item and will start the next one.
    ItemAdvanced {
        item: ItemId,
        reason: AdvanceReason,
    },
    /// The driver found no more queued items.
    QueueFinished(QueueSummary),
}

pub mod core;
pub mod process_list;
pub mod queue;
pub mod runner;

pub use self::core::QueueCore;
pub use process_list::ProcessList;
pub use queue::{CommandQueue, QueueItem};
pub use runner::QueueRunner;
