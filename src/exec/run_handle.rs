// src/exec/run_handle.rs

//! Observable state of one tracked process run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::engine::ItemId;
use crate::types::CommandSpec;

/// Identifier of a tracked run, unique per runner.
pub type RunId = u64;

/// How a tracked run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunExit {
    /// Exit code, if the OS reported one (not the case for signals).
    pub code: Option<i32>,
    /// The run was ended through [`RunHandle::kill`].
    pub killed: bool,
}

/// A tracked launch: its accumulated log, its end state and the switch that
/// terminates the underlying OS process.
///
/// Handles are shared as `Arc<RunHandle>` between the runner and observers.
/// Only the runner appends to the log, in the order output was produced.
pub struct RunHandle {
    id: RunId,
    item: ItemId,
    display_name: String,
    spec: CommandSpec,
    pid: Option<u32>,
    log: watch::Sender<String>,
    ended: AtomicBool,
    exit: watch::Sender<Option<RunExit>>,
    kill_switch: Mutex<Option<oneshot::Sender<()>>>,
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.id)
            .field("item", &self.item)
            .field("display_name", &self.display_name)
            .field("pid", &self.pid)
            .field("ended", &self.is_ended())
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    /// Create a handle for a freshly spawned process.
    ///
    /// The process supervisor keeps the receiving end of `kill_switch` and
    /// terminates the process when it fires.
    pub fn new(
        id: RunId,
        item: ItemId,
        display_name: impl Into<String>,
        spec: CommandSpec,
        pid: Option<u32>,
        kill_switch: oneshot::Sender<()>,
    ) -> Self {
        let (log, _) = watch::channel(String::new());
        let (exit, _) = watch::channel(None);
        Self {
            id,
            item,
            display_name: display_name.into(),
            spec,
            pid,
            log,
            ended: AtomicBool::new(false),
            exit,
            kill_switch: Mutex::new(Some(kill_switch)),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    /// The queue item this run was launched for.
    pub fn item(&self) -> ItemId {
        self.item
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Snapshot of everything logged so far.
    pub fn log_text(&self) -> String {
        self.log.borrow().clone()
    }

    /// Receiver notified on every append to the log.
    pub fn subscribe_log(&self) -> watch::Receiver<String> {
        self.log.subscribe()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Exit information, once the process exit has been observed.
    pub fn exit(&self) -> Option<RunExit> {
        *self.exit.borrow()
    }

    /// Resolve once the process exit has been observed by the runner.
    pub async fn wait_exited(&self) {
        let mut rx = self.exit.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Resolve once the accumulated log contains `marker`.
    pub async fn wait_for_log(&self, marker: &str) {
        let mut rx = self.log.subscribe();
        let _ = rx.wait_for(|log| log.contains(marker)).await;
    }

    /// Ask the supervisor to terminate the process and mark the run ended.
    ///
    /// Returns false if the run had already ended.
    pub fn kill(&self) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }

        match self.kill_switch.lock().take() {
            Some(switch) => {
                if switch.send(()).is_err() {
                    self.append_note("Failed to kill process: it has already exited");
                }
            }
            None => debug!(run = self.id, "kill switch already released"),
        }
        true
    }

    /// Empty the log. Subscribers are notified.
    pub fn clear_log(&self) {
        self.log.send_modify(String::clear);
    }

    /// Append one line of process output. Returns false, and drops the line,
    /// once the run has ended.
    pub(crate) fn append_line(&self, line: &str) -> bool {
        if self.is_ended() {
            return false;
        }
        self.push(line);
        true
    }

    /// Append a diagnostic line regardless of the end state. Used only for
    /// kill failures, which by nature arrive after the run was ended.
    pub(crate) fn append_note(&self, line: &str) {
        self.push(line);
    }

    /// Record the observed process exit. Releases the kill switch.
    pub(crate) fn finish(&self, exit: RunExit) {
        self.ended.store(true, Ordering::SeqCst);
        self.kill_switch.lock().take();
        self.exit.send_replace(Some(exit));
    }

    fn push(&self, line: &str) {
        self.log.send_modify(|log| {
            log.push_str(line);
            log.push('\n');
        });
    }
}
