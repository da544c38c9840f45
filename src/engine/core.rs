// src/engine/core.rs

//! Pure core state machine.
//!
//! `QueueCore` owns the queue, the process list and the set of live runs. It
//! consumes launch outcomes and [`ProcessEvent`]s and records the resulting
//! notifications in an outbox. It never awaits and never spawns; the async
//! driver in [`runner`](super::runner) calls into it under a lock and
//! publishes the outbox.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::engine::{
    AdvanceReason, CommandQueue, ItemId, ProcessList, RunnerEvent, RunnerOptions,
};
use crate::exec::{Launch, LaunchRequest, ProcessEvent, RunHandle, RunId};
use crate::types::{CommandSpec, ItemState};

#[derive(Debug)]
pub struct QueueCore {
    queue: CommandQueue,
    processes: ProcessList,
    /// Runs whose exit has not been observed yet. Independent of
    /// `processes`, which the user may prune at any time.
    live: HashMap<RunId, Arc<RunHandle>>,
    options: RunnerOptions,
    next_run_id: RunId,
    outbox: Vec<RunnerEvent>,
}

impl QueueCore {
    pub fn new(options: RunnerOptions) -> Self {
        Self {
            queue: CommandQueue::new(),
            processes: ProcessList::new(),
            live: HashMap::new(),
            options,
            next_run_id: 0,
            outbox: Vec::new(),
        }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn processes(&self) -> &ProcessList {
        &self.processes
    }

    /// Number of tracked runs still waiting for their exit.
    pub fn live_runs(&self) -> usize {
        self.live.len()
    }

    /// Look a run up among live runs first, then among listed ones.
    pub fn find_run(&self, run: RunId) -> Option<Arc<RunHandle>> {
        self.live
            .get(&run)
            .or_else(|| self.processes.get(run))
            .cloned()
    }

    pub fn live_handles(&self) -> Vec<Arc<RunHandle>> {
        self.live.values().cloned().collect()
    }

    pub fn take_notifications(&mut self) -> Vec<RunnerEvent> {
        mem::take(&mut self.outbox)
    }

    pub fn notify(&mut self, event: RunnerEvent) {
        self.outbox.push(event);
    }

    pub fn enqueue(&mut self, name: impl Into<String>, spec: CommandSpec) -> ItemId {
        let name = name.into();
        let item = self.queue.push(name.clone(), spec);
        self.notify(RunnerEvent::ItemQueued { item, name });
        item
    }

    pub fn remove_queued(&mut self, item: ItemId) -> bool {
        let removed = self.queue.remove_queued(item);
        if removed {
            self.notify(RunnerEvent::ItemRemoved { item });
        }
        removed
    }

    pub fn clear_queue(&mut self) -> usize {
        let removed = self.queue.clear();
        let count = removed.len();
        for item in removed {
            self.notify(RunnerEvent::ItemRemoved { item });
        }
        count
    }

    pub fn remove_process(&mut self, run: RunId) -> bool {
        self.processes.remove(run).is_some()
    }

    pub fn remove_ended_processes(&mut self) -> usize {
        self.processes.remove_ended()
    }

    /// Take the next queued item, mark it running and build its launch
    /// request.
    pub fn begin_next(&mut self) -> Option<LaunchRequest> {
        let item = self.queue.begin_next()?;
        self.next_run_id += 1;
        self.notify(RunnerEvent::ItemStateChanged {
            item: item.id,
            name: item.display_name.clone(),
            state: ItemState::Running,
        });
        Some(LaunchRequest {
            run_id: self.next_run_id,
            item: item.id,
            name: item.display_name,
            spec: item.spec,
        })
    }

    /// Register the outcome of a launch.
    pub fn record_launch(&mut self, request: &LaunchRequest, launch: &Launch) {
        if let Launch::Tracked(handle) = launch {
            self.live.insert(handle.id(), Arc::clone(handle));
            self.processes.register(Arc::clone(handle));
            self.notify(RunnerEvent::ProcessStarted(Arc::clone(handle)));
        }
        if let Some(line) = launch.log_line() {
            self.on_log_line(request.item, None, &request.name, line);
        }
    }

    /// The driver is moving past `item`: a still-running item is completed.
    pub fn settle(&mut self, item: ItemId, reason: AdvanceReason) {
        self.complete_item(item);
        self.notify(RunnerEvent::ItemAdvanced { item, reason });
    }

    pub fn apply(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Line { run, line } => {
                let Some(handle) = self.live.get(&run).cloned() else {
                    trace!(run, "line for a run that is no longer live; dropped");
                    return;
                };
                if !handle.append_line(&line) {
                    trace!(run, "line after the run ended; dropped");
                    return;
                }
                self.on_log_line(handle.item(), Some(run), handle.display_name(), &line);
            }
            ProcessEvent::Exited { run, exit } => {
                let Some(handle) = self.live.remove(&run) else {
                    debug!(run, "exit for unknown run ignored");
                    return;
                };
                handle.finish(exit);
                debug!(run, exit_code = ?exit.code, killed = exit.killed, "run finished");
                self.notify(RunnerEvent::ProcessCompleted(Arc::clone(&handle)));
                self.complete_item(handle.item());
            }
            ProcessEvent::KillFailed { run, message } => {
                if let Some(handle) = self.find_run(run) {
                    let line = format!("Failed to kill process: {message}");
                    handle.append_note(&line);
                    self.notify(RunnerEvent::LogReceived {
                        run: Some(run),
                        name: handle.display_name().to_string(),
                        line,
                    });
                }
            }
        }
    }

    /// Publish a log line and run the error heuristic on it.
    ///
    /// For tracked runs the caller has already appended `line` to the
    /// handle's log, so a subscriber reading `log_text()` on `LogReceived`
    /// sees it. Both happen under the same core lock, so no observer can
    /// see one without the other.
    fn on_log_line(&mut self, item: ItemId, run: Option<RunId>, name: &str, line: &str) {
        self.notify(RunnerEvent::LogReceived {
            run,
            name: name.to_string(),
            line: line.to_string(),
        });

        if self.options.error_matcher.is_error(line)
            && self.queue.state_of(item) == Some(ItemState::Running)
        {
            debug!(item, line, "error marker in log; failing item");
            self.set_state(item, ItemState::Error);
        }
    }

    fn complete_item(&mut self, item: ItemId) {
        if !self.set_state(item, ItemState::Completed) {
            return;
        }
        let remove = self
            .queue
            .get(item)
            .is_some_and(|i| i.spec.remove_from_queue_upon_completion);
        if remove && self.queue.remove(item).is_some() {
            self.notify(RunnerEvent::ItemRemoved { item });
        }
    }

    fn set_state(&mut self, item: ItemId, state: ItemState) -> bool {
        if !self.queue.transition(item, state) {
            return false;
        }
        let name = self
            .queue
            .get(item)
            .map(|i| i.display_name.clone())
            .unwrap_or_default();
        self.notify(RunnerEvent::ItemStateChanged { item, name, state });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RunExit;
    use tokio::sync::oneshot;

    fn tracked(
        core: &mut QueueCore,
        name: &str,
    ) -> (LaunchRequest, Arc<RunHandle>, oneshot::Receiver<()>) {
        core.enqueue(name, CommandSpec::new(name));
        let request = core.begin_next().expect("queued item");
        let (tx, rx) = oneshot::channel();
        let handle = Arc::new(RunHandle::new(
            request.run_id,
            request.item,
            request.name.clone(),
            request.spec.clone(),
            None,
            tx,
        ));
        core.record_launch(&request, &Launch::Tracked(Arc::clone(&handle)));
        (request, handle, rx)
    }

    fn line(run: RunId, text: &str) -> ProcessEvent {
        ProcessEvent::Line {
            run,
            line: text.to_string(),
        }
    }

    fn exited(run: RunId, code: i32) -> ProcessEvent {
        ProcessEvent::Exited {
            run,
            exit: RunExit {
                code: Some(code),
                killed: false,
            },
        }
    }

    #[test]
    fn error_line_fails_running_item_and_exit_keeps_it_failed() {
        let mut core = QueueCore::new(RunnerOptions::default());
        let (req, handle, _rx) = tracked(&mut core, "build");

        core.apply(line(req.run_id, "compiling"));
        core.apply(line(req.run_id, "Error: linker failed"));
        assert_eq!(core.queue().state_of(req.item), Some(ItemState::Error));

        core.apply(exited(req.run_id, 1));
        assert_eq!(core.queue().state_of(req.item), Some(ItemState::Error));
        assert_eq!(handle.log_text(), "compiling\nError: linker failed\n");
        assert_eq!(core.live_runs(), 0);
        assert_eq!(core.processes().len(), 1);
    }

    #[test]
    fn exit_completes_item() {
        let mut core = QueueCore::new(RunnerOptions::default());
        let (req, handle, _rx) = tracked(&mut core, "build");
        core.take_notifications();

        core.apply(exited(req.run_id, 0));

        assert_eq!(core.queue().state_of(req.item), Some(ItemState::Completed));
        assert!(handle.is_ended());
        let events = core.take_notifications();
        assert!(matches!(events[0], RunnerEvent::ProcessCompleted(_)));
        assert!(matches!(
            events[1],
            RunnerEvent::ItemStateChanged {
                state: ItemState::Completed,
                ..
            }
        ));
    }

    #[test]
    fn output_after_kill_is_not_appended() {
        let mut core = QueueCore::new(RunnerOptions::default());
        let (req, handle, mut rx) = tracked(&mut core, "server");

        core.apply(line(req.run_id, "listening"));
        assert!(handle.kill());
        assert!(rx.try_recv().is_ok());
        core.apply(line(req.run_id, "late output"));

        assert_eq!(handle.log_text(), "listening\n");
        assert_eq!(core.live_runs(), 1, "still live until the exit is observed");
        core.apply(ProcessEvent::Exited {
            run: req.run_id,
            exit: RunExit {
                code: None,
                killed: true,
            },
        });
        assert_eq!(core.queue().state_of(req.item), Some(ItemState::Completed));
        assert_eq!(handle.exit().map(|e| e.killed), Some(true));
    }

    #[test]
    fn error_after_settle_does_not_reopen_item() {
        let mut core = QueueCore::new(RunnerOptions::default());
        let (req, _handle, _rx) = tracked(&mut core, "daemon");

        core.settle(req.item, AdvanceReason::MarkerSeen);
        core.apply(line(req.run_id, "Error: connection reset"));

        assert_eq!(core.queue().state_of(req.item), Some(ItemState::Completed));
    }

    #[test]
    fn completion_removes_flagged_item() {
        let mut core = QueueCore::new(RunnerOptions::default());
        let spec = CommandSpec {
            remove_from_queue_upon_completion: true,
            ..CommandSpec::new("cleanup")
        };
        let item = core.enqueue("cleanup", spec);
        let request = core.begin_next().expect("queued item");
        core.record_launch(&request, &Launch::Skipped);
        core.settle(item, AdvanceReason::Immediate);

        assert!(core.queue().is_empty());
        assert!(
            core.take_notifications()
                .iter()
                .any(|e| matches!(e, RunnerEvent::ItemRemoved { item: i } if *i == item))
        );
    }

    #[test]
    fn failed_launch_line_goes_through_error_matcher() {
        let mut core = QueueCore::new(RunnerOptions::default());
        let item = core.enqueue("missing", CommandSpec::new("/no/such/tool"));
        let request = core.begin_next().expect("queued item");
        core.record_launch(
            &request,
            &Launch::Failed {
                line: "Error: No such file or directory".into(),
            },
        );
        core.settle(item, AdvanceReason::Immediate);
        assert_eq!(core.queue().state_of(item), Some(ItemState::Error));
    }

    #[test]
    fn log_notification_follows_append() {
        let mut core = QueueCore::new(RunnerOptions::default());
        let (req, handle, _rx) = tracked(&mut core, "server");
        core.take_notifications();

        core.apply(line(req.run_id, "listening"));

        let events = core.take_notifications();
        assert!(matches!(
            events.as_slice(),
            [RunnerEvent::LogReceived { line, .. }] if line == "listening"
        ));
        assert_eq!(handle.log_text(), "listening\n");
    }

    #[test]
    fn kill_failure_is_logged_on_ended_handle() {
        let mut core = QueueCore::new(RunnerOptions::default());
        let (req, handle, _rx) = tracked(&mut core, "stubborn");
        handle.kill();
        core.apply(ProcessEvent::KillFailed {
            run: req.run_id,
            message: "permission denied".into(),
        });
        assert!(handle.log_text().contains("Failed to kill process: permission denied"));
    }
}
