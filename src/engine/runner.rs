// src/engine/runner.rs

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{
    AdvanceReason, ItemId, QueueCore, QueueItem, QueueSummary, RunnerEvent, RunnerOptions,
};
use crate::errors::{Result, RunnerError};
use crate::exec::{
    Launch, LaunchRequest, ProcessBackend, ProcessEvent, ProcessEventReceiver,
    ProcessEventSender, ProcessRun, RunHandle, RunId, TokioBackend,
};
use crate::types::{AdvancePolicy, CommandSpec, ItemState};

/// Drives the command queue one item at a time and delegates process
/// creation to a [`ProcessBackend`].
///
/// This is the async shell around [`QueueCore`], which holds all state.
/// Every mutation happens under a short synchronous lock; the resulting
/// notifications are published to subscribers in the order they occurred.
///
/// Process events are consumed by whichever of [`run_queue`](Self::run_queue),
/// [`follow`](Self::follow) or [`pump`](Self::pump) currently holds the
/// event receiver. The other operations are safe to call from any task.
pub struct QueueRunner<B: ProcessBackend = TokioBackend> {
    core: Mutex<QueueCore>,
    process_run: ProcessRun<B>,
    events_tx: ProcessEventSender,
    events_rx: tokio::sync::Mutex<ProcessEventReceiver>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RunnerEvent>>>,
}

impl<B: ProcessBackend> fmt::Debug for QueueRunner<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRunner")
            .field("core", &*self.core.lock())
            .finish_non_exhaustive()
    }
}

impl QueueRunner<TokioBackend> {
    pub fn new(options: RunnerOptions) -> Self {
        Self::with_backend(TokioBackend, options)
    }
}

impl<B: ProcessBackend> QueueRunner<B> {
    pub fn with_backend(backend: B, options: RunnerOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            core: Mutex::new(QueueCore::new(options)),
            process_run: ProcessRun::new(backend),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn backend(&self) -> &B {
        self.process_run.backend()
    }

    /// Receive every notification published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RunnerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Append a copy of `spec` to the queue.
    pub fn enqueue(&self, name: impl Into<String>, spec: &CommandSpec) -> ItemId {
        let name = name.into();
        let item = self.with_core(|core| core.enqueue(name.clone(), spec.clone()));
        debug!(item, name = %name, "item queued");
        item
    }

    /// Remove an item that has not started yet. Items already picked up by
    /// the driver are left alone.
    pub fn remove_queued(&self, item: ItemId) -> bool {
        self.with_core(|core| core.remove_queued(item))
    }

    /// Remove every item that has not started yet.
    pub fn clear_queue(&self) -> usize {
        self.with_core(QueueCore::clear_queue)
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.core.lock().queue().items().to_vec()
    }

    pub fn item_state(&self, item: ItemId) -> Option<ItemState> {
        self.core.lock().queue().state_of(item)
    }

    pub fn processes(&self) -> Vec<Arc<RunHandle>> {
        self.core.lock().processes().handles().to_vec()
    }

    /// The most recently started tracked process still in the list.
    pub fn focused(&self) -> Option<Arc<RunHandle>> {
        self.core.lock().processes().focused().cloned()
    }

    pub fn process(&self, run: RunId) -> Option<Arc<RunHandle>> {
        self.core.lock().find_run(run)
    }

    /// Drop a run from the observable list. A live process keeps running.
    pub fn remove_process(&self, run: RunId) -> bool {
        self.with_core(|core| core.remove_process(run))
    }

    pub fn remove_ended_processes(&self) -> usize {
        self.with_core(QueueCore::remove_ended_processes)
    }

    pub fn clear_log(&self, run: RunId) -> bool {
        match self.process(run) {
            Some(handle) => {
                handle.clear_log();
                true
            }
            None => false,
        }
    }

    /// Number of tracked runs whose exit has not been observed yet.
    pub fn live_runs(&self) -> usize {
        self.core.lock().live_runs()
    }

    pub fn kill(&self, run: RunId) -> bool {
        match self.process(run) {
            Some(handle) => self.process_run.kill(&handle),
            None => false,
        }
    }

    /// Kill every live tracked run. Returns how many were still running.
    pub fn kill_all(&self) -> usize {
        let live = self.core.lock().live_handles();
        live.iter()
            .filter(|handle| self.process_run.kill(handle))
            .count()
    }

    /// Apply whatever process events are already pending, without waiting.
    ///
    /// Returns 0 when another task is currently consuming events.
    pub fn pump(&self) -> usize {
        let Ok(mut events) = self.events_rx.try_lock() else {
            return 0;
        };
        self.drain_ready(&mut events)
    }

    /// Run queued items in FIFO order until none are left.
    ///
    /// Each item is started, then awaited according to its
    /// [`AdvancePolicy`]. Items enqueued while draining are picked up.
    pub async fn run_queue(&self) -> Result<QueueSummary> {
        let mut events = self
            .events_rx
            .try_lock()
            .map_err(|_| RunnerError::AlreadyDraining)?;

        info!("draining command queue");
        let mut summary = QueueSummary::default();

        while let Some(request) = self.with_core(QueueCore::begin_next) {
            let reason = self.run_item(&request, &mut events).await;

            match self.item_state(request.item) {
                Some(ItemState::Error) => summary.errored += 1,
                // Items removed upon completion are gone by now.
                _ => summary.completed += 1,
            }
            debug!(item = request.item, name = %request.name, ?reason, "advancing queue");
        }

        info!(
            completed = summary.completed,
            errored = summary.errored,
            "command queue drained"
        );
        self.with_core(|core| core.notify(RunnerEvent::QueueFinished(summary)));
        Ok(summary)
    }

    /// Keep applying process events until every tracked run has exited.
    pub async fn follow(&self) -> Result<()> {
        let mut events = self
            .events_rx
            .try_lock()
            .map_err(|_| RunnerError::AlreadyDraining)?;

        self.drain_ready(&mut events);
        while self.live_runs() > 0 {
            match events.recv().await {
                Some(event) => self.apply_batch(event, &mut events),
                None => break,
            }
        }
        debug!("no live tracked runs left");
        Ok(())
    }

    async fn run_item(
        &self,
        request: &LaunchRequest,
        events: &mut ProcessEventReceiver,
    ) -> AdvanceReason {
        info!(item = request.item, name = %request.name, "running queue item");

        let launch = self.process_run.start(request, &self.events_tx);
        self.with_core(|core| core.record_launch(request, &launch));

        let reason = match (&launch, request.spec.advance_policy()) {
            (Launch::Tracked(handle), AdvancePolicy::OnExit) => {
                self.wait_advance(handle, None, events).await
            }
            (Launch::Tracked(handle), AdvancePolicy::OnMarker(marker)) => {
                self.wait_advance(handle, Some(marker.as_str()), events).await
            }
            _ => AdvanceReason::Immediate,
        };

        self.drain_ready(events);
        self.with_core(|core| core.settle(request.item, reason));
        reason
    }

    /// Apply process events until the run exits or its marker shows up.
    ///
    /// Events are applied in batches: everything already pending is applied
    /// before either condition is evaluated, and the exit is checked first.
    /// A run whose marker and exit arrive together therefore advances on
    /// exit.
    async fn wait_advance(
        &self,
        handle: &RunHandle,
        marker: Option<&str>,
        events: &mut ProcessEventReceiver,
    ) -> AdvanceReason {
        loop {
            tokio::select! {
                biased;

                () = handle.wait_exited() => return AdvanceReason::Exited,
                () = marker_seen(handle, marker) => return AdvanceReason::MarkerSeen,
                event = events.recv() => match event {
                    Some(event) => self.apply_batch(event, events),
                    None => {
                        warn!(run = handle.id(), "process event channel closed while waiting");
                        return AdvanceReason::Exited;
                    }
                },
            }
        }
    }

    /// Apply `first` and everything queued behind it in one step.
    fn apply_batch(&self, first: ProcessEvent, events: &mut ProcessEventReceiver) {
        self.with_core(|core| {
            core.apply(first);
            while let Ok(event) = events.try_recv() {
                core.apply(event);
            }
        });
    }

    fn drain_ready(&self, events: &mut ProcessEventReceiver) -> usize {
        self.with_core(|core| {
            let mut applied = 0;
            while let Ok(event) = events.try_recv() {
                core.apply(event);
                applied += 1;
            }
            applied
        })
    }

    /// Run `f` against the core and publish the notifications it produced.
    ///
    /// Publishing happens under the core lock so observers see
    /// notifications in mutation order.
    fn with_core<T>(&self, f: impl FnOnce(&mut QueueCore) -> T) -> T {
        let mut core = self.core.lock();
        let out = f(&mut core);
        let notifications = core.take_notifications();
        if !notifications.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for event in notifications {
                subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
        out
    }
}

/// Resolves when `marker` is in the run's log. Never resolves without a
/// marker or once the run has ended.
async fn marker_seen(handle: &RunHandle, marker: Option<&str>) {
    match marker {
        Some(marker) if !handle.is_ended() => handle.wait_for_log(marker).await,
        _ => std::future::pending().await,
    }
}
