// src/exec/mod.rs

//! Process execution layer.
//!
//! This module launches the external processes behind queue items, using
//! `tokio::process::Command`, and reports back to the queue runner via
//! [`ProcessEvent`]s.
//!
//! - [`process_run`] holds the launch policy: no-op paths, tracked vs.
//!   fire-and-forget, the log lines emitted for each outcome, kill.
//! - [`backend`] provides the `ProcessBackend` trait that performs the actual
//!   spawning; tests swap in a scripted implementation.
//! - [`tokio_backend`] is the production backend: spawning, line streaming
//!   and the exit supervisor.
//! - [`run_handle`] is the shared, observable state of one tracked run.

use tokio::sync::mpsc;

pub mod backend;
pub mod process_run;
pub mod run_handle;
pub mod tokio_backend;

pub use backend::{LaunchRequest, ProcessBackend};
pub use process_run::{Launch, ProcessRun, UNTRACKED_NOTICE};
pub use run_handle::{RunExit, RunHandle, RunId};
pub use tokio_backend::TokioBackend;

/// Messages from process supervisors to the queue runner.
///
/// Supervisors never touch runner state; the runner applies these in
/// arrival order on its own loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of stdout or stderr.
    Line { run: RunId, line: String },
    /// The process exited and both output streams are drained.
    Exited { run: RunId, exit: RunExit },
    /// Terminating the process failed.
    KillFailed { run: RunId, message: String },
}

pub type ProcessEventSender = mpsc::UnboundedSender<ProcessEvent>;
pub type ProcessEventReceiver = mpsc::UnboundedReceiver<ProcessEvent>;
