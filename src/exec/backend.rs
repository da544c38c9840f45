// src/exec/backend.rs

//! Pluggable process backend abstraction.
//!
//! [`ProcessRun`](super::ProcessRun) decides *whether* and *how* a command is
//! launched; the backend does the spawning. `TokioBackend` is used in
//! production. Tests can provide a backend that plays back scripted output
//! without touching the OS.

use std::io;

use crate::engine::ItemId;
use crate::exec::{ProcessEventSender, RunHandle, RunId};
use crate::types::CommandSpec;

/// Everything a backend needs to launch one queue item.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub run_id: RunId,
    pub item: ItemId,
    pub name: String,
    pub spec: CommandSpec,
}

/// Trait abstracting how processes are spawned.
pub trait ProcessBackend: Send + Sync {
    /// Spawn a process with captured output.
    ///
    /// The implementation must deliver every output line as
    /// `ProcessEvent::Line` and finish with exactly one
    /// `ProcessEvent::Exited`, also when the handle's kill switch fires.
    fn spawn_tracked(
        &self,
        request: &LaunchRequest,
        events: ProcessEventSender,
    ) -> io::Result<RunHandle>;

    /// Launch a process without capturing or waiting on it.
    fn spawn_detached(&self, request: &LaunchRequest) -> io::Result<()>;
}
