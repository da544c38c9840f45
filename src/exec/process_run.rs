// src/exec/process_run.rs

//! Launch policy for a single queue item.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::exec::{LaunchRequest, ProcessBackend, ProcessEventSender, RunHandle};

/// Informational line logged for a fire-and-forget launch.
pub const UNTRACKED_NOTICE: &str = "Command executed without tracking.";

/// Result of [`ProcessRun::start`].
#[derive(Debug, Clone)]
pub enum Launch {
    /// Empty file path: nothing was launched.
    Skipped,
    /// A tracked process is running.
    Tracked(Arc<RunHandle>),
    /// A fire-and-forget process was launched.
    Detached,
    /// The OS refused to create the process.
    Failed { line: String },
}

impl Launch {
    /// The log line this outcome produces, if any. Tracked runs log their
    /// own output instead.
    pub fn log_line(&self) -> Option<&str> {
        match self {
            Launch::Detached => Some(UNTRACKED_NOTICE),
            Launch::Failed { line } => Some(line),
            Launch::Skipped | Launch::Tracked(_) => None,
        }
    }
}

/// Launches processes for queue items through a [`ProcessBackend`].
///
/// Failures are converted into log lines here and never returned as errors;
/// whether an item failed is decided by the runner.
#[derive(Debug)]
pub struct ProcessRun<B> {
    backend: B,
}

impl<B: ProcessBackend> ProcessRun<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn start(&self, request: &LaunchRequest, events: &ProcessEventSender) -> Launch {
        let spec = &request.spec;

        if spec.is_noop() {
            debug!(item = request.item, name = %request.name, "empty file path; nothing to launch");
            return Launch::Skipped;
        }

        if !spec.track_process {
            return match self.backend.spawn_detached(request) {
                Ok(()) => {
                    info!(name = %request.name, path = %spec.file_path, "launched without tracking");
                    Launch::Detached
                }
                Err(e) => {
                    warn!(name = %request.name, path = %spec.file_path, error = %e, "untracked launch failed");
                    Launch::Failed {
                        line: format!(
                            "Error: could not launch '{}' without tracking: {e}",
                            spec.file_path
                        ),
                    }
                }
            };
        }

        match self.backend.spawn_tracked(request, events.clone()) {
            Ok(handle) => {
                info!(
                    run = handle.id(),
                    name = %request.name,
                    path = %spec.file_path,
                    args = %spec.arguments,
                    pid = ?handle.pid(),
                    "started tracked process"
                );
                Launch::Tracked(Arc::new(handle))
            }
            Err(e) => {
                warn!(name = %request.name, path = %spec.file_path, error = %e, "tracked launch failed");
                Launch::Failed {
                    line: format!("Error: {e}"),
                }
            }
        }
    }

    /// Force-terminate a tracked run. Returns false if it had already ended.
    pub fn kill(&self, handle: &RunHandle) -> bool {
        info!(run = handle.id(), name = %handle.display_name(), "kill requested");
        handle.kill()
    }
}
