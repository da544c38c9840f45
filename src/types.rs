use std::fmt;
use std::path::Path;

use regex::Regex;

/// Descriptor of one external command.
///
/// A queued item holds its own copy, so editing the catalog entry after
/// queueing does not change what runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable or script to launch. Empty means "nothing to run".
    pub file_path: String,
    /// Argument string, passed through without interpretation by the runner.
    pub arguments: String,
    /// Free-form metadata; the runner never looks at it.
    pub tags: String,
    /// Capture output and observe the process lifecycle.
    pub track_process: bool,
    /// Advance the queue as soon as the process is launched.
    pub continue_upon_execution: bool,
    /// Advance the queue once this text shows up in the run's log.
    pub log_marker: Option<String>,
    /// Drop the item from the queue list once it is `Completed`.
    pub remove_from_queue_upon_completion: bool,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            file_path: String::new(),
            arguments: String::new(),
            tags: String::new(),
            track_process: true,
            continue_upon_execution: false,
            log_marker: None,
            remove_from_queue_upon_completion: false,
        }
    }
}

impl CommandSpec {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// True when launching this spec does nothing at all.
    pub fn is_noop(&self) -> bool {
        self.file_path.trim().is_empty()
    }

    /// The marker, if one is set and non-empty.
    pub fn effective_log_marker(&self) -> Option<&str> {
        self.log_marker.as_deref().filter(|m| !m.is_empty())
    }

    /// Decide how the queue waits on a run of this spec.
    ///
    /// `continue_upon_execution` overrides everything; an untracked process
    /// has no log, so its marker is ignored.
    pub fn advance_policy(&self) -> AdvancePolicy {
        if self.continue_upon_execution || !self.track_process {
            return AdvancePolicy::Immediate;
        }
        match self.effective_log_marker() {
            Some(marker) => AdvancePolicy::OnMarker(marker.to_string()),
            None => AdvancePolicy::OnExit,
        }
    }

    /// Directory the process is started in: the directory part of
    /// `file_path`, if it has one.
    pub fn working_dir(&self) -> Option<&Path> {
        Path::new(&self.file_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// When the queue moves on from an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvancePolicy {
    /// Right after the launch attempt.
    Immediate,
    /// When the marker appears in the log or the process exits.
    OnMarker(String),
    /// When the process exits.
    OnExit,
}

/// State of a queue item.
///
/// Transitions only move forward: `Queued -> Running -> Completed | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    Queued,
    Running,
    Completed,
    Error,
}

impl ItemState {
    pub fn can_transition_to(self, next: ItemState) -> bool {
        matches!(
            (self, next),
            (ItemState::Queued, ItemState::Running)
                | (ItemState::Running, ItemState::Completed)
                | (ItemState::Running, ItemState::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Error)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Queued => "queued",
            ItemState::Running => "running",
            ItemState::Completed => "completed",
            ItemState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Predicate deciding whether a log line marks its item as failed.
///
/// The default matches any line containing `Error`. This is a crude signal:
/// a process that merely prints the word fails its item.
#[derive(Debug, Clone)]
pub enum ErrorMatcher {
    Substring(String),
    Pattern(Regex),
    Disabled,
}

impl Default for ErrorMatcher {
    fn default() -> Self {
        ErrorMatcher::Substring(DEFAULT_ERROR_MARKER.to_string())
    }
}

pub const DEFAULT_ERROR_MARKER: &str = "Error";

impl ErrorMatcher {
    pub fn is_error(&self, line: &str) -> bool {
        match self {
            ErrorMatcher::Substring(s) => line.contains(s.as_str()),
            ErrorMatcher::Pattern(re) => re.is_match(line),
            ErrorMatcher::Disabled => false,
        }
    }
}
