// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::{Result, RunnerError};
use crate::types::{CommandSpec, ErrorMatcher, DEFAULT_ERROR_MARKER};

/// Catalog as read from a TOML file, before validation.
///
/// ```toml
/// [runner]
/// error_marker = "Error"
/// queue = ["build", "server", "smoke"]
///
/// [command.build]
/// file_path = "cargo"
/// arguments = "build --release"
///
/// [command.server]
/// file_path = "./target/release/server"
/// log_marker = "listening on"
///
/// [command.smoke]
/// file_path = "scripts/smoke.sh"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub runner: RunnerSection,

    /// Keys are the command names used on the command line and in
    /// `[runner].queue`.
    #[serde(default)]
    pub command: BTreeMap<String, CommandConfig>,
}

/// A validated catalog. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub runner: RunnerSection,
    pub command: BTreeMap<String, CommandConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        runner: RunnerSection,
        command: BTreeMap<String, CommandConfig>,
    ) -> Self {
        Self { runner, command }
    }

    /// The `CommandSpec` for one catalog entry.
    pub fn spec(&self, name: &str) -> Result<CommandSpec> {
        self.command
            .get(name)
            .map(CommandConfig::to_spec)
            .ok_or_else(|| RunnerError::CommandNotFound(name.to_string()))
    }

    /// Resolve names to `(name, spec)` pairs, keeping order and duplicates.
    pub fn resolve_queue(&self, names: &[String]) -> Result<Vec<(String, CommandSpec)>> {
        names
            .iter()
            .map(|name| Ok((name.clone(), self.spec(name)?)))
            .collect()
    }

    /// The queue to run when no names are given on the command line.
    pub fn default_queue(&self) -> &[String] {
        &self.runner.queue
    }

    pub fn error_matcher(&self) -> Result<ErrorMatcher> {
        self.runner.error_matcher()
    }
}

/// `[runner]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSection {
    /// Substring that marks a log line as an error.
    #[serde(default = "default_error_marker")]
    pub error_marker: String,

    /// Regex that marks a log line as an error. Takes precedence over
    /// `error_marker`.
    #[serde(default)]
    pub error_pattern: Option<String>,

    /// Command names queued when none are given on the command line.
    #[serde(default)]
    pub queue: Vec<String>,

    /// Keep streaming output of still-running tracked processes after the
    /// queue is drained.
    #[serde(default = "default_follow")]
    pub follow: bool,
}

fn default_error_marker() -> String {
    DEFAULT_ERROR_MARKER.to_string()
}

fn default_follow() -> bool {
    true
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            error_marker: default_error_marker(),
            error_pattern: None,
            queue: Vec::new(),
            follow: default_follow(),
        }
    }
}

impl RunnerSection {
    pub fn error_matcher(&self) -> Result<ErrorMatcher> {
        match self.error_pattern.as_deref() {
            Some(pattern) => Ok(ErrorMatcher::Pattern(regex::Regex::new(pattern)?)),
            None if self.error_marker.is_empty() => Err(RunnerError::ConfigError(
                "[runner].error_marker must not be empty".to_string(),
            )),
            None => Ok(ErrorMatcher::Substring(self.error_marker.clone())),
        }
    }
}

/// `[command.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Executable or script. Empty means the entry launches nothing.
    #[serde(default)]
    pub file_path: String,

    #[serde(default)]
    pub arguments: String,

    #[serde(default)]
    pub tags: String,

    #[serde(default = "default_track_process")]
    pub track_process: bool,

    #[serde(default)]
    pub continue_upon_execution: bool,

    #[serde(default)]
    pub log_marker: Option<String>,

    #[serde(default)]
    pub remove_from_queue_upon_completion: bool,
}

fn default_track_process() -> bool {
    true
}

impl CommandConfig {
    pub fn to_spec(&self) -> CommandSpec {
        CommandSpec {
            file_path: self.file_path.clone(),
            arguments: self.arguments.clone(),
            tags: self.tags.clone(),
            track_process: self.track_process,
            continue_upon_execution: self.continue_upon_execution,
            log_marker: self.log_marker.clone(),
            remove_from_queue_upon_completion: self.remove_from_queue_upon_completion,
        }
    }
}
