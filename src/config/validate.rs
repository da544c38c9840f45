// src/config/validate.rs

use tracing::warn;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RunnerError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunnerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.runner, raw.command))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_commands(cfg)?;
    validate_queue_references(cfg)?;
    validate_error_predicate(cfg)?;
    warn_ignored_settings(cfg);
    Ok(())
}

fn ensure_has_commands(cfg: &RawConfigFile) -> Result<()> {
    if cfg.command.is_empty() {
        return Err(RunnerError::ConfigError(
            "config must contain at least one [command.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_queue_references(cfg: &RawConfigFile) -> Result<()> {
    for name in &cfg.runner.queue {
        if !cfg.command.contains_key(name) {
            return Err(RunnerError::ConfigError(format!(
                "[runner].queue references unknown command '{name}'"
            )));
        }
    }
    Ok(())
}

fn validate_error_predicate(cfg: &RawConfigFile) -> Result<()> {
    cfg.runner.error_matcher().map(|_| ())
}

/// Combinations that are accepted but have no effect.
fn warn_ignored_settings(cfg: &RawConfigFile) {
    for (name, command) in &cfg.command {
        let has_marker = command.log_marker.as_deref().is_some_and(|m| !m.is_empty());

        if has_marker && !command.track_process {
            warn!(command = %name, "log_marker is ignored for untracked commands");
        } else if has_marker && command.continue_upon_execution {
            warn!(command = %name, "log_marker is ignored with continue_upon_execution");
        }

        if command.file_path.trim().is_empty() {
            warn!(command = %name, "empty file_path; this command launches nothing");
        }
    }
}
