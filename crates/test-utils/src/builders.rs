#![allow(dead_code)]

use std::collections::BTreeMap;

use cmdrunner::config::{CommandConfig, ConfigFile, RawConfigFile, RunnerSection};
use cmdrunner::types::CommandSpec;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                runner: RunnerSection::default(),
                command: BTreeMap::new(),
            },
        }
    }

    pub fn with_command(mut self, name: &str, command: CommandConfig) -> Self {
        self.config.command.insert(name.to_string(), command);
        self
    }

    pub fn with_queue(mut self, names: &[&str]) -> Self {
        self.config.runner.queue = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_error_marker(mut self, marker: &str) -> Self {
        self.config.runner.error_marker = marker.to_string();
        self
    }

    pub fn with_error_pattern(mut self, pattern: &str) -> Self {
        self.config.runner.error_pattern = Some(pattern.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `CommandSpec`, also usable as a catalog entry.
pub struct CommandSpecBuilder {
    spec: CommandSpec,
}

impl CommandSpecBuilder {
    pub fn new(file_path: &str) -> Self {
        Self {
            spec: CommandSpec::new(file_path),
        }
    }

    pub fn arguments(mut self, arguments: &str) -> Self {
        self.spec.arguments = arguments.to_string();
        self
    }

    pub fn tags(mut self, tags: &str) -> Self {
        self.spec.tags = tags.to_string();
        self
    }

    pub fn untracked(mut self) -> Self {
        self.spec.track_process = false;
        self
    }

    pub fn continue_upon_execution(mut self) -> Self {
        self.spec.continue_upon_execution = true;
        self
    }

    pub fn log_marker(mut self, marker: &str) -> Self {
        self.spec.log_marker = Some(marker.to_string());
        self
    }

    pub fn remove_upon_completion(mut self) -> Self {
        self.spec.remove_from_queue_upon_completion = true;
        self
    }

    pub fn build(self) -> CommandSpec {
        self.spec
    }

    pub fn build_config(self) -> CommandConfig {
        let spec = self.spec;
        CommandConfig {
            file_path: spec.file_path,
            arguments: spec.arguments,
            tags: spec.tags,
            track_process: spec.track_process,
            continue_upon_execution: spec.continue_upon_execution,
            log_marker: spec.log_marker,
            remove_from_queue_upon_completion: spec.remove_from_queue_upon_completion,
        }
    }
}
