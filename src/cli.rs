// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;

/// Command-line arguments for `cmdrunner`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cmdrunner",
    version,
    about = "Queue named commands and run them one after another.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the command catalog (TOML).
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Commands to queue, in order.
    ///
    /// If omitted, `[runner].queue` from the catalog is used.
    #[arg(value_name = "NAME")]
    pub names: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CMDRUNNER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the queue plan, but don't launch anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Exit once the queue is drained instead of streaming tracked
    /// processes that are still running.
    #[arg(long)]
    pub no_follow: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
