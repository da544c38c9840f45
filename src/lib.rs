// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{QueueRunner, RunnerEvent, RunnerOptions};
use crate::types::{AdvancePolicy, CommandSpec};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - catalog loading
/// - the queue runner and its process backend
/// - a printer for command output
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let names = if args.names.is_empty() {
        cfg.default_queue().to_vec()
    } else {
        args.names.clone()
    };
    let plan = cfg.resolve_queue(&names)?;

    if args.dry_run {
        print_dry_run(&cfg, &plan);
        return Ok(());
    }

    if plan.is_empty() {
        warn!("nothing to run: no names given and [runner].queue is empty");
        return Ok(());
    }

    let options = RunnerOptions {
        error_matcher: cfg.error_matcher()?,
    };
    let runner = Arc::new(QueueRunner::new(options));
    let printer = spawn_printer(runner.subscribe());

    // Ctrl-C: drop what has not started yet and kill tracked processes.
    {
        let runner = Arc::downgrade(&runner);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            if let Some(runner) = runner.upgrade() {
                let dropped = runner.clear_queue();
                let killed = runner.kill_all();
                warn!(dropped, killed, "interrupted; queue cleared and tracked processes killed");
            }
        });
    }

    for (name, spec) in &plan {
        runner.enqueue(name.as_str(), spec);
    }

    let summary = runner.run_queue().await?;

    let follow = cfg.runner.follow && !args.no_follow;
    let live = runner.live_runs();
    if follow && live > 0 {
        info!(live, "queue drained; following tracked processes until they exit");
        runner.follow().await?;
    } else if live > 0 {
        info!(live, "queue drained; not following, killing tracked processes");
        runner.kill_all();
        runner.follow().await?;
    }

    // Closing the runner closes the subscription, which ends the printer.
    drop(runner);
    if let Err(e) = printer.await {
        debug!(error = %e, "printer task ended abnormally");
    }

    if summary.errored > 0 {
        anyhow::bail!(
            "{} of {} queued commands ended in error",
            summary.errored,
            summary.total()
        );
    }
    Ok(())
}

/// Print command output as `[name] line` on stdout and report progress
/// through tracing.
fn spawn_printer(mut events: mpsc::UnboundedReceiver<RunnerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RunnerEvent::LogReceived { name, line, .. } => println!("[{name}] {line}"),
                RunnerEvent::ItemStateChanged { item, name, state } => {
                    info!(item, name = %name, %state, "queue item state changed");
                }
                RunnerEvent::ProcessCompleted(handle) => {
                    let exit = handle.exit();
                    info!(
                        run = handle.id(),
                        name = %handle.display_name(),
                        exit_code = ?exit.and_then(|e| e.code),
                        killed = exit.is_some_and(|e| e.killed),
                        "process completed"
                    );
                }
                other => debug!(event = ?other, "runner event"),
            }
        }
    })
}

/// Simple dry-run output: print the queue plan without launching anything.
fn print_dry_run(cfg: &ConfigFile, plan: &[(String, CommandSpec)]) {
    println!("cmdrunner dry-run");
    match &cfg.runner.error_pattern {
        Some(pattern) => println!("  runner.error_pattern = {pattern:?}"),
        None => println!("  runner.error_marker = {:?}", cfg.runner.error_marker),
    }
    println!("  runner.follow = {}", cfg.runner.follow);
    println!();

    println!("queue ({}):", plan.len());
    for (idx, (name, spec)) in plan.iter().enumerate() {
        println!("  {}. {name}", idx + 1);
        if spec.is_noop() {
            println!("      file_path: (empty, nothing is launched)");
        } else {
            println!("      file_path: {}", spec.file_path);
        }
        if !spec.arguments.is_empty() {
            println!("      arguments: {}", spec.arguments);
        }
        if !spec.tags.is_empty() {
            println!("      tags: {}", spec.tags);
        }
        if !spec.track_process {
            println!("      track_process: false");
        }
        let advance = match spec.advance_policy() {
            AdvancePolicy::Immediate => "right after launch".to_string(),
            AdvancePolicy::OnMarker(marker) => format!("when {marker:?} is logged or on exit"),
            AdvancePolicy::OnExit => "on exit".to_string(),
        };
        println!("      advance: {advance}");
        if spec.remove_from_queue_upon_completion {
            println!("      remove_from_queue_upon_completion: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
