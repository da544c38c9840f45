// src/exec/tokio_backend.rs

//! Production process backend built on `tokio::process`.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::exec::{
    LaunchRequest, ProcessBackend, ProcessEvent, ProcessEventSender, RunExit, RunHandle, RunId,
};
use crate::types::CommandSpec;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How long trailing output may keep arriving after the process exited.
/// Descendants that inherited the pipes can hold them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Spawns real OS processes.
///
/// Tracked processes get piped stdout/stderr and a supervisor task that
/// streams their output and reports the exit. On Unix each tracked process
/// leads its own process group, and a kill takes down the whole group.
/// Must be used from within a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioBackend;

impl ProcessBackend for TokioBackend {
    fn spawn_tracked(
        &self,
        request: &LaunchRequest,
        events: ProcessEventSender,
    ) -> io::Result<RunHandle> {
        let mut cmd = build_command(&request.spec)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn()?;
        let (kill_tx, kill_rx) = oneshot::channel();

        let handle = RunHandle::new(
            request.run_id,
            request.item,
            request.name.clone(),
            request.spec.clone(),
            child.id(),
            kill_tx,
        );

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, request.run_id, events.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, request.run_id, events.clone(), "stderr"));
        }

        tokio::spawn(supervise(child, readers, request.run_id, kill_rx, events));

        Ok(handle)
    }

    fn spawn_detached(&self, request: &LaunchRequest) -> io::Result<()> {
        let mut cmd = detached_command(&request.spec)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Not waited on; Tokio reaps the orphaned child in the background.
        let child = cmd.spawn()?;
        debug!(pid = ?child.id(), name = %request.name, "detached process spawned");
        Ok(())
    }
}

/// Wait for the process to exit (or for a kill request), give the output
/// streams a short grace period to drain, and report the exit.
///
/// The exit is reported once the process itself has been reaped, even if a
/// descendant still holds the output pipes open.
async fn supervise(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    run: RunId,
    mut kill_rx: oneshot::Receiver<()>,
    events: ProcessEventSender,
) {
    let mut killed = false;

    // A dropped kill switch disables the second branch; the process then
    // simply runs to completion.
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            killed = true;
            info!(run, "terminating process on request");
            if let Err(e) = terminate(&mut child).await {
                warn!(run, error = %e, "failed to kill process");
                let _ = events.send(ProcessEvent::KillFailed {
                    run,
                    message: e.to_string(),
                });
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(run, error = %e, "waiting for process failed");
            None
        }
    };

    drain_readers(readers, run).await;

    info!(run, exit_code = ?code, killed, "tracked process exited");
    let _ = events.send(ProcessEvent::Exited {
        run,
        exit: RunExit { code, killed },
    });
}

/// Join the line readers, aborting any still blocked once the grace period
/// is over. Output produced after that is not captured.
async fn drain_readers(readers: Vec<JoinHandle<()>>, run: RunId) {
    let deadline = Instant::now() + OUTPUT_DRAIN_GRACE;
    for mut reader in readers {
        match time::timeout_at(deadline, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(run, error = %e, "output reader task ended abnormally"),
            Err(_) => {
                debug!(run, "output still held open after exit; detaching reader");
                reader.abort();
            }
        }
    }
}

/// Kill the process group led by `child`, falling back to the child alone.
#[cfg(unix)]
async fn terminate(child: &mut Child) -> io::Result<()> {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery; `pid` leads the group created by
        // `process_group(0)` and has not been reaped yet.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        debug!(pid, error = %io::Error::last_os_error(), "killpg failed; killing child only");
    }
    child.kill().await
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> io::Result<()> {
    child.kill().await
}

fn spawn_line_reader<R>(
    stream: R,
    run: RunId,
    events: ProcessEventSender,
    source: &'static str,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buf);
                    trace!(run, source, "{}", line);
                    if events.send(ProcessEvent::Line { run, line }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(run, source, error = %e, "output stream read failed");
                    break;
                }
            }
        }

        debug!(run, source, "output stream ended");
    })
}

/// Lossy UTF-8 decode without the line terminator.
fn decode_line(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

fn build_command(spec: &CommandSpec) -> io::Result<Command> {
    let (program, dir) = resolve_program(spec)?;
    let mut cmd = Command::new(program);
    add_arguments(&mut cmd, &spec.arguments)?;
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    Ok(cmd)
}

/// A path with a directory part is made absolute, because the child starts
/// in that directory and a relative path would no longer resolve there.
fn resolve_program(spec: &CommandSpec) -> io::Result<(PathBuf, Option<PathBuf>)> {
    match spec.working_dir() {
        Some(_) => {
            let program = std::path::absolute(Path::new(&spec.file_path))?;
            let dir = program.parent().map(Path::to_path_buf);
            Ok((program, dir))
        }
        None => Ok((PathBuf::from(&spec.file_path), None)),
    }
}

#[cfg(windows)]
fn add_arguments(cmd: &mut Command, arguments: &str) -> io::Result<()> {
    if !arguments.trim().is_empty() {
        cmd.raw_arg(arguments);
    }
    Ok(())
}

#[cfg(not(windows))]
fn add_arguments(cmd: &mut Command, arguments: &str) -> io::Result<()> {
    let args = split_arguments(arguments)?;
    cmd.args(args);
    Ok(())
}

#[cfg_attr(windows, allow(dead_code))]
fn split_arguments(arguments: &str) -> io::Result<Vec<String>> {
    shlex::split(arguments).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unbalanced quotes in arguments: {arguments}"),
        )
    })
}

#[cfg(windows)]
fn detached_command(spec: &CommandSpec) -> io::Result<Command> {
    let (program, dir) = resolve_program(spec)?;
    let mut cmd = Command::new("cmd");
    cmd.raw_arg(format!(
        "/C start \"\" \"{}\" {}",
        program.display(),
        spec.arguments
    ));
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.creation_flags(CREATE_NO_WINDOW);
    Ok(cmd)
}

#[cfg(not(windows))]
fn detached_command(spec: &CommandSpec) -> io::Result<Command> {
    build_command(spec)
}
