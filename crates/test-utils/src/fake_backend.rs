use std::collections::{HashMap, HashSet};
use std::io;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use cmdrunner::exec::{
    LaunchRequest, ProcessBackend, ProcessEvent, ProcessEventSender, RunExit, RunHandle, RunId,
};

/// One step of a scripted process.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Line(String),
    Sleep(Duration),
    Exit(i32),
}

/// Output and lifetime of a fake process.
///
/// Without a final [`ScriptStep::Exit`] the process runs until killed.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, line: &str) -> Self {
        self.steps.push(ScriptStep::Line(line.to_string()));
        self
    }

    pub fn sleep_ms(mut self, ms: u64) -> Self {
        self.steps.push(ScriptStep::Sleep(Duration::from_millis(ms)));
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.steps.push(ScriptStep::Exit(code));
        self
    }
}

/// A fake backend that:
/// - plays back a [`Script`] per `file_path` instead of spawning processes
///   (unscripted paths exit 0 immediately)
/// - records every launch, tracked or detached
/// - can be told to refuse launching given paths
#[derive(Debug, Default)]
pub struct FakeBackend {
    scripts: Mutex<HashMap<String, Script>>,
    failing: Mutex<HashSet<String>>,
    launched: Mutex<Vec<String>>,
    detached: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, file_path: &str, script: Script) -> Self {
        self.scripts.lock().insert(file_path.to_string(), script);
        self
    }

    pub fn failing(self, file_path: &str) -> Self {
        self.failing.lock().insert(file_path.to_string());
        self
    }

    /// Names of tracked launches, in order.
    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().clone()
    }

    /// Names of fire-and-forget launches, in order.
    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().clone()
    }

    fn refuse(&self, request: &LaunchRequest) -> io::Result<()> {
        if self.failing.lock().contains(&request.spec.file_path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("program not found: {}", request.spec.file_path),
            ));
        }
        Ok(())
    }
}

impl ProcessBackend for FakeBackend {
    fn spawn_tracked(
        &self,
        request: &LaunchRequest,
        events: ProcessEventSender,
    ) -> io::Result<RunHandle> {
        self.refuse(request)?;
        self.launched.lock().push(request.name.clone());

        let script = self
            .scripts
            .lock()
            .get(&request.spec.file_path)
            .cloned()
            .unwrap_or_else(|| Script::new().exit(0));

        let (kill_tx, kill_rx) = oneshot::channel();
        let handle = RunHandle::new(
            request.run_id,
            request.item,
            request.name.clone(),
            request.spec.clone(),
            None,
            kill_tx,
        );

        tokio::spawn(play(script, request.run_id, kill_rx, events));
        Ok(handle)
    }

    fn spawn_detached(&self, request: &LaunchRequest) -> io::Result<()> {
        self.refuse(request)?;
        self.detached.lock().push(request.name.clone());
        Ok(())
    }
}

async fn play(
    script: Script,
    run: RunId,
    kill_rx: oneshot::Receiver<()>,
    events: ProcessEventSender,
) {
    // A dropped kill switch never resolves.
    let killed = async move {
        if kill_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(killed);

    let send_exit = |code: Option<i32>, killed: bool| {
        let _ = events.send(ProcessEvent::Exited {
            run,
            exit: RunExit { code, killed },
        });
    };

    for step in script.steps {
        match step {
            ScriptStep::Line(line) => {
                let _ = events.send(ProcessEvent::Line { run, line });
            }
            ScriptStep::Sleep(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = &mut killed => {
                        send_exit(None, true);
                        return;
                    }
                }
            }
            ScriptStep::Exit(code) => {
                send_exit(Some(code), false);
                return;
            }
        }
    }

    killed.await;
    send_exit(None, true);
}
