// tests/runner_fake_backend.rs

use std::error::Error;

use tokio::sync::mpsc::UnboundedReceiver;

use cmdrunner::engine::{AdvanceReason, ItemId, QueueRunner, RunnerEvent, RunnerOptions};
use cmdrunner::errors::RunnerError;
use cmdrunner::exec::UNTRACKED_NOTICE;
use cmdrunner::types::{CommandSpec, ErrorMatcher, ItemState};
use cmdrunner_test_utils::builders::CommandSpecBuilder;
use cmdrunner_test_utils::fake_backend::{FakeBackend, Script};
use cmdrunner_test_utils::{eventually, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn runner(backend: FakeBackend) -> QueueRunner<FakeBackend> {
    QueueRunner::with_backend(backend, RunnerOptions::default())
}

fn spec(path: &str) -> CommandSpec {
    CommandSpec::new(path)
}

fn drain(rx: &mut UnboundedReceiver<RunnerEvent>) -> Vec<RunnerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn advance_reason(events: &[RunnerEvent], item: ItemId) -> Option<AdvanceReason> {
    events.iter().find_map(|e| match e {
        RunnerEvent::ItemAdvanced { item: i, reason } if *i == item => Some(*reason),
        _ => None,
    })
}

fn log_lines(events: &[RunnerEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            RunnerEvent::LogReceived { name, line, .. } => Some((name.clone(), line.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn items_run_in_fifo_order_and_wait_for_exit() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new()
        .with_script("a", Script::new().line("a1").sleep_ms(20).line("a2").exit(0))
        .with_script("b", Script::new().line("b1").exit(0));
    let runner = runner(backend);
    let mut rx = runner.subscribe();

    let a = runner.enqueue("a", &spec("a"));
    let b = runner.enqueue("b", &spec("b"));

    let summary = with_timeout(runner.run_queue()).await?;
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.errored, 0);
    assert_eq!(runner.backend().launched(), vec!["a", "b"]);
    assert_eq!(runner.item_state(a), Some(ItemState::Completed));
    assert_eq!(runner.item_state(b), Some(ItemState::Completed));

    let events = drain(&mut rx);
    assert_eq!(advance_reason(&events, a), Some(AdvanceReason::Exited));

    // Every line of `a` is logged before `b` starts.
    let lines = log_lines(&events);
    let texts: Vec<_> = lines.iter().map(|(_, l)| l.as_str()).collect();
    assert_eq!(texts, vec!["a1", "a2", "b1"]);

    let b_started = events
        .iter()
        .position(|e| matches!(e, RunnerEvent::ProcessStarted(h) if h.item() == b))
        .ok_or("b never started")?;
    let a_advanced = events
        .iter()
        .position(|e| matches!(e, RunnerEvent::ItemAdvanced { item, .. } if *item == a))
        .ok_or("a never advanced")?;
    assert!(a_advanced < b_started);

    assert!(matches!(events.last(), Some(RunnerEvent::QueueFinished(s)) if s.total() == 2));
    Ok(())
}

#[tokio::test]
async fn marker_advances_queue_while_process_keeps_running() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new()
        .with_script("server", Script::new().line("booting").line("READY on :8080"))
        .with_script("client", Script::new().line("hello").exit(0));
    let runner = runner(backend);
    let mut rx = runner.subscribe();

    let server = runner.enqueue(
        "server",
        &CommandSpecBuilder::new("server").log_marker("READY").build(),
    );
    let client = runner.enqueue("client", &spec("client"));

    with_timeout(runner.run_queue()).await?;

    let events = drain(&mut rx);
    assert_eq!(advance_reason(&events, server), Some(AdvanceReason::MarkerSeen));
    assert_eq!(runner.item_state(server), Some(ItemState::Completed));
    assert_eq!(runner.item_state(client), Some(ItemState::Completed));
    assert_eq!(runner.live_runs(), 1);

    let handle = runner
        .processes()
        .into_iter()
        .find(|h| h.item() == server)
        .ok_or("server not listed")?;
    assert!(!handle.is_ended());

    assert_eq!(runner.kill_all(), 1);
    with_timeout(runner.follow()).await?;
    assert_eq!(runner.live_runs(), 0);
    assert_eq!(handle.exit().map(|e| e.killed), Some(true));
    assert_eq!(handle.log_text(), "booting\nREADY on :8080\n");
    Ok(())
}

#[tokio::test]
async fn exit_wins_when_marker_and_exit_arrive_together() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().with_script("job", Script::new().line("READY").exit(0));
    let runner = runner(backend);
    let mut rx = runner.subscribe();

    let job = runner.enqueue("job", &CommandSpecBuilder::new("job").log_marker("READY").build());
    with_timeout(runner.run_queue()).await?;

    let events = drain(&mut rx);
    assert_eq!(advance_reason(&events, job), Some(AdvanceReason::Exited));
    assert_eq!(runner.item_state(job), Some(ItemState::Completed));
    Ok(())
}

#[tokio::test]
async fn continue_upon_execution_does_not_block() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new()
        .with_script("watcher", Script::new().line("watching"))
        .with_script("build", Script::new().exit(0));
    let runner = runner(backend);
    let mut rx = runner.subscribe();

    let watcher = runner.enqueue(
        "watcher",
        &CommandSpecBuilder::new("watcher")
            .continue_upon_execution()
            .log_marker("never printed")
            .build(),
    );
    let build = runner.enqueue("build", &spec("build"));

    let summary = with_timeout(runner.run_queue()).await?;
    assert_eq!(summary.completed, 2);

    let events = drain(&mut rx);
    assert_eq!(advance_reason(&events, watcher), Some(AdvanceReason::Immediate));
    assert_eq!(advance_reason(&events, build), Some(AdvanceReason::Exited));
    assert_eq!(runner.live_runs(), 1);

    runner.kill_all();
    with_timeout(runner.follow()).await?;
    assert_eq!(runner.live_runs(), 0);
    Ok(())
}

#[tokio::test]
async fn error_line_fails_item_but_queue_continues() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new()
        .with_script("lint", Script::new().line("Error: unused import").exit(1))
        .with_script("test", Script::new().line("ok").exit(0));
    let runner = runner(backend);

    let lint = runner.enqueue("lint", &spec("lint"));
    let test = runner.enqueue("test", &spec("test"));

    let summary = with_timeout(runner.run_queue()).await?;
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(runner.item_state(lint), Some(ItemState::Error));
    assert_eq!(runner.item_state(test), Some(ItemState::Completed));
    Ok(())
}

#[tokio::test]
async fn custom_error_pattern_replaces_default_marker() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new()
        .with_script("a", Script::new().line("Error count: 0").exit(0))
        .with_script("b", Script::new().line("FAILED 3 tests").exit(0));
    let options = RunnerOptions {
        error_matcher: ErrorMatcher::Pattern(regex::Regex::new("^FAILED")?),
    };
    let runner = QueueRunner::with_backend(backend, options);

    let a = runner.enqueue("a", &spec("a"));
    let b = runner.enqueue("b", &spec("b"));
    with_timeout(runner.run_queue()).await?;

    assert_eq!(runner.item_state(a), Some(ItemState::Completed));
    assert_eq!(runner.item_state(b), Some(ItemState::Error));
    Ok(())
}

#[tokio::test]
async fn empty_file_path_completes_without_launch() -> TestResult {
    init_tracing();

    let runner = runner(FakeBackend::new());
    let mut rx = runner.subscribe();

    let item = runner.enqueue("placeholder", &spec("   "));
    with_timeout(runner.run_queue()).await?;

    assert_eq!(runner.item_state(item), Some(ItemState::Completed));
    assert!(runner.backend().launched().is_empty());
    assert!(runner.backend().detached().is_empty());
    assert!(runner.processes().is_empty());

    let events = drain(&mut rx);
    assert!(log_lines(&events).is_empty());
    assert_eq!(advance_reason(&events, item), Some(AdvanceReason::Immediate));
    Ok(())
}

#[tokio::test]
async fn untracked_launch_logs_notice_only() -> TestResult {
    init_tracing();

    let runner = runner(FakeBackend::new());
    let mut rx = runner.subscribe();

    let item = runner.enqueue("opener", &CommandSpecBuilder::new("xdg-open").untracked().build());
    with_timeout(runner.run_queue()).await?;

    assert_eq!(runner.item_state(item), Some(ItemState::Completed));
    assert_eq!(runner.backend().detached(), vec!["opener"]);
    assert!(runner.processes().is_empty());

    let events = drain(&mut rx);
    let logged: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunnerEvent::LogReceived { run, line, .. } => Some((*run, line.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(logged, vec![(None, UNTRACKED_NOTICE)]);
    Ok(())
}

#[tokio::test]
async fn launch_failure_is_logged_and_fails_item() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().failing("missing-tool");
    let runner = runner(backend);
    let mut rx = runner.subscribe();

    let missing = runner.enqueue("missing", &spec("missing-tool"));
    let next = runner.enqueue("next", &spec("next"));

    let summary = with_timeout(runner.run_queue()).await?;
    assert_eq!(summary.errored, 1);
    assert_eq!(runner.item_state(missing), Some(ItemState::Error));
    assert_eq!(runner.item_state(next), Some(ItemState::Completed));

    let lines = log_lines(&drain(&mut rx));
    assert!(
        lines
            .iter()
            .any(|(name, line)| name == "missing" && line.starts_with("Error: program not found"))
    );
    Ok(())
}

#[tokio::test]
async fn removing_started_items_is_a_no_op() -> TestResult {
    init_tracing();

    let runner = runner(FakeBackend::new());
    let first = runner.enqueue("first", &spec("first"));
    let skipped = runner.enqueue("skipped", &spec("skipped"));

    assert!(runner.remove_queued(skipped));
    with_timeout(runner.run_queue()).await?;

    assert_eq!(runner.backend().launched(), vec!["first"]);
    assert!(!runner.remove_queued(first));
    assert_eq!(runner.items().len(), 1);
    assert_eq!(runner.item_state(first), Some(ItemState::Completed));
    Ok(())
}

#[tokio::test]
async fn completed_items_flagged_for_removal_leave_the_queue() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().with_script("bad", Script::new().line("Error").exit(1));
    let runner = runner(backend);

    let good = runner.enqueue(
        "good",
        &CommandSpecBuilder::new("good").remove_upon_completion().build(),
    );
    let bad = runner.enqueue(
        "bad",
        &CommandSpecBuilder::new("bad").remove_upon_completion().build(),
    );

    let summary = with_timeout(runner.run_queue()).await?;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.errored, 1);

    assert_eq!(runner.item_state(good), None);
    assert_eq!(runner.item_state(bad), Some(ItemState::Error));
    Ok(())
}

#[tokio::test]
async fn kill_ends_wait_and_is_not_an_error() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().with_script("server", Script::new().line("up"));
    let runner = runner(backend);
    let server = runner.enqueue("server", &spec("server"));

    let killer = async {
        with_timeout(eventually(|| runner.live_runs() == 1)).await;
        let run = runner.focused().map(|h| h.id());
        run.map(|run| runner.kill(run))
    };
    let (summary, killed) = tokio::join!(runner.run_queue(), killer);

    assert_eq!(killed, Some(true));
    let summary = summary?;
    assert_eq!(summary.errored, 0);
    assert_eq!(runner.item_state(server), Some(ItemState::Completed));

    let handle = runner.focused().ok_or("server not focused")?;
    assert_eq!(handle.exit().map(|e| e.killed), Some(true));
    assert_eq!(handle.log_text(), "up\n");
    assert!(!runner.kill(handle.id()), "second kill reports already ended");
    Ok(())
}

#[tokio::test]
async fn second_drain_is_rejected() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().with_script("slow", Script::new().sleep_ms(50).exit(0));
    let runner = runner(backend);
    runner.enqueue("slow", &spec("slow"));

    let (first, second) = tokio::join!(runner.run_queue(), runner.run_queue());
    assert_eq!(first?.completed, 1);
    assert!(matches!(second, Err(RunnerError::AlreadyDraining)));
    Ok(())
}

#[tokio::test]
async fn items_enqueued_while_draining_are_picked_up() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().with_script("slow", Script::new().sleep_ms(50).exit(0));
    let runner = runner(backend);
    runner.enqueue("slow", &spec("slow"));

    let late = async {
        with_timeout(eventually(|| runner.live_runs() == 1)).await;
        runner.enqueue("late", &spec("late"))
    };
    let (summary, late) = tokio::join!(runner.run_queue(), late);

    assert_eq!(summary?.total(), 2);
    assert_eq!(runner.item_state(late), Some(ItemState::Completed));
    assert_eq!(runner.backend().launched(), vec!["slow", "late"]);
    Ok(())
}

#[tokio::test]
async fn pump_applies_output_of_background_runs() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new()
        .with_script("bg", Script::new().line("tick").sleep_ms(20).line("tock").exit(0));
    let runner = runner(backend);
    runner.enqueue("bg", &CommandSpecBuilder::new("bg").continue_upon_execution().build());

    with_timeout(runner.run_queue()).await?;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(runner.pump() > 0);
    assert_eq!(runner.live_runs(), 0);
    let handle = runner.focused().ok_or("bg not focused")?;
    assert_eq!(handle.log_text(), "tick\ntock\n");
    Ok(())
}

#[tokio::test]
async fn process_list_can_be_pruned_and_logs_cleared() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new().with_script("job", Script::new().line("output").exit(0));
    let runner = runner(backend);
    runner.enqueue("job", &spec("job"));
    with_timeout(runner.run_queue()).await?;

    let handle = runner.focused().ok_or("job not focused")?;
    assert!(runner.clear_log(handle.id()));
    assert_eq!(handle.log_text(), "");

    assert!(runner.remove_process(handle.id()));
    assert!(runner.processes().is_empty());
    assert!(runner.focused().is_none());
    assert!(!runner.clear_log(handle.id()));
    Ok(())
}
