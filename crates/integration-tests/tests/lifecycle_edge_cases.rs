//! Lifecycle edge cases: double start, misuse before start, dispose, kill
#![cfg(unix)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use procline_core::application::Subscription;
use procline_core::domain::{CommandSpec, ExitWait, LifecycleState};
use procline_core::ProcessError;
use procline_infra_system::StreamingProcess;
use tokio::sync::oneshot;

/// Resolves once the exit event has been delivered to subscribers
fn exit_event(process: &StreamingProcess) -> (Subscription, oneshot::Receiver<i32>) {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let subscription = process.on_exited(move |code| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(code);
        }
    });
    (subscription, rx)
}

#[tokio::test]
async fn test_second_start_is_a_no_op() {
    let process = StreamingProcess::new(CommandSpec::new("sleep").arg("5")).unwrap();

    assert!(process.start().await.unwrap());
    let pid = process.pid();
    assert!(!process.start().await.unwrap());
    assert_eq!(process.pid(), pid, "no relaunch");
    assert!(process.has_started());

    process.kill().await.unwrap();
    process.wait_for_exit().await.unwrap();

    // Still a no-op after exit
    assert!(!process.start().await.unwrap());
    assert_eq!(process.lifecycle_state(), LifecycleState::Exited);
}

#[tokio::test]
async fn test_concurrent_starts_launch_once() {
    let process = Arc::new(StreamingProcess::new(CommandSpec::new("true")).unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let process = process.clone();
        handles.push(tokio::spawn(async move { process.start().await.unwrap() }));
    }

    let mut launched = 0;
    for handle in handles {
        if handle.await.unwrap() {
            launched += 1;
        }
    }
    assert_eq!(launched, 1);
    assert_eq!(process.wait_for_exit().await.unwrap(), 0);
}

#[tokio::test]
async fn test_state_and_input_before_start_are_misuse() {
    let process = StreamingProcess::new(CommandSpec::new("cat")).unwrap();

    let err = process.standard_input().unwrap_err();
    assert!(matches!(err, ProcessError::NotStarted(_)));
    assert!(err.is_misuse());

    let err = process.current_state().await.unwrap_err();
    assert!(matches!(err, ProcessError::NotStarted(_)));
}

#[tokio::test]
async fn test_dispose_is_idempotent_after_exit() {
    let process = StreamingProcess::new(CommandSpec::new("true")).unwrap();
    process.start().await.unwrap();
    assert_eq!(process.wait_for_exit().await.unwrap(), 0);

    process.dispose();
    process.dispose();

    assert_eq!(process.lifecycle_state(), LifecycleState::Disposed);
    assert!(process.has_started());
    assert!(process.has_exited());
    // Exit observed before dispose stays observable
    assert_eq!(process.wait_for_exit().await.unwrap(), 0);
    assert!(!process.start().await.unwrap());
}

#[tokio::test]
async fn test_kill_drives_exit_event() {
    let process = StreamingProcess::new(CommandSpec::new("sleep").arg("30")).unwrap();
    let exits = Arc::new(AtomicUsize::new(0));
    let counter = exits.clone();
    let _count = process.on_exited(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (_exit, exited) = exit_event(&process);

    process.start().await.unwrap();
    assert!(!process.has_exited());

    process.kill().await.unwrap();
    let wait = process
        .wait_for_exit_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    assert!(wait.exited);
    assert_eq!(wait.exit_code, 137);

    assert_eq!(exited.await.unwrap(), 137);
    assert_eq!(exits.load(Ordering::SeqCst), 1);

    // Killing an exited process defers to the OS: nothing to do
    process.kill().await.unwrap();
}

#[tokio::test]
async fn test_kill_after_exit_returns_while_output_drains() {
    // The exit event is held back by the open pipes, the kill must not be
    let process = StreamingProcess::new(
        CommandSpec::new("sh").args(["-c", "sleep 5 & exit 0"]),
    )
    .unwrap();
    process.start().await.unwrap();

    let wait = process.wait_for_exit_millis(1000).await.unwrap();
    assert_eq!(wait, ExitWait::exited(0));

    let started = Instant::now();
    process.kill().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "kill took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_detached_streams_still_drain_the_pipe() {
    // 1 MiB of output with nobody listening must not block the child
    let spec = CommandSpec::new("sh").args(["-c", "head -c 1048576 /dev/zero | tr '\\0' 'x'; echo"]);
    let process = StreamingProcess::new(spec).unwrap();
    assert!(!process.output_signal().is_attached());

    process.start().await.unwrap();
    let wait = process
        .wait_for_exit_timeout(Duration::from_secs(10))
        .await
        .unwrap();
    assert!(wait.exited);
    assert_eq!(wait.exit_code, 0);
}

#[tokio::test]
async fn test_subscribe_attach_detach_tracks_count() {
    let process = StreamingProcess::new(CommandSpec::new("true")).unwrap();
    assert!(!process.error_signal().is_attached());

    let first = process.on_error_line(|_| {});
    let second = process.on_error_line(|_| {});
    assert!(process.error_signal().is_attached());

    drop(first);
    assert!(process.error_signal().is_attached());
    drop(second);
    assert!(!process.error_signal().is_attached());

    // Exit stays attached once subscribed
    let mut exit = process.on_exited(|_| {});
    exit.unsubscribe();
    assert!(process.exit_signal().is_attached());
}

#[tokio::test]
async fn test_stdin_write_after_close_fails() {
    let process = StreamingProcess::new(CommandSpec::new("cat")).unwrap();
    process.start().await.unwrap();

    let input = process.standard_input().unwrap();
    input.close().await.unwrap();
    assert!(matches!(
        input.write_line("late").await,
        Err(ProcessError::InputClosed)
    ));
    assert_eq!(process.wait_for_exit().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_working_dir_is_spawn_error() {
    let spec = CommandSpec::new("true").working_dir("/definitely/not/here");
    let process = StreamingProcess::new(spec).unwrap();

    let err = process.start().await.unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
    assert!(!err.is_misuse());
    assert!(!process.has_started());
}
